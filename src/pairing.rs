//! Pairing engine seam.
//!
//! Key agreement (PASE/CASE style) happens outside this crate. Once a
//! handshake completes, the engine hands its result to
//! [`new_pairing`](crate::manager::SecureSessionManager::new_pairing)
//! through this adapter.

use crate::address::SessionId;
use crate::crypto::{SecureSession, SessionRole};
use crate::error::SessionError;

/// Completed key-exchange state, as consumed by the session manager.
pub trait PairingSession {
    /// Session id we chose; the peer addresses us with it.
    fn local_session_id(&self) -> SessionId;

    /// Session id the peer chose; goes into outbound packet headers.
    fn peer_session_id(&self) -> SessionId;

    /// The peer's initial message counter, if the handshake carried one.
    ///
    /// `None` leaves the session unsynchronized; encrypted traffic is then
    /// queued at the counter-sync service until the baseline is learned.
    fn peer_counter(&self) -> Option<u32>;

    /// Derive the symmetric session keys for the given role.
    fn derive_secure_session(&self, role: SessionRole) -> Result<SecureSession, SessionError>;
}
