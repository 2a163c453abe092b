//! Upward delegate boundary.
//!
//! The embedder implements [`SessionDelegate`] and registers it on the
//! manager. All callbacks run synchronously on the dispatch thread;
//! implementations must not perform long-running work inline.

use crate::address::PeerAddress;
use crate::error::SessionError;
use crate::session::SessionHandle;
use crate::wire::{PacketHeader, PayloadHeader};

/// Whether a delivered message was already seen by the replay window.
///
/// Duplicates are only delivered when the payload requests an
/// acknowledgement; the receiver needs them to re-emit the ack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateMessage {
    No,
    Yes,
}

/// Callbacks from the session manager to the layer above it.
pub trait SessionDelegate {
    /// A message passed counter validation (and decryption, for encrypted
    /// sessions) and is ready for the exchange layer.
    fn on_message_received(
        &mut self,
        packet_header: &PacketHeader,
        payload_header: &PayloadHeader,
        session: SessionHandle,
        peer_address: &PeerAddress,
        is_duplicate: DuplicateMessage,
        message: Vec<u8>,
    );

    /// A new authenticated session was installed by pairing.
    fn on_new_connection(&mut self, _session: SessionHandle) {}

    /// An authenticated session was removed (explicit expiry, replacement,
    /// eviction, or the idle sweep).
    fn on_connection_expired(&mut self, _session: SessionHandle) {}

    /// An inbound datagram was dropped. Malformed traffic never
    /// propagates further down than this.
    fn on_receive_error(&mut self, _error: SessionError, _peer_address: &PeerAddress) {}
}

/// Downward interface to the message-counter synchronization service.
///
/// Ciphertexts arriving before the peer counter is synchronized are handed
/// off whole; the service queues them, drives the sync handshake, calls
/// [`mark_counter_synchronized`](crate::manager::SecureSessionManager::mark_counter_synchronized),
/// and re-submits the queued datagrams through the manager.
pub trait CounterSyncHandler {
    /// Queue an encrypted message and start (or join) a counter sync
    /// exchange for its session. `message` is the undecrypted body
    /// following the packet header.
    fn queue_received_message_and_start_sync(
        &mut self,
        packet_header: &PacketHeader,
        session: SessionHandle,
        peer_address: &PeerAddress,
        message: Vec<u8>,
    ) -> Result<(), SessionError>;
}
