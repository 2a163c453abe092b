//! Pairing installation and session expiry.

use super::{ManagerState, SecureSessionManager};
use crate::address::{NodeId, PeerAddress};
use crate::crypto::SessionRole;
use crate::error::SessionError;
use crate::fabric::FabricIndex;
use crate::pairing::PairingSession;
use crate::session::SessionHandle;
use tracing::{debug, info};

impl SecureSessionManager {
    /// Install a new authenticated session from a completed key exchange.
    ///
    /// Any existing session with the same local session id is expired
    /// first; the table may also evict its least recently active slot if
    /// full. Fires `on_new_connection` once the session is live.
    ///
    /// A concrete UDP/TCP or BLE peer address is recorded on the session;
    /// an unspecified-IP address is rejected unless
    /// `allow_ip_pairing_address` is configured, in which case the address
    /// is learned from the first inbound datagram instead.
    pub fn new_pairing(
        &mut self,
        peer_address: Option<PeerAddress>,
        peer_node_id: NodeId,
        pairing: &dyn PairingSession,
        role: SessionRole,
        fabric: FabricIndex,
    ) -> Result<(), SessionError> {
        if self.state != ManagerState::Initialized {
            return Err(SessionError::IncorrectState);
        }

        let address_to_set = match peer_address {
            Some(address @ PeerAddress::Ble { .. }) => Some(address),
            Some(PeerAddress::Udp { ip, .. }) | Some(PeerAddress::Tcp { ip, .. })
                if !ip.is_unspecified() =>
            {
                peer_address
            }
            Some(PeerAddress::Udp { .. }) | Some(PeerAddress::Tcp { .. }) => {
                if self.config.allow_ip_pairing_address {
                    // tolerated; the address is learned from the first
                    // inbound datagram instead
                    None
                } else {
                    return Err(SessionError::InvalidArgument(
                        "unspecified IP peer address not accepted for pairing",
                    ));
                }
            }
            Some(PeerAddress::Undefined) | None => None,
        };
        if !fabric.is_none() {
            if let Some(fabrics) = self.fabrics.as_ref() {
                if !fabrics.contains(fabric) {
                    return Err(SessionError::InvalidArgument(
                        "fabric index is not provisioned",
                    ));
                }
            }
        }

        let secure_session = pairing.derive_secure_session(role)?;
        let local_session_id = pairing.local_session_id();
        let peer_session_id = pairing.peer_session_id();

        // a pairing reusing our local session id replaces the old session
        if let Some(existing) = self
            .peer_connections
            .find_by_local_key(None, local_session_id, 0)
        {
            self.expire_slot(existing);
        }

        info!(
            peer = %peer_node_id,
            session_id = %peer_session_id,
            role = %role,
            "new secure session created"
        );

        let now_ms = self.now_ms();
        let index = {
            let Self {
                peer_connections,
                delegate,
                transport,
                ..
            } = self;
            peer_connections.create(
                peer_node_id,
                peer_session_id,
                local_session_id,
                now_ms,
                |evicted| {
                    if let Some(callback) = delegate.as_mut() {
                        callback.on_connection_expired(evicted.handle());
                    }
                    if let Some(transport) = transport.as_mut() {
                        transport.disconnect(evicted.peer_address());
                    }
                },
            )?
        };

        let state = self
            .peer_connections
            .get_mut(index)
            .ok_or(SessionError::NoMemory)?;
        state.set_fabric_index(fabric);
        state.set_secure_session(secure_session);
        if let Some(address) = address_to_set {
            state.set_peer_address(address);
        }
        if let Some(counter) = pairing.peer_counter() {
            state.peer_counter_mut().set_counter(counter);
        }

        let handle = state.handle();
        if let Some(callback) = self.delegate.as_mut() {
            callback.on_new_connection(handle);
        }
        Ok(())
    }

    /// Remove one authenticated session. Unknown handles are a silent
    /// no-op.
    pub fn expire_pairing(&mut self, session: &SessionHandle) {
        if self.state != ManagerState::Initialized {
            return;
        }
        if let Some(index) = self.resolve_authenticated(session) {
            self.expire_slot(index);
        }
    }

    /// Remove every authenticated session with the given peer on the
    /// given fabric.
    pub fn expire_all_pairings(&mut self, peer_node_id: NodeId, fabric: FabricIndex) {
        if self.state != ManagerState::Initialized {
            return;
        }
        let mut from = 0;
        while let Some(index) = self.peer_connections.find_by_node_id(peer_node_id, from) {
            let on_fabric = self
                .peer_connections
                .get(index)
                .map(|state| state.fabric_index() == fabric)
                .unwrap_or(false);
            if on_fabric {
                self.expire_slot(index);
                // removal invalidates the scan; restart from the top
                from = 0;
            } else {
                from = index + 1;
            }
        }
    }

    /// Remove every authenticated session on the given fabric.
    pub fn expire_all_pairings_for_fabric(&mut self, fabric: FabricIndex) {
        if self.state != ManagerState::Initialized {
            return;
        }
        debug!(fabric = %fabric, "expiring all sessions for fabric");
        while let Some(index) = self.peer_connections.find_by_fabric(fabric, 0) {
            self.expire_slot(index);
        }
    }
}
