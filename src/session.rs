//! Per-session state.
//!
//! Two session flavors share the counter machinery: authenticated
//! [`PeerConnectionState`] produced by pairing, and address-keyed
//! [`UnauthenticatedSession`] allocated lazily on first traffic. A
//! [`SessionHandle`] is the copyable value passed across the delegate
//! boundary; it never owns a table slot and must be re-resolved on use.

use crate::address::{NodeId, PeerAddress, SessionId};
use crate::counter::{LocalCounter, PeerCounter};
use crate::crypto::SecureSession;
use crate::fabric::FabricIndex;

/// State of one authenticated session with a remote peer.
pub struct PeerConnectionState {
    /// Peer node identity established during pairing.
    peer_node_id: NodeId,
    /// Last known peer address. Updated on receive from a new address.
    peer_address: PeerAddress,
    /// Fabric this session belongs to.
    fabric_index: FabricIndex,
    /// Session id the peer uses to address us.
    local_session_id: SessionId,
    /// Session id we place in outbound packet headers.
    peer_session_id: SessionId,
    /// Symmetric key material derived by the pairing engine.
    secure_session: SecureSession,
    /// Outbound counter for encrypted traffic on this session.
    send_counter: LocalCounter,
    /// Replay window for inbound data messages.
    peer_counter: PeerCounter,
    /// Replay window for inbound control messages. Unused until control
    /// message counters are enabled in the session configuration.
    control_peer_counter: PeerCounter,
    /// Last send or accepted receive (milliseconds, monotonic clock).
    last_activity_ms: u64,
}

impl PeerConnectionState {
    /// Create a fresh session. Key material, fabric, and peer address are
    /// filled in by the caller after creation.
    pub fn new(
        peer_node_id: NodeId,
        peer_session_id: SessionId,
        local_session_id: SessionId,
        now_ms: u64,
    ) -> Self {
        Self {
            peer_node_id,
            peer_address: PeerAddress::Undefined,
            fabric_index: FabricIndex::NONE,
            local_session_id,
            peer_session_id,
            secure_session: SecureSession::empty(),
            send_counter: LocalCounter::new(0),
            peer_counter: PeerCounter::new(),
            control_peer_counter: PeerCounter::new(),
            last_activity_ms: now_ms,
        }
    }

    pub fn peer_node_id(&self) -> NodeId {
        self.peer_node_id
    }

    pub fn peer_address(&self) -> &PeerAddress {
        &self.peer_address
    }

    pub fn set_peer_address(&mut self, address: PeerAddress) {
        self.peer_address = address;
    }

    pub fn fabric_index(&self) -> FabricIndex {
        self.fabric_index
    }

    pub fn set_fabric_index(&mut self, fabric: FabricIndex) {
        self.fabric_index = fabric;
    }

    pub fn local_session_id(&self) -> SessionId {
        self.local_session_id
    }

    pub fn peer_session_id(&self) -> SessionId {
        self.peer_session_id
    }

    pub fn secure_session(&self) -> &SecureSession {
        &self.secure_session
    }

    pub fn set_secure_session(&mut self, session: SecureSession) {
        self.secure_session = session;
    }

    pub fn send_counter(&self) -> &LocalCounter {
        &self.send_counter
    }

    pub fn send_counter_mut(&mut self) -> &mut LocalCounter {
        &mut self.send_counter
    }

    pub fn peer_counter(&self) -> &PeerCounter {
        &self.peer_counter
    }

    pub fn peer_counter_mut(&mut self) -> &mut PeerCounter {
        &mut self.peer_counter
    }

    pub fn control_peer_counter(&self) -> &PeerCounter {
        &self.control_peer_counter
    }

    pub fn control_peer_counter_mut(&mut self) -> &mut PeerCounter {
        &mut self.control_peer_counter
    }

    /// Update the activity timestamp.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Whether this session has been idle longer than `max_idle_ms`.
    pub fn is_idle(&self, now_ms: u64, max_idle_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > max_idle_ms
    }

    /// The handle value identifying this session across the delegate
    /// boundary.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::Authenticated {
            peer_node_id: self.peer_node_id,
            local_session_id: self.local_session_id,
            peer_session_id: self.peer_session_id,
            fabric_index: self.fabric_index,
        }
    }
}

/// State of one unauthenticated session, keyed by peer address.
pub struct UnauthenticatedSession {
    /// Address identifying the peer (table key).
    peer_address: PeerAddress,
    /// Outbound counter for this peer.
    send_counter: LocalCounter,
    /// Replay window with trust-on-first-use adoption.
    peer_counter: PeerCounter,
    /// Last send or accepted receive (milliseconds, monotonic clock).
    last_activity_ms: u64,
}

impl UnauthenticatedSession {
    /// Create a session for a peer address.
    ///
    /// The send counter starts at a random value so a fresh boot does not
    /// collide with the peer's previously adopted baseline.
    pub fn new(peer_address: PeerAddress, now_ms: u64) -> Self {
        Self {
            peer_address,
            send_counter: LocalCounter::random(),
            peer_counter: PeerCounter::new(),
            last_activity_ms: now_ms,
        }
    }

    pub fn peer_address(&self) -> &PeerAddress {
        &self.peer_address
    }

    pub fn send_counter(&self) -> &LocalCounter {
        &self.send_counter
    }

    pub fn send_counter_mut(&mut self) -> &mut LocalCounter {
        &mut self.send_counter
    }

    pub fn peer_counter(&self) -> &PeerCounter {
        &self.peer_counter
    }

    pub fn peer_counter_mut(&mut self) -> &mut PeerCounter {
        &mut self.peer_counter
    }

    /// Update the activity timestamp.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// The handle value identifying this session across the delegate
    /// boundary.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::Unauthenticated {
            peer_address: self.peer_address,
        }
    }
}

/// Copyable session identifier passed across the delegate boundary.
///
/// A handle carries enough to resolve back to a table slot but does not
/// own it; callers must re-resolve through the manager, which turns a
/// stale handle into [`NotConnected`](crate::error::SessionError::NotConnected)
/// rather than a dangling access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionHandle {
    /// An authenticated session created by pairing.
    Authenticated {
        peer_node_id: NodeId,
        local_session_id: SessionId,
        peer_session_id: SessionId,
        fabric_index: FabricIndex,
    },
    /// An unauthenticated session, identified by peer address.
    Unauthenticated { peer_address: PeerAddress },
}

impl SessionHandle {
    /// Whether this handle denotes an authenticated session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionHandle::Authenticated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};

    #[test]
    fn test_activity_tracking() {
        let mut state =
            PeerConnectionState::new(NodeId::new(1), SessionId::new(2), SessionId::new(3), 100);
        assert_eq!(state.last_activity_ms(), 100);
        assert!(!state.is_idle(100, 50));
        assert!(state.is_idle(200, 50));

        state.touch(200);
        assert_eq!(state.last_activity_ms(), 200);
        assert!(!state.is_idle(200, 50));
    }

    #[test]
    fn test_authenticated_handle_round_trip() {
        let mut state =
            PeerConnectionState::new(NodeId::new(0xABCD), SessionId::new(12), SessionId::new(7), 0);
        state.set_fabric_index(FabricIndex::new(2));

        match state.handle() {
            SessionHandle::Authenticated {
                peer_node_id,
                local_session_id,
                peer_session_id,
                fabric_index,
            } => {
                assert_eq!(peer_node_id, NodeId::new(0xABCD));
                assert_eq!(local_session_id, SessionId::new(7));
                assert_eq!(peer_session_id, SessionId::new(12));
                assert_eq!(fabric_index, FabricIndex::new(2));
            }
            SessionHandle::Unauthenticated { .. } => panic!("expected authenticated handle"),
        }
        assert!(state.handle().is_authenticated());
    }

    #[test]
    fn test_unauthenticated_handle_carries_address() {
        let addr = PeerAddress::udp(IpAddr::V6(Ipv6Addr::LOCALHOST), 5540);
        let session = UnauthenticatedSession::new(addr, 10);
        assert_eq!(
            session.handle(),
            SessionHandle::Unauthenticated { peer_address: addr }
        );
        assert!(!session.handle().is_authenticated());
    }
}
