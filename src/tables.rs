//! Fixed-capacity session tables.
//!
//! Both tables are slot vectors sized at construction; indices double as
//! lookup cursors. Lookups scan in table order starting at a caller
//! cursor, which lets bulk revocation resume or restart scans without
//! iterator invalidation. Slots are only reached through the returning
//! index, so a removed slot can never be touched through a stale
//! reference.

use crate::address::{NodeId, PeerAddress, SessionId};
use crate::error::SessionError;
use crate::fabric::FabricIndex;
use crate::session::{PeerConnectionState, UnauthenticatedSession};
use tracing::debug;

// ============================================================================
// Authenticated Sessions
// ============================================================================

/// Fixed-capacity table of authenticated sessions.
pub struct PeerConnections {
    slots: Vec<Option<PeerConnectionState>>,
}

impl PeerConnections {
    /// Create a table with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table has no occupied slots.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Access a slot by index.
    pub fn get(&self, index: usize) -> Option<&PeerConnectionState> {
        self.slots.get(index)?.as_ref()
    }

    /// Mutably access a slot by index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PeerConnectionState> {
        self.slots.get_mut(index)?.as_mut()
    }

    fn find_from<P>(&self, from: usize, predicate: P) -> Option<usize>
    where
        P: Fn(&PeerConnectionState) -> bool,
    {
        self.slots
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(index, slot)| {
                slot.as_ref().filter(|state| predicate(state)).map(|_| index)
            })
    }

    /// Find a session by our local session id, scanning from `from`.
    ///
    /// This is the receive-path lookup: the peer addresses us by the id we
    /// chose.
    pub fn find_by_session_id(&self, session_id: SessionId, from: usize) -> Option<usize> {
        self.find_from(from, |state| state.local_session_id() == session_id)
    }

    /// Find a session by peer node id, scanning from `from`.
    pub fn find_by_node_id(&self, node_id: NodeId, from: usize) -> Option<usize> {
        self.find_from(from, |state| state.peer_node_id() == node_id)
    }

    /// Find a session by fabric membership, scanning from `from`.
    pub fn find_by_fabric(&self, fabric: FabricIndex, from: usize) -> Option<usize> {
        self.find_from(from, |state| state.fabric_index() == fabric)
    }

    /// Find a session by local session id and (optionally) peer node id,
    /// scanning from `from`. This is the handle-resolution lookup.
    pub fn find_by_local_key(
        &self,
        node_id: Option<NodeId>,
        local_session_id: SessionId,
        from: usize,
    ) -> Option<usize> {
        self.find_from(from, |state| {
            state.local_session_id() == local_session_id
                && node_id.is_none_or(|id| state.peer_node_id() == id)
        })
    }

    /// Install a new session, evicting the least recently active slot when
    /// the table is full.
    ///
    /// `on_evict` runs for the displaced session before the new one takes
    /// its slot; eviction counts as expiry for the delegate.
    pub fn create<F>(
        &mut self,
        peer_node_id: NodeId,
        peer_session_id: SessionId,
        local_session_id: SessionId,
        now_ms: u64,
        on_evict: F,
    ) -> Result<usize, SessionError>
    where
        F: FnOnce(&PeerConnectionState),
    {
        let index = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(free) => free,
            None => {
                let victim = self
                    .least_recently_active()
                    .ok_or(SessionError::NoMemory)?;
                if let Some(old) = self.slots[victim].take() {
                    debug!(
                        peer = %old.peer_node_id(),
                        session_id = %old.local_session_id(),
                        "evicting least recently active session"
                    );
                    on_evict(&old);
                }
                victim
            }
        };

        self.slots[index] = Some(PeerConnectionState::new(
            peer_node_id,
            peer_session_id,
            local_session_id,
            now_ms,
        ));
        Ok(index)
    }

    fn least_recently_active(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|state| (index, state.last_activity_ms()))
            })
            .min_by_key(|(_, activity)| *activity)
            .map(|(index, _)| index)
    }

    /// Refresh a session's activity timestamp.
    pub fn mark_active(&mut self, index: usize, now_ms: u64) {
        if let Some(state) = self.get_mut(index) {
            state.touch(now_ms);
        }
    }

    /// Remove a session, invoking `on_expire` with its final state first.
    pub fn mark_expired<F>(&mut self, index: usize, on_expire: F)
    where
        F: FnOnce(&PeerConnectionState),
    {
        if let Some(state) = self.slots.get_mut(index).and_then(Option::take) {
            on_expire(&state);
        }
    }

    /// Remove every session idle longer than `max_idle_ms`, invoking
    /// `on_expire` for each.
    pub fn expire_inactive<F>(&mut self, max_idle_ms: u64, now_ms: u64, mut on_expire: F)
    where
        F: FnMut(&PeerConnectionState),
    {
        for slot in &mut self.slots {
            if slot
                .as_ref()
                .is_some_and(|state| state.is_idle(now_ms, max_idle_ms))
            {
                if let Some(state) = slot.take() {
                    on_expire(&state);
                }
            }
        }
    }
}

// ============================================================================
// Unauthenticated Sessions
// ============================================================================

/// Fixed-capacity table of unauthenticated sessions, keyed by peer
/// address. Recycles the least recently active slot when full; recycling
/// is silent (no expiry callback).
pub struct UnauthenticatedSessions {
    slots: Vec<Option<UnauthenticatedSession>>,
}

impl UnauthenticatedSessions {
    /// Create a table with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table has no occupied slots.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Access a slot by index.
    pub fn get(&self, index: usize) -> Option<&UnauthenticatedSession> {
        self.slots.get(index)?.as_ref()
    }

    /// Mutably access a slot by index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut UnauthenticatedSession> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Find the session for a peer address.
    pub fn find(&self, peer_address: &PeerAddress) -> Option<usize> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.as_ref()
                .filter(|session| session.peer_address() == peer_address)
                .map(|_| index)
        })
    }

    /// Find the session for a peer address, allocating one if absent.
    ///
    /// Returns `None` only when the table has zero capacity.
    pub fn find_or_allocate(&mut self, peer_address: PeerAddress, now_ms: u64) -> Option<usize> {
        if let Some(index) = self.find(&peer_address) {
            return Some(index);
        }

        let index = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(free) => free,
            None => {
                let victim = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(index, slot)| {
                        slot.as_ref().map(|s| (index, s.last_activity_ms()))
                    })
                    .min_by_key(|(_, activity)| *activity)
                    .map(|(index, _)| index)?;
                debug!(
                    old = %self.slots[victim].as_ref().map(|s| *s.peer_address()).unwrap_or_default(),
                    new = %peer_address,
                    "recycling unauthenticated session"
                );
                victim
            }
        };

        self.slots[index] = Some(UnauthenticatedSession::new(peer_address, now_ms));
        Some(index)
    }

    /// Refresh a session's activity timestamp.
    pub fn mark_active(&mut self, index: usize, now_ms: u64) {
        if let Some(session) = self.get_mut(index) {
            session.touch(now_ms);
        }
    }
}
