//! Periodic expiry sweep.

use super::{ManagerState, SecureSessionManager};
use tracing::info;

impl SecureSessionManager {
    /// Expiry timer callback.
    ///
    /// Called by the embedder when the [`EXPIRY_TIMER_TOKEN`](super::EXPIRY_TIMER_TOKEN)
    /// one-shot fires. Sweeps idle authenticated sessions when eviction is
    /// enabled, then re-registers the timer. Unauthenticated sessions are
    /// not swept; LRU recycling bounds them.
    pub fn handle_expiry_timer(&mut self) {
        if self.state != ManagerState::Initialized {
            return;
        }

        // sweeping is gated until rekeying exists: an evicted peer could
        // otherwise never re-establish without re-pairing
        if self.config.session_eviction {
            let max_idle_ms = self.config.peer_connection_timeout_ms;
            let now_ms = self.now_ms();
            let Self {
                peer_connections,
                delegate,
                transport,
                ..
            } = self;
            peer_connections.expire_inactive(max_idle_ms, now_ms, |state| {
                info!(
                    peer = %state.peer_node_id(),
                    session_id = %state.local_session_id(),
                    idle_ms = now_ms.saturating_sub(state.last_activity_ms()),
                    "inactive secure session expired"
                );
                if let Some(callback) = delegate.as_mut() {
                    callback.on_connection_expired(state.handle());
                }
                if let Some(transport) = transport.as_mut() {
                    transport.disconnect(state.peer_address());
                }
            });
        }

        self.schedule_expiry_timer();
    }
}
