//! The secure session manager.
//!
//! Owns both session tables and drives the whole session lifecycle:
//! pairing installs authenticated sessions, `prepare_message` /
//! `send_prepared` frame and emit outbound traffic, `on_datagram`
//! validates and dispatches inbound traffic, and a periodic timer sweeps
//! idle sessions.
//!
//! The manager is a single-threaded state machine. The embedder's event
//! loop delivers datagrams, timer callbacks, and API calls in FIFO order;
//! nothing here takes locks or yields. Collaborators are injected at
//! [`init`](SecureSessionManager::init) and dropped at
//! [`shutdown`](SecureSessionManager::shutdown).

mod dispatch;
mod pairing;
mod send;
mod timeout;

use crate::address::{NodeId, PeerAddress, SessionId};
use crate::config::SessionConfig;
use crate::counter::LocalCounter;
use crate::delegate::{CounterSyncHandler, SessionDelegate};
use crate::env::{SystemLayer, TimerToken};
use crate::error::SessionError;
use crate::fabric::FabricDirectory;
use crate::session::SessionHandle;
use crate::tables::{PeerConnections, UnauthenticatedSessions};
use crate::transport::TransportMux;
use crate::wire::PacketHeader;
use std::fmt;
use tracing::{debug, warn};

/// Timer token under which the expiry sweep registers with the system
/// layer. When it fires, the embedder calls
/// [`handle_expiry_timer`](SecureSessionManager::handle_expiry_timer).
pub const EXPIRY_TIMER_TOKEN: TimerToken = TimerToken::new(1);

/// Manager lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Created but not initialized, or shut down.
    NotReady,
    /// Fully operational.
    Initialized,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::NotReady => write!(f, "not_ready"),
            ManagerState::Initialized => write!(f, "initialized"),
        }
    }
}

/// A fully framed wire message produced by
/// [`prepare_message`](SecureSessionManager::prepare_message): packet
/// header plus (possibly encrypted) payload, ready for the transport.
///
/// The buffer is a single contiguous allocation; oversized messages are
/// rejected at send rather than fragmented.
pub struct PreparedMessage {
    data: Vec<u8>,
}

impl PreparedMessage {
    /// The framed wire bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total framed length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The message counter this buffer was framed with.
    ///
    /// Recovered from the prepared packet header; retransmission logic
    /// uses it to correlate acks.
    pub fn message_counter(&self) -> u32 {
        match PacketHeader::decode_and_consume(&self.data) {
            Ok((header, _)) => header.message_counter,
            Err(err) => {
                warn!(error = %err, "failed to decode prepared message header");
                0
            }
        }
    }
}

/// The secure session manager.
///
/// One instance per node, threaded to its collaborators explicitly; any
/// process-wide accessor is the embedder's business.
pub struct SecureSessionManager {
    /// Lifecycle state.
    state: ManagerState,
    /// Effective configuration, fixed at construction.
    config: SessionConfig,
    /// Host clock and timers. Present while initialized.
    env: Option<Box<dyn SystemLayer>>,
    /// Downward transport. Present while initialized.
    transport: Option<Box<dyn TransportMux>>,
    /// Provisioned fabric directory. Present while initialized.
    fabrics: Option<Box<dyn FabricDirectory>>,
    /// Counter synchronization service. Present while initialized.
    counter_sync: Option<Box<dyn CounterSyncHandler>>,
    /// Upward delegate, registered separately from `init`.
    delegate: Option<Box<dyn SessionDelegate>>,
    /// Authenticated sessions.
    peer_connections: PeerConnections,
    /// Unauthenticated sessions.
    unauthenticated: UnauthenticatedSessions,
    /// Send counter for unencrypted messages on authenticated sessions.
    global_unencrypted_counter: LocalCounter,
}

impl SecureSessionManager {
    /// Create a manager in the `NotReady` state. Table capacities are
    /// taken from the configuration and fixed for the manager's lifetime.
    pub fn new(config: SessionConfig) -> Self {
        let peer_connections = PeerConnections::new(config.max_sessions);
        let unauthenticated = UnauthenticatedSessions::new(config.max_unauthenticated_sessions);
        Self {
            state: ManagerState::NotReady,
            config,
            env: None,
            transport: None,
            fabrics: None,
            counter_sync: None,
            delegate: None,
            peer_connections,
            unauthenticated,
            global_unencrypted_counter: LocalCounter::random(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Effective configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of live authenticated sessions.
    pub fn session_count(&self) -> usize {
        self.peer_connections.len()
    }

    /// Register the upward delegate. May be called before `init`.
    pub fn set_delegate(&mut self, delegate: Box<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Wire up collaborators and start the expiry timer.
    ///
    /// The embedder must route the transport's inbound datagrams to
    /// [`on_datagram`](Self::on_datagram) and the
    /// [`EXPIRY_TIMER_TOKEN`] timer to
    /// [`handle_expiry_timer`](Self::handle_expiry_timer).
    pub fn init(
        &mut self,
        env: Box<dyn SystemLayer>,
        transport: Box<dyn TransportMux>,
        fabrics: Box<dyn FabricDirectory>,
        counter_sync: Box<dyn CounterSyncHandler>,
    ) -> Result<(), SessionError> {
        if self.state != ManagerState::NotReady {
            return Err(SessionError::IncorrectState);
        }
        if self.config.max_sessions == 0 || self.config.max_unauthenticated_sessions == 0 {
            return Err(SessionError::InvalidArgument(
                "session table capacities must be nonzero",
            ));
        }

        self.env = Some(env);
        self.transport = Some(transport);
        self.fabrics = Some(fabrics);
        self.counter_sync = Some(counter_sync);
        self.global_unencrypted_counter = LocalCounter::random();
        self.state = ManagerState::Initialized;

        self.schedule_expiry_timer();
        Ok(())
    }

    /// Cancel the expiry timer, drop collaborators, and return to
    /// `NotReady`. Session table contents survive a shutdown.
    pub fn shutdown(&mut self) {
        if let Some(env) = self.env.as_mut() {
            env.cancel_timer(EXPIRY_TIMER_TOKEN);
        }
        self.env = None;
        self.transport = None;
        self.fabrics = None;
        self.counter_sync = None;
        self.delegate = None;
        self.state = ManagerState::NotReady;
    }

    /// Look up the handle of a live authenticated session.
    pub fn session_handle(
        &self,
        peer_node_id: NodeId,
        local_session_id: SessionId,
    ) -> Option<SessionHandle> {
        let index =
            self.peer_connections
                .find_by_local_key(Some(peer_node_id), local_session_id, 0)?;
        Some(self.peer_connections.get(index)?.handle())
    }

    /// Force a session's peer counter to a known baseline.
    ///
    /// Called by the counter-sync service once the peer's counter has been
    /// learned; the service then re-submits its queued datagrams through
    /// [`on_datagram`](Self::on_datagram).
    pub fn mark_counter_synchronized(
        &mut self,
        session: &SessionHandle,
        counter: u32,
    ) -> Result<(), SessionError> {
        if self.state != ManagerState::Initialized {
            return Err(SessionError::IncorrectState);
        }
        let index = self
            .resolve_authenticated(session)
            .ok_or(SessionError::NotConnected)?;
        let state = self
            .peer_connections
            .get_mut(index)
            .ok_or(SessionError::NotConnected)?;
        state.peer_counter_mut().set_counter(counter);
        debug!(peer = %state.peer_node_id(), counter, "peer message counter synchronized");
        Ok(())
    }

    /// Current monotonic time from the system layer.
    fn now_ms(&self) -> u64 {
        self.env
            .as_ref()
            .map(|env| env.monotonic_time_ms())
            .unwrap_or(0)
    }

    /// Resolve an authenticated handle to its table slot.
    fn resolve_authenticated(&self, session: &SessionHandle) -> Option<usize> {
        match session {
            SessionHandle::Authenticated {
                peer_node_id,
                local_session_id,
                ..
            } => self
                .peer_connections
                .find_by_local_key(Some(*peer_node_id), *local_session_id, 0),
            SessionHandle::Unauthenticated { .. } => None,
        }
    }

    /// Register the one-shot expiry sweep timer.
    ///
    /// Failure to register is a programming error in the embedding, not a
    /// network condition, and is fatal.
    fn schedule_expiry_timer(&mut self) {
        let frequency = self.config.timeout_check_frequency_ms;
        let env = self
            .env
            .as_mut()
            .expect("system layer must be present while initialized");
        env.start_timer(frequency, EXPIRY_TIMER_TOKEN)
            .expect("failed to register session expiry timer");
    }

    /// Remove one authenticated session: notify upward, disconnect
    /// downward, free the slot.
    fn expire_slot(&mut self, index: usize) {
        let Self {
            peer_connections,
            delegate,
            transport,
            ..
        } = self;
        peer_connections.mark_expired(index, |state| {
            debug!(
                peer = %state.peer_node_id(),
                session_id = %state.local_session_id(),
                "marking secure session as expired"
            );
            if let Some(callback) = delegate.as_mut() {
                callback.on_connection_expired(state.handle());
            }
            if let Some(transport) = transport.as_mut() {
                transport.disconnect(state.peer_address());
            }
        });
    }

    /// Surface an inbound-dispatch error to the delegate.
    fn report_receive_error(&mut self, error: SessionError, peer_address: &PeerAddress) {
        if let Some(callback) = self.delegate.as_mut() {
            callback.on_receive_error(error, peer_address);
        }
    }
}

impl fmt::Debug for SecureSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSessionManager")
            .field("state", &self.state)
            .field("sessions", &self.peer_connections.len())
            .field("unauthenticated", &self.unauthenticated.len())
            .finish_non_exhaustive()
    }
}
