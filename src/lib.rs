//! emberlink: secure session layer of a smart-home networking stack.
//!
//! Maintains authenticated, encrypted sessions between a local node and
//! remote peers over unreliable datagram transports. Outbound messages
//! are framed with a packet header, a monotonic counter, and a MIC;
//! inbound datagrams are validated against per-session replay windows.
//! Session lifecycle (creation via pairing, activity tracking, timed
//! expiry, fabric-scoped revocation) is driven by the embedder's event
//! loop through the [`manager::SecureSessionManager`] entry points.

pub mod address;
pub mod config;
pub mod counter;
pub mod crypto;
pub mod delegate;
pub mod env;
pub mod error;
pub mod fabric;
pub mod manager;
pub mod pairing;
pub mod session;
pub mod tables;
pub mod transport;
pub mod wire;

// Re-export addressing types
pub use address::{InterfaceId, NodeId, PeerAddress, SessionId, TransportKind};

// Re-export fabric types
pub use fabric::{FabricDirectory, FabricIndex};

// Re-export configuration
pub use config::{
    SessionConfig, MAX_FABRICS, MAX_MESSAGE_SIZE, MAX_PEER_CONNECTIONS,
    MAX_UNAUTHENTICATED_SESSIONS, PEER_CONNECTION_TIMEOUT_MS, TIMEOUT_CHECK_FREQUENCY_MS,
};

// Re-export counter types
pub use counter::{CounterError, LocalCounter, PeerCounter, REPLAY_WINDOW_BITS};

// Re-export crypto types
pub use crypto::{CryptoError, SecureSession, SessionRole, TAG_SIZE};

// Re-export session types
pub use session::{PeerConnectionState, SessionHandle, UnauthenticatedSession};

// Re-export table types
pub use tables::{PeerConnections, UnauthenticatedSessions};

// Re-export wire types
pub use wire::{PacketFlags, PacketHeader, PayloadHeader, WireError};

// Re-export boundary traits
pub use delegate::{CounterSyncHandler, DuplicateMessage, SessionDelegate};
pub use env::{SystemLayer, TimerToken};
pub use pairing::PairingSession;
pub use transport::TransportMux;

// Re-export manager types
pub use error::SessionError;
pub use manager::{
    ManagerState, PreparedMessage, SecureSessionManager, EXPIRY_TIMER_TOKEN,
};
