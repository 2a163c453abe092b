//! Crate-level error type.

use crate::address::SessionId;
use crate::counter::CounterError;
use crate::crypto::CryptoError;
use crate::wire::WireError;
use thiserror::Error;

/// Errors surfaced by the session manager.
///
/// API methods return these directly and make no state change on error.
/// Inbound-dispatch failures are logged and reported through
/// [`on_receive_error`](crate::delegate::SessionDelegate::on_receive_error)
/// instead of propagating.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("operation requires an initialized session manager")]
    IncorrectState,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("session table exhausted")]
    NoMemory,

    #[error("no session found for handle")]
    NotConnected,

    #[error("no key material for peer session id {0}")]
    KeyNotFoundFromPeer(SessionId),

    #[error("message too long: max {max}, got {got}")]
    InvalidMessageLength { max: usize, got: usize },

    #[error("transport send failed: {reason}")]
    SendFailed { reason: String },

    #[error("timer registration failed: {reason}")]
    TimerFailed { reason: String },

    #[error("counter synchronization failed: {reason}")]
    CounterSyncFailed { reason: String },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Counter(#[from] CounterError),
}
