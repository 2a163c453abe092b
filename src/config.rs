//! Session manager configuration.
//!
//! Compile-time defaults live here as constants; deployments that load a
//! YAML configuration file override them through [`SessionConfig`], which
//! follows the `session.*` section of the stack configuration:
//!
//! ```yaml
//! session:
//!   max_sessions: 16
//!   peer_connection_timeout_ms: 600000
//!   session_eviction: false
//! ```

use serde::{Deserialize, Serialize};

/// Default capacity of the authenticated session table.
pub const MAX_PEER_CONNECTIONS: usize = 16;

/// Default capacity of the unauthenticated session table.
pub const MAX_UNAUTHENTICATED_SESSIONS: usize = 4;

/// Default idle timeout before an authenticated session is reclaimable.
pub const PEER_CONNECTION_TIMEOUT_MS: u64 = 600_000;

/// Default period of the expiry sweep timer.
pub const TIMEOUT_CHECK_FREQUENCY_MS: u64 = 5_000;

/// Maximum provisioned fabrics; valid fabric indices are `1..=MAX_FABRICS`.
pub const MAX_FABRICS: u8 = 16;

/// Largest datagram the manager will hand to the transport. Prepared
/// messages are single contiguous buffers; anything larger is rejected
/// rather than fragmented.
pub const MAX_MESSAGE_SIZE: usize = 1280;

/// Session manager settings (`session.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Authenticated session table capacity (`session.max_sessions`).
    #[serde(default = "SessionConfig::default_max_sessions")]
    pub max_sessions: usize,

    /// Unauthenticated session table capacity
    /// (`session.max_unauthenticated_sessions`).
    #[serde(default = "SessionConfig::default_max_unauthenticated_sessions")]
    pub max_unauthenticated_sessions: usize,

    /// Idle timeout for the expiry sweep in milliseconds
    /// (`session.peer_connection_timeout_ms`).
    #[serde(default = "SessionConfig::default_peer_connection_timeout_ms")]
    pub peer_connection_timeout_ms: u64,

    /// Expiry sweep period in milliseconds
    /// (`session.timeout_check_frequency_ms`).
    #[serde(default = "SessionConfig::default_timeout_check_frequency_ms")]
    pub timeout_check_frequency_ms: u64,

    /// Whether the idle sweep actually evicts sessions
    /// (`session.session_eviction`). Off until rekeying exists; an evicted
    /// peer could otherwise never re-establish without re-pairing.
    #[serde(default = "SessionConfig::default_session_eviction")]
    pub session_eviction: bool,

    /// Whether control messages get their own counter validation
    /// (`session.control_message_counters`). Semantics pending; keep off.
    #[serde(default = "SessionConfig::default_control_message_counters")]
    pub control_message_counters: bool,

    /// Whether `new_pairing` tolerates UDP/TCP peer addresses with an
    /// unspecified IP instead of rejecting them
    /// (`session.allow_ip_pairing_address`).
    #[serde(default = "SessionConfig::default_allow_ip_pairing_address")]
    pub allow_ip_pairing_address: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_PEER_CONNECTIONS,
            max_unauthenticated_sessions: MAX_UNAUTHENTICATED_SESSIONS,
            peer_connection_timeout_ms: PEER_CONNECTION_TIMEOUT_MS,
            timeout_check_frequency_ms: TIMEOUT_CHECK_FREQUENCY_MS,
            session_eviction: false,
            control_message_counters: false,
            allow_ip_pairing_address: false,
        }
    }
}

impl SessionConfig {
    fn default_max_sessions() -> usize {
        MAX_PEER_CONNECTIONS
    }
    fn default_max_unauthenticated_sessions() -> usize {
        MAX_UNAUTHENTICATED_SESSIONS
    }
    fn default_peer_connection_timeout_ms() -> u64 {
        PEER_CONNECTION_TIMEOUT_MS
    }
    fn default_timeout_check_frequency_ms() -> u64 {
        TIMEOUT_CHECK_FREQUENCY_MS
    }
    fn default_session_eviction() -> bool {
        false
    }
    fn default_control_message_counters() -> bool {
        false
    }
    fn default_allow_ip_pairing_address() -> bool {
        false
    }

    /// Parse a `session.*` section from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_sessions, MAX_PEER_CONNECTIONS);
        assert_eq!(
            config.max_unauthenticated_sessions,
            MAX_UNAUTHENTICATED_SESSIONS
        );
        assert!(!config.session_eviction);
        assert!(!config.control_message_counters);
        assert!(!config.allow_ip_pairing_address);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = SessionConfig::from_yaml("max_sessions: 32\nsession_eviction: true\n")
            .expect("should parse");
        assert_eq!(config.max_sessions, 32);
        assert!(config.session_eviction);
        assert_eq!(
            config.peer_connection_timeout_ms,
            PEER_CONNECTION_TIMEOUT_MS
        );
    }

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        let config = SessionConfig::from_yaml("{}").expect("should parse");
        assert_eq!(
            config.timeout_check_frequency_ms,
            TIMEOUT_CHECK_FREQUENCY_MS
        );
    }
}
