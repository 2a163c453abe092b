//! Peer addressing and identity types.
//!
//! A `PeerAddress` identifies the far end of a datagram exchange on one of
//! the supported transports. Session tables key unauthenticated traffic by
//! peer address; authenticated sessions track the address only for routing
//! and update it when a peer roams.

use std::fmt;
use std::net::IpAddr;

/// Network interface identifier for scoped addresses (0 = unspecified).
pub type InterfaceId = u32;

/// Transport kind carried by a [`PeerAddress`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Undefined,
    Udp,
    Tcp,
    Ble,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Undefined => "undefined",
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Ble => "ble",
        };
        write!(f, "{}", name)
    }
}

/// Address of a remote peer, tagged by transport kind.
///
/// Two addresses are equal iff the kind and every kind-dependent field
/// match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    /// No address known yet.
    Undefined,
    /// UDP endpoint, optionally scoped to a local interface.
    Udp {
        ip: IpAddr,
        port: u16,
        interface: InterfaceId,
    },
    /// TCP endpoint.
    Tcp { ip: IpAddr, port: u16 },
    /// BLE connection, identified by the platform connection handle.
    Ble { connection_id: u16 },
}

impl PeerAddress {
    /// UDP address without interface scoping.
    pub fn udp(ip: IpAddr, port: u16) -> Self {
        PeerAddress::Udp {
            ip,
            port,
            interface: 0,
        }
    }

    /// TCP address.
    pub fn tcp(ip: IpAddr, port: u16) -> Self {
        PeerAddress::Tcp { ip, port }
    }

    /// BLE address from a connection handle.
    pub fn ble(connection_id: u16) -> Self {
        PeerAddress::Ble { connection_id }
    }

    /// The transport kind of this address.
    pub fn kind(&self) -> TransportKind {
        match self {
            PeerAddress::Undefined => TransportKind::Undefined,
            PeerAddress::Udp { .. } => TransportKind::Udp,
            PeerAddress::Tcp { .. } => TransportKind::Tcp,
            PeerAddress::Ble { .. } => TransportKind::Ble,
        }
    }

    /// Whether this is an IP-based address (UDP or TCP).
    pub fn is_ip(&self) -> bool {
        matches!(self, PeerAddress::Udp { .. } | PeerAddress::Tcp { .. })
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        PeerAddress::Undefined
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddress::Undefined => write!(f, "undefined"),
            PeerAddress::Udp {
                ip,
                port,
                interface,
            } => {
                if *interface == 0 {
                    write!(f, "udp:{}:{}", ip, port)
                } else {
                    write!(f, "udp:{}:{}%{}", ip, port, interface)
                }
            }
            PeerAddress::Tcp { ip, port } => write!(f, "tcp:{}:{}", ip, port),
            PeerAddress::Ble { connection_id } => write!(f, "ble:{}", connection_id),
        }
    }
}

/// Opaque 64-bit node identifier.
///
/// The reserved value [`NodeId::UNDEFINED`] marks "no peer identity yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Sentinel for a node without an assigned identity.
    pub const UNDEFINED: NodeId = NodeId(0);

    /// Create from a raw u64.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the undefined sentinel.
    pub fn is_undefined(&self) -> bool {
        *self == Self::UNDEFINED
    }

    /// Convert to little-endian wire bytes.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Create from little-endian wire bytes.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// 16-bit session identifier.
///
/// Each direction of a session has its own: the local id addresses us, the
/// peer id goes into the packet header of outbound messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionId(u16);

impl SessionId {
    /// Create from a raw u16.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw u16 value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Convert to little-endian wire bytes.
    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Create from little-endian wire bytes.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
