//! Transport multiplexer seam.
//!
//! The transport layer owns the actual sockets (UDP, TCP, BLE) and
//! multiplexes them behind one send/disconnect surface. Inbound datagrams
//! flow the other way: the embedder wires the transport's receive path to
//! [`SecureSessionManager::on_datagram`](crate::manager::SecureSessionManager::on_datagram).

use crate::address::PeerAddress;
use crate::error::SessionError;

/// Downward interface to the transport multiplexer.
pub trait TransportMux {
    /// Send one datagram to a peer. The transport either accepts it
    /// synchronously or reports an error; there is no queueing here.
    fn send(&mut self, destination: &PeerAddress, data: Vec<u8>) -> Result<(), SessionError>;

    /// Tear down any transport-level state for a peer (e.g. close a BLE
    /// connection). Datagram transports may treat this as a no-op.
    fn disconnect(&mut self, peer: &PeerAddress);
}
