//! Wire format parsing and serialization.
//!
//! Every datagram starts with two concatenated headers. The packet header
//! is always in the clear and frames the message for session lookup and
//! counter validation. The payload header follows it on the wire but is
//! part of the ciphertext for encrypted messages.
//!
//! ## Packet Header
//!
//! ```text
//! [flags:2 LE][session_id:2 LE][message_counter:4 LE][security_flags:2 LE]
//! [source_node_id:8 LE, if flagged][destination_node_id:8 LE, if flagged]
//! ```
//!
//! The flags word carries a 4-bit protocol version in the top nibble and
//! flag bits in the low twelve.
//!
//! ## Payload Header
//!
//! ```text
//! [exchange_flags:1][message_type:1][exchange_id:2 LE][protocol_id:2 LE]
//! [vendor_id:2 LE, if flagged][ack_counter:4 LE, if flagged]
//! ```

use crate::address::{NodeId, SessionId};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Wire protocol version (4 high bits of the packet header flags word).
pub const PROTOCOL_VERSION: u8 = 0;

/// Size of the fixed packet header prefix (before optional node ids).
pub const PACKET_HEADER_MIN_SIZE: usize = 10;

/// Size of the fixed payload header prefix (before optional fields).
pub const PAYLOAD_HEADER_MIN_SIZE: usize = 6;

/// Size of an encoded node id.
pub const NODE_ID_SIZE: usize = 8;

/// Security flags value for unencrypted messages.
pub const SECURITY_SCHEME_NONE: u16 = 0x0000;

/// Security flags value selecting the ChaCha20-Poly1305 scheme.
pub const SECURITY_SCHEME_CHACHA20POLY1305: u16 = 0x0001;

/// Protocol id of the secure channel protocol (vendor 0).
pub const PROTOCOL_SECURE_CHANNEL: u16 = 0x0000;

/// Secure channel message type: counter synchronization request.
pub const MSG_COUNTER_SYNC_REQ: u8 = 0x00;

/// Secure channel message type: counter synchronization response.
pub const MSG_COUNTER_SYNC_RSP: u8 = 0x01;

const VERSION_SHIFT: u16 = 12;
const FLAGS_MASK: u16 = 0x0FFF;

// Packet header flag bits (low 12 bits of the flags word).
const FLAG_SOURCE_PRESENT: u16 = 0x0001;
const FLAG_DESTINATION_PRESENT: u16 = 0x0002;
const FLAG_ENCRYPTED: u16 = 0x0004;
const FLAG_CONTROL_MESSAGE: u16 = 0x0008;
const FLAG_VENDOR_RESERVED: u16 = 0x0010;

// Payload header exchange flag bits.
const EXCHANGE_FLAG_INITIATOR: u8 = 0x01;
const EXCHANGE_FLAG_ACK_PRESENT: u8 = 0x02;
const EXCHANGE_FLAG_NEEDS_ACK: u8 = 0x04;
const EXCHANGE_FLAG_VENDOR_PRESENT: u8 = 0x10;

/// Errors from header parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("unsupported header version: {0}")]
    UnsupportedVersion(u8),
}

// ============================================================================
// Packet Header
// ============================================================================

/// Packet header flag bits.
///
/// Node-id presence bits are derived from the optional fields of
/// [`PacketHeader`] at encode time and are not represented here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// Message payload is encrypted and carries a MIC.
    pub encrypted: bool,
    /// Message is internal to the secure channel protocol.
    pub control_message: bool,
    /// Reserved vendor flag, preserved verbatim.
    pub vendor_reserved: bool,
}

impl PacketFlags {
    fn to_bits(self) -> u16 {
        let mut bits = 0u16;
        if self.encrypted {
            bits |= FLAG_ENCRYPTED;
        }
        if self.control_message {
            bits |= FLAG_CONTROL_MESSAGE;
        }
        if self.vendor_reserved {
            bits |= FLAG_VENDOR_RESERVED;
        }
        bits
    }

    fn from_bits(bits: u16) -> Self {
        Self {
            encrypted: bits & FLAG_ENCRYPTED != 0,
            control_message: bits & FLAG_CONTROL_MESSAGE != 0,
            vendor_reserved: bits & FLAG_VENDOR_RESERVED != 0,
        }
    }
}

/// The clear framing header preceding every message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Flag bits (presence bits excluded, see [`PacketFlags`]).
    pub flags: PacketFlags,
    /// Session id the peer uses to address the destination.
    pub session_id: SessionId,
    /// Per-message monotonic counter.
    pub message_counter: u32,
    /// Encryption scheme selector, preserved verbatim.
    pub security_flags: u16,
    /// Sender node id, if carried on the wire.
    pub source_node_id: Option<NodeId>,
    /// Destination node id, if carried on the wire.
    pub destination_node_id: Option<NodeId>,
}

impl PacketHeader {
    /// Encoded size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut len = PACKET_HEADER_MIN_SIZE;
        if self.source_node_id.is_some() {
            len += NODE_ID_SIZE;
        }
        if self.destination_node_id.is_some() {
            len += NODE_ID_SIZE;
        }
        len
    }

    /// Serialize the header to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bits = self.flags.to_bits();
        if self.source_node_id.is_some() {
            bits |= FLAG_SOURCE_PRESENT;
        }
        if self.destination_node_id.is_some() {
            bits |= FLAG_DESTINATION_PRESENT;
        }
        let word = ((PROTOCOL_VERSION as u16) << VERSION_SHIFT) | bits;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&word.to_le_bytes());
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.extend_from_slice(&self.message_counter.to_le_bytes());
        buf.extend_from_slice(&self.security_flags.to_le_bytes());
        if let Some(id) = self.source_node_id {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        if let Some(id) = self.destination_node_id {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    /// Parse a header from the front of a datagram.
    ///
    /// Returns the header and the number of bytes consumed; the message
    /// body starts at that offset.
    pub fn decode_and_consume(data: &[u8]) -> Result<(Self, usize), WireError> {
        if data.len() < PACKET_HEADER_MIN_SIZE {
            return Err(WireError::MessageTooShort {
                expected: PACKET_HEADER_MIN_SIZE,
                got: data.len(),
            });
        }

        let word = u16::from_le_bytes([data[0], data[1]]);
        let version = (word >> VERSION_SHIFT) as u8;
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let bits = word & FLAGS_MASK;

        let session_id = SessionId::from_le_bytes([data[2], data[3]]);
        let message_counter = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let security_flags = u16::from_le_bytes([data[8], data[9]]);

        let mut offset = PACKET_HEADER_MIN_SIZE;
        let source_node_id = if bits & FLAG_SOURCE_PRESENT != 0 {
            Some(read_node_id(data, &mut offset)?)
        } else {
            None
        };
        let destination_node_id = if bits & FLAG_DESTINATION_PRESENT != 0 {
            Some(read_node_id(data, &mut offset)?)
        } else {
            None
        };

        Ok((
            Self {
                flags: PacketFlags::from_bits(bits),
                session_id,
                message_counter,
                security_flags,
                source_node_id,
                destination_node_id,
            },
            offset,
        ))
    }
}

fn read_node_id(data: &[u8], offset: &mut usize) -> Result<NodeId, WireError> {
    let end = *offset + NODE_ID_SIZE;
    if data.len() < end {
        return Err(WireError::MessageTooShort {
            expected: end,
            got: data.len(),
        });
    }
    let mut bytes = [0u8; NODE_ID_SIZE];
    bytes.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(NodeId::from_le_bytes(bytes))
}

// ============================================================================
// Payload Header
// ============================================================================

/// The exchange-layer header carried inside every message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Sender is the exchange initiator.
    pub initiator: bool,
    /// Sender requests an acknowledgement for this message.
    pub needs_ack: bool,
    /// Protocol-specific message type.
    pub message_type: u8,
    /// Exchange id pairing requests with responses.
    pub exchange_id: u16,
    /// Protocol number within the vendor namespace.
    pub protocol_id: u16,
    /// Vendor id qualifying `protocol_id`, if not the standard vendor.
    pub vendor_id: Option<u16>,
    /// Counter being acknowledged, if this message carries an ack.
    pub ack_counter: Option<u32>,
}

impl PayloadHeader {
    /// Whether this message is internal to the secure channel protocol.
    ///
    /// Control messages get the control bit in the packet header and are
    /// excluded from the data-message counter machinery.
    pub fn is_control_message(&self) -> bool {
        self.vendor_id.is_none()
            && self.protocol_id == PROTOCOL_SECURE_CHANNEL
            && matches!(self.message_type, MSG_COUNTER_SYNC_REQ | MSG_COUNTER_SYNC_RSP)
    }

    /// Encoded size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut len = PAYLOAD_HEADER_MIN_SIZE;
        if self.vendor_id.is_some() {
            len += 2;
        }
        if self.ack_counter.is_some() {
            len += 4;
        }
        len
    }

    /// Serialize the header to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.initiator {
            flags |= EXCHANGE_FLAG_INITIATOR;
        }
        if self.ack_counter.is_some() {
            flags |= EXCHANGE_FLAG_ACK_PRESENT;
        }
        if self.needs_ack {
            flags |= EXCHANGE_FLAG_NEEDS_ACK;
        }
        if self.vendor_id.is_some() {
            flags |= EXCHANGE_FLAG_VENDOR_PRESENT;
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(flags);
        buf.push(self.message_type);
        buf.extend_from_slice(&self.exchange_id.to_le_bytes());
        buf.extend_from_slice(&self.protocol_id.to_le_bytes());
        if let Some(vendor) = self.vendor_id {
            buf.extend_from_slice(&vendor.to_le_bytes());
        }
        if let Some(ack) = self.ack_counter {
            buf.extend_from_slice(&ack.to_le_bytes());
        }
        buf
    }

    /// Parse a header from the front of a message body.
    ///
    /// Returns the header and the number of bytes consumed; the
    /// application payload starts at that offset.
    pub fn decode_and_consume(data: &[u8]) -> Result<(Self, usize), WireError> {
        if data.len() < PAYLOAD_HEADER_MIN_SIZE {
            return Err(WireError::MessageTooShort {
                expected: PAYLOAD_HEADER_MIN_SIZE,
                got: data.len(),
            });
        }

        let flags = data[0];
        let message_type = data[1];
        let exchange_id = u16::from_le_bytes([data[2], data[3]]);
        let protocol_id = u16::from_le_bytes([data[4], data[5]]);

        let mut offset = PAYLOAD_HEADER_MIN_SIZE;
        let vendor_id = if flags & EXCHANGE_FLAG_VENDOR_PRESENT != 0 {
            if data.len() < offset + 2 {
                return Err(WireError::MessageTooShort {
                    expected: offset + 2,
                    got: data.len(),
                });
            }
            let vendor = u16::from_le_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            Some(vendor)
        } else {
            None
        };
        let ack_counter = if flags & EXCHANGE_FLAG_ACK_PRESENT != 0 {
            if data.len() < offset + 4 {
                return Err(WireError::MessageTooShort {
                    expected: offset + 4,
                    got: data.len(),
                });
            }
            let ack = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            offset += 4;
            Some(ack)
        } else {
            None
        };

        Ok((
            Self {
                initiator: flags & EXCHANGE_FLAG_INITIATOR != 0,
                needs_ack: flags & EXCHANGE_FLAG_NEEDS_ACK != 0,
                message_type,
                exchange_id,
                protocol_id,
                vendor_id,
                ack_counter,
            },
            offset,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packet_header_layout() {
        let header = PacketHeader {
            flags: PacketFlags {
                encrypted: true,
                ..Default::default()
            },
            session_id: SessionId::new(0x1234),
            message_counter: 0xAABBCCDD,
            security_flags: SECURITY_SCHEME_CHACHA20POLY1305,
            source_node_id: None,
            destination_node_id: None,
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), PACKET_HEADER_MIN_SIZE);
        // flags word: version 0, encrypted bit only
        assert_eq!(bytes[0], 0x04);
        assert_eq!(bytes[1], 0x00);
        // session id, little endian
        assert_eq!(bytes[2], 0x34);
        assert_eq!(bytes[3], 0x12);
        // counter, little endian
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        // security flags
        assert_eq!(&bytes[8..10], &[0x01, 0x00]);
    }

    #[test]
    fn test_packet_header_optional_node_ids() {
        let header = PacketHeader {
            source_node_id: Some(NodeId::new(0x0102030405060708)),
            destination_node_id: Some(NodeId::new(0x1112131415161718)),
            ..Default::default()
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), PACKET_HEADER_MIN_SIZE + 2 * NODE_ID_SIZE);
        // presence bits set
        assert_eq!(bytes[0] & 0x03, 0x03);

        let (parsed, consumed) = PacketHeader::decode_and_consume(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_packet_header_too_short() {
        let result = PacketHeader::decode_and_consume(&[0u8; 9]);
        assert_eq!(
            result,
            Err(WireError::MessageTooShort {
                expected: PACKET_HEADER_MIN_SIZE,
                got: 9
            })
        );

        // source-present flag but no node id bytes
        let mut bytes = PacketHeader::default().encode();
        bytes[0] |= 0x01;
        assert!(matches!(
            PacketHeader::decode_and_consume(&bytes),
            Err(WireError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_packet_header_wrong_version() {
        let mut bytes = PacketHeader::default().encode();
        bytes[1] |= 0x30; // version nibble = 3
        assert_eq!(
            PacketHeader::decode_and_consume(&bytes),
            Err(WireError::UnsupportedVersion(3))
        );
    }

    #[test]
    fn test_packet_header_consumes_prefix_only() {
        let header = PacketHeader {
            message_counter: 42,
            ..Default::default()
        };
        let mut datagram = header.encode();
        datagram.extend_from_slice(b"payload");

        let (parsed, consumed) = PacketHeader::decode_and_consume(&datagram).unwrap();
        assert_eq!(parsed.message_counter, 42);
        assert_eq!(&datagram[consumed..], b"payload");
    }

    #[test]
    fn test_payload_header_layout() {
        let header = PayloadHeader {
            initiator: true,
            needs_ack: true,
            message_type: 0x20,
            exchange_id: 0x0A0B,
            protocol_id: 0x0001,
            vendor_id: None,
            ack_counter: None,
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), PAYLOAD_HEADER_MIN_SIZE);
        assert_eq!(bytes[0], EXCHANGE_FLAG_INITIATOR | EXCHANGE_FLAG_NEEDS_ACK);
        assert_eq!(bytes[1], 0x20);
        assert_eq!(&bytes[2..4], &[0x0B, 0x0A]);
        assert_eq!(&bytes[4..6], &[0x01, 0x00]);
    }

    #[test]
    fn test_payload_header_optional_fields() {
        let header = PayloadHeader {
            vendor_id: Some(0xFFF1),
            ack_counter: Some(0x01020304),
            ..Default::default()
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), PAYLOAD_HEADER_MIN_SIZE + 6);
        assert_ne!(bytes[0] & EXCHANGE_FLAG_VENDOR_PRESENT, 0);
        assert_ne!(bytes[0] & EXCHANGE_FLAG_ACK_PRESENT, 0);

        let (parsed, consumed) = PayloadHeader::decode_and_consume(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_payload_header_truncated_optionals() {
        let header = PayloadHeader {
            ack_counter: Some(7),
            ..Default::default()
        };
        let bytes = header.encode();
        assert!(matches!(
            PayloadHeader::decode_and_consume(&bytes[..bytes.len() - 1]),
            Err(WireError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_control_message_detection() {
        let sync_req = PayloadHeader {
            protocol_id: PROTOCOL_SECURE_CHANNEL,
            message_type: MSG_COUNTER_SYNC_REQ,
            ..Default::default()
        };
        assert!(sync_req.is_control_message());

        let echo = PayloadHeader {
            protocol_id: PROTOCOL_SECURE_CHANNEL,
            message_type: 0x42,
            ..Default::default()
        };
        assert!(!echo.is_control_message());

        let vendor_sync = PayloadHeader {
            protocol_id: PROTOCOL_SECURE_CHANNEL,
            message_type: MSG_COUNTER_SYNC_REQ,
            vendor_id: Some(0xFFF1),
            ..Default::default()
        };
        assert!(!vendor_sync.is_control_message());
    }

    fn arbitrary_packet_header() -> impl Strategy<Value = PacketHeader> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<u16>(),
            any::<u32>(),
            any::<u16>(),
            proptest::option::of(any::<u64>()),
            proptest::option::of(any::<u64>()),
        )
            .prop_map(
                |(encrypted, control, vendor, session, counter, security, src, dst)| {
                    PacketHeader {
                        flags: PacketFlags {
                            encrypted,
                            control_message: control,
                            vendor_reserved: vendor,
                        },
                        session_id: SessionId::new(session),
                        message_counter: counter,
                        security_flags: security,
                        source_node_id: src.map(NodeId::new),
                        destination_node_id: dst.map(NodeId::new),
                    }
                },
            )
    }

    fn arbitrary_payload_header() -> impl Strategy<Value = PayloadHeader> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<u8>(),
            any::<u16>(),
            any::<u16>(),
            proptest::option::of(any::<u16>()),
            proptest::option::of(any::<u32>()),
        )
            .prop_map(
                |(initiator, needs_ack, message_type, exchange, protocol, vendor, ack)| {
                    PayloadHeader {
                        initiator,
                        needs_ack,
                        message_type,
                        exchange_id: exchange,
                        protocol_id: protocol,
                        vendor_id: vendor,
                        ack_counter: ack,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn packet_header_round_trip(header in arbitrary_packet_header()) {
            let bytes = header.encode();
            let (parsed, consumed) = PacketHeader::decode_and_consume(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(parsed, header);
        }

        #[test]
        fn payload_header_round_trip(header in arbitrary_payload_header()) {
            let bytes = header.encode();
            let (parsed, consumed) = PayloadHeader::decode_and_consume(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(parsed, header);
        }
    }
}
