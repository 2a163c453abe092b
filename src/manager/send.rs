//! Outbound message framing and transmission.

use super::{ManagerState, PreparedMessage, SecureSessionManager};
use crate::config::MAX_MESSAGE_SIZE;
use crate::error::SessionError;
use crate::session::SessionHandle;
use crate::wire::{PacketHeader, PayloadHeader, SECURITY_SCHEME_CHACHA20POLY1305};
use tracing::{debug, warn};

impl SecureSessionManager {
    /// Frame a message for the wire.
    ///
    /// For an authenticated session the payload header is encoded in front
    /// of the message, both are encrypted under the session keys with the
    /// packet header as AAD, and the session send counter advances; for
    /// control messages and unauthenticated sessions everything stays in
    /// the clear and the applicable unencrypted counter advances. The
    /// returned buffer is complete and can be sent any number of times.
    pub fn prepare_message(
        &mut self,
        session: &SessionHandle,
        payload_header: PayloadHeader,
        message: Vec<u8>,
    ) -> Result<PreparedMessage, SessionError> {
        if self.state != ManagerState::Initialized {
            return Err(SessionError::IncorrectState);
        }

        let mut packet_header = PacketHeader::default();
        if payload_header.is_control_message() {
            packet_header.flags.control_message = true;
        }

        match session {
            SessionHandle::Authenticated { .. } => {
                let index = self
                    .resolve_authenticated(session)
                    .ok_or(SessionError::NotConnected)?;
                let state = self
                    .peer_connections
                    .get_mut(index)
                    .ok_or(SessionError::NotConnected)?;
                packet_header.session_id = state.peer_session_id();

                if packet_header.flags.control_message {
                    // control messages ride the global unencrypted counter
                    let counter = self.global_unencrypted_counter.value();
                    self.global_unencrypted_counter.advance()?;
                    packet_header.message_counter = counter;

                    let mut data = packet_header.encode();
                    data.extend_from_slice(&payload_header.encode());
                    data.extend_from_slice(&message);
                    debug!(
                        peer = %state.peer_node_id(),
                        counter,
                        msg_type = payload_header.message_type,
                        "built plaintext control message"
                    );
                    Ok(PreparedMessage { data })
                } else {
                    let counter = state.send_counter().value();
                    state.send_counter_mut().advance()?;
                    packet_header.flags.encrypted = true;
                    packet_header.security_flags = SECURITY_SCHEME_CHACHA20POLY1305;
                    packet_header.message_counter = counter;

                    let mut plaintext = payload_header.encode();
                    plaintext.extend_from_slice(&message);
                    let ciphertext = state.secure_session().encrypt(&plaintext, &packet_header)?;

                    let mut data = packet_header.encode();
                    data.extend_from_slice(&ciphertext);
                    debug!(
                        peer = %state.peer_node_id(),
                        counter,
                        msg_type = payload_header.message_type,
                        protocol_id = payload_header.protocol_id,
                        exchange_id = payload_header.exchange_id,
                        "built encrypted message"
                    );
                    Ok(PreparedMessage { data })
                }
            }
            SessionHandle::Unauthenticated { peer_address } => {
                let index = self
                    .unauthenticated
                    .find(peer_address)
                    .ok_or(SessionError::NotConnected)?;
                let session_state = self
                    .unauthenticated
                    .get_mut(index)
                    .ok_or(SessionError::NotConnected)?;

                let counter = session_state.send_counter().value();
                session_state.send_counter_mut().advance()?;
                packet_header.message_counter = counter;

                let mut data = packet_header.encode();
                data.extend_from_slice(&payload_header.encode());
                data.extend_from_slice(&message);
                debug!(
                    peer = %peer_address,
                    counter,
                    msg_type = payload_header.message_type,
                    "built plaintext message"
                );
                Ok(PreparedMessage { data })
            }
        }
    }

    /// Send a prepared buffer to the session's current peer address.
    ///
    /// Marks the session active and hands a copy of the buffer to the
    /// transport, so callers can retain the prepared message for
    /// retransmission.
    pub fn send_prepared(
        &mut self,
        session: &SessionHandle,
        message: &PreparedMessage,
    ) -> Result<(), SessionError> {
        if self.state != ManagerState::Initialized {
            return Err(SessionError::IncorrectState);
        }
        if message.is_empty() {
            return Err(SessionError::InvalidArgument("prepared message is empty"));
        }
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(SessionError::InvalidMessageLength {
                max: MAX_MESSAGE_SIZE,
                got: message.len(),
            });
        }

        let now_ms = self.now_ms();
        let destination = match session {
            SessionHandle::Authenticated { .. } => {
                let index = match self.resolve_authenticated(session) {
                    Some(index) => index,
                    None => {
                        warn!("could not find a valid session for send");
                        return Err(SessionError::NotConnected);
                    }
                };
                self.peer_connections.mark_active(index, now_ms);
                let state = self
                    .peer_connections
                    .get(index)
                    .ok_or(SessionError::NotConnected)?;
                debug!(
                    peer = %state.peer_node_id(),
                    counter = message.message_counter(),
                    at_ms = now_ms,
                    "sending encrypted message"
                );
                *state.peer_address()
            }
            SessionHandle::Unauthenticated { peer_address } => {
                let index = self
                    .unauthenticated
                    .find(peer_address)
                    .ok_or(SessionError::NotConnected)?;
                self.unauthenticated.mark_active(index, now_ms);
                debug!(
                    peer = %peer_address,
                    counter = message.message_counter(),
                    at_ms = now_ms,
                    "sending plaintext message"
                );
                *peer_address
            }
        };

        let transport = self.transport.as_mut().ok_or(SessionError::IncorrectState)?;
        transport.send(&destination, message.data().to_vec())
    }
}
