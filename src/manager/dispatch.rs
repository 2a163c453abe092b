//! Inbound datagram dispatch.

use super::{ManagerState, SecureSessionManager};
use crate::address::PeerAddress;
use crate::counter::CounterError;
use crate::delegate::DuplicateMessage;
use crate::error::SessionError;
use crate::wire::{PacketHeader, PayloadHeader};
use tracing::{debug, warn};

impl SecureSessionManager {
    /// Entry point for raw datagrams from the transport.
    ///
    /// Decodes the packet header and routes to the secure or plaintext
    /// path. Malformed or unverifiable traffic is logged and dropped,
    /// surfacing through `on_receive_error` where there is a session to
    /// blame; nothing here propagates back to the transport.
    pub fn on_datagram(&mut self, peer_address: &PeerAddress, data: Vec<u8>) {
        if self.state != ManagerState::Initialized {
            warn!(peer = %peer_address, "datagram received while not initialized, dropping");
            return;
        }

        let (packet_header, consumed) = match PacketHeader::decode_and_consume(&data) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(peer = %peer_address, error = %err, "failed to decode packet header, dropping");
                return;
            }
        };
        let message = data[consumed..].to_vec();

        if packet_header.flags.encrypted {
            self.secure_dispatch(packet_header, peer_address, message);
        } else {
            self.plaintext_dispatch(packet_header, peer_address, message);
        }
    }

    /// Dispatch an unencrypted datagram through the unauthenticated table.
    fn plaintext_dispatch(
        &mut self,
        packet_header: PacketHeader,
        peer_address: &PeerAddress,
        message: Vec<u8>,
    ) {
        let now_ms = self.now_ms();
        let Some(index) = self.unauthenticated.find_or_allocate(*peer_address, now_ms) else {
            warn!(peer = %peer_address, "unauthenticated session table exhausted, dropping");
            return;
        };

        let counter = packet_header.message_counter;
        let mut is_duplicate = DuplicateMessage::No;
        let Some(session) = self.unauthenticated.get(index) else {
            return;
        };
        match session.peer_counter().verify_or_trust_first(counter) {
            Ok(()) => {}
            Err(CounterError::DuplicateMessageReceived(value)) => {
                debug!(peer = %peer_address, counter = value, "received a duplicate message");
                is_duplicate = DuplicateMessage::Yes;
            }
            Err(err) => {
                warn!(peer = %peer_address, counter, error = %err, "message counter verification failed, dropping");
                self.report_receive_error(err.into(), peer_address);
                return;
            }
        }

        self.unauthenticated.mark_active(index, now_ms);

        let (payload_header, consumed) = match PayloadHeader::decode_and_consume(&message) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(peer = %peer_address, error = %err, "failed to decode payload header, dropping");
                return;
            }
        };

        if is_duplicate == DuplicateMessage::Yes && !payload_header.needs_ack {
            debug!(counter, "duplicate message without ack request, dropping");
            return;
        }

        let Some(session) = self.unauthenticated.get_mut(index) else {
            return;
        };
        session.peer_counter_mut().commit(counter);
        let handle = session.handle();

        let payload = message[consumed..].to_vec();
        if let Some(callback) = self.delegate.as_mut() {
            callback.on_message_received(
                &packet_header,
                &payload_header,
                handle,
                peer_address,
                is_duplicate,
                payload,
            );
        }
    }

    /// Dispatch an encrypted datagram through the authenticated table.
    fn secure_dispatch(
        &mut self,
        packet_header: PacketHeader,
        peer_address: &PeerAddress,
        message: Vec<u8>,
    ) {
        let now_ms = self.now_ms();
        let Some(index) = self
            .peer_connections
            .find_by_session_id(packet_header.session_id, 0)
        else {
            warn!(
                peer = %peer_address,
                session_id = %packet_header.session_id,
                "data received on an unknown session, dropping"
            );
            self.report_receive_error(
                SessionError::KeyNotFoundFromPeer(packet_header.session_id),
                peer_address,
            );
            return;
        };

        let counter = packet_header.message_counter;
        let control = packet_header.flags.control_message;
        // control-message counters are gated off until their semantics are
        // settled; gated messages skip verify and commit entirely
        let counters_gated = control && !self.config.control_message_counters;
        let mut is_duplicate = DuplicateMessage::No;

        if !counters_gated {
            let Some(state) = self.peer_connections.get(index) else {
                return;
            };
            let peer_counter = if control {
                state.control_peer_counter()
            } else {
                state.peer_counter()
            };

            if !control && !peer_counter.synchronized() {
                let handle = state.handle();
                let result = match self.counter_sync.as_mut() {
                    Some(sync) => sync.queue_received_message_and_start_sync(
                        &packet_header,
                        handle,
                        peer_address,
                        message,
                    ),
                    None => Err(SessionError::IncorrectState),
                };
                match result {
                    Ok(()) => {
                        debug!(
                            peer = %peer_address,
                            counter,
                            "message queued until peer counter is synchronized"
                        );
                    }
                    Err(err) => {
                        warn!(
                            peer = %peer_address,
                            error = %err,
                            "failed to queue message for counter synchronization, dropping"
                        );
                    }
                }
                return;
            }

            match peer_counter.verify(counter) {
                Ok(()) => {}
                Err(CounterError::DuplicateMessageReceived(value)) => {
                    debug!(peer = %peer_address, counter = value, "received a duplicate message");
                    is_duplicate = DuplicateMessage::Yes;
                }
                Err(err) => {
                    warn!(peer = %peer_address, counter, error = %err, "message counter verification failed, dropping");
                    self.report_receive_error(err.into(), peer_address);
                    return;
                }
            }
        }

        self.peer_connections.mark_active(index, now_ms);

        let Some(state) = self.peer_connections.get_mut(index) else {
            return;
        };
        let plaintext = match state.secure_session().decrypt(&message, &packet_header) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                debug!(
                    peer = %state.peer_node_id(),
                    counter,
                    error = %err,
                    "failed to decrypt message, discarding"
                );
                return;
            }
        };

        let (payload_header, consumed) = match PayloadHeader::decode_and_consume(&plaintext) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(peer = %state.peer_node_id(), error = %err, "decrypted payload has no valid payload header, discarding");
                return;
            }
        };

        // duplicates that carry no ack request are dropped here to save
        // the upper layers the work; duplicates that do need an ack are
        // still delivered so the ack can be re-emitted
        if is_duplicate == DuplicateMessage::Yes && !payload_header.needs_ack {
            debug!(counter, "duplicate message without ack request, dropping");
            return;
        }

        if !counters_gated {
            if control {
                state.control_peer_counter_mut().commit(counter);
            } else {
                state.peer_counter_mut().commit(counter);
            }
        }

        // a correctly authenticated message from a new address moves the
        // session there (transparent roaming)
        if state.peer_address() != peer_address {
            debug!(
                peer = %state.peer_node_id(),
                old = %state.peer_address(),
                new = %peer_address,
                "peer address updated"
            );
            state.set_peer_address(*peer_address);
        }

        let handle = state.handle();
        let payload = plaintext[consumed..].to_vec();
        if let Some(callback) = self.delegate.as_mut() {
            callback.on_message_received(
                &packet_header,
                &payload_header,
                handle,
                peer_address,
                is_duplicate,
                payload,
            );
        }
    }
}
