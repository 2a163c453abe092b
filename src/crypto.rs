//! Authenticated encryption for established sessions.
//!
//! A [`SecureSession`] holds the symmetric key material produced by the
//! pairing engine. Keys are derived with HKDF-SHA256 from the pairing
//! secret into one key per direction; the session role picks which key
//! encrypts and which decrypts, so the same counter value never collides
//! across directions.
//!
//! Encryption is ChaCha20-Poly1305 with the encoded packet header as
//! additional authenticated data. The nonce is built from the message
//! counter and the source node id carried in (or omitted from) the packet
//! header, so both ends derive it from the same clear bytes.

use crate::address::NodeId;
use crate::wire::PacketHeader;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Size of the AEAD tag appended to every encrypted message.
pub const TAG_SIZE: usize = 16;

/// Size of a direction key.
pub const KEY_SIZE: usize = 32;

/// Maximum plaintext size for a single message.
pub const MAX_PLAINTEXT_SIZE: usize = 65535 - TAG_SIZE;

/// HKDF info label for session key expansion.
const SESSION_KEYS_INFO: &[u8] = b"SessionKeys";

/// Errors from session crypto operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("session has no key material")]
    KeysNotDerived,
}

/// Role of this end of the session, fixed at pairing time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionRole {
    /// We initiated the pairing.
    #[default]
    Initiator,
    /// The peer initiated the pairing.
    Responder,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Initiator => write!(f, "initiator"),
            SessionRole::Responder => write!(f, "responder"),
        }
    }
}

/// Symmetric key material for one authenticated session.
#[derive(Clone)]
pub struct SecureSession {
    /// Key for outbound messages.
    encrypt_key: [u8; KEY_SIZE],
    /// Key for inbound messages.
    decrypt_key: [u8; KEY_SIZE],
    /// Role this end played during pairing.
    role: SessionRole,
    /// Whether key derivation has run.
    has_keys: bool,
}

impl SecureSession {
    /// Create an empty session (no key material yet).
    pub fn empty() -> Self {
        Self {
            encrypt_key: [0u8; KEY_SIZE],
            decrypt_key: [0u8; KEY_SIZE],
            role: SessionRole::Initiator,
            has_keys: false,
        }
    }

    /// Derive direction keys from a pairing secret.
    ///
    /// Expands the secret into an initiator-to-responder key and a
    /// responder-to-initiator key; `role` assigns them to the encrypt and
    /// decrypt slots so the two ends end up mirrored.
    pub fn derive(secret: &[u8], salt: &[u8], role: SessionRole) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut okm = [0u8; 2 * KEY_SIZE];
        hk.expand(SESSION_KEYS_INFO, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut i2r = [0u8; KEY_SIZE];
        let mut r2i = [0u8; KEY_SIZE];
        i2r.copy_from_slice(&okm[..KEY_SIZE]);
        r2i.copy_from_slice(&okm[KEY_SIZE..]);

        let (encrypt_key, decrypt_key) = match role {
            SessionRole::Initiator => (i2r, r2i),
            SessionRole::Responder => (r2i, i2r),
        };

        Ok(Self {
            encrypt_key,
            decrypt_key,
            role,
            has_keys: true,
        })
    }

    /// Whether key derivation has run.
    pub fn has_keys(&self) -> bool {
        self.has_keys
    }

    /// Role this end played during pairing.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Encrypt a message body, returning ciphertext with appended tag.
    ///
    /// The encoded packet header is authenticated as AAD; the header must
    /// already carry the final message counter since the nonce is derived
    /// from it.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        packet_header: &PacketHeader,
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.has_keys {
            return Err(CryptoError::KeysNotDerived);
        }
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CryptoError::MessageTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT_SIZE,
            });
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.encrypt_key)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let aad = packet_header.encode();
        let nonce = Self::message_nonce(packet_header);
        cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)
    }

    /// Decrypt a message body (ciphertext with appended tag).
    ///
    /// The AAD and nonce are rebuilt from the received packet header; any
    /// tampering with header or body fails tag verification.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        packet_header: &PacketHeader,
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.has_keys {
            return Err(CryptoError::KeysNotDerived);
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MessageTooShort {
                expected: TAG_SIZE,
                got: ciphertext.len(),
            });
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.decrypt_key)
            .map_err(|_| CryptoError::DecryptFailed)?;

        let aad = packet_header.encode();
        let nonce = Self::message_nonce(packet_header);
        cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// Build the 12-byte nonce from header fields both ends can see.
    fn message_nonce(packet_header: &PacketHeader) -> Nonce {
        let node_id = packet_header
            .source_node_id
            .unwrap_or(NodeId::UNDEFINED);
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes[..4].copy_from_slice(&packet_header.message_counter.to_le_bytes());
        nonce_bytes[4..].copy_from_slice(&node_id.to_le_bytes());
        *Nonce::from_slice(&nonce_bytes)
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("role", &self.role)
            .field("has_keys", &self.has_keys)
            .field("keys", &"[redacted]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SessionId;
    use crate::wire::PacketFlags;

    const SECRET: &[u8] = b"pairing shared secret for tests!";
    const SALT: &[u8] = b"test salt";

    fn header(counter: u32) -> PacketHeader {
        PacketHeader {
            flags: PacketFlags {
                encrypted: true,
                ..Default::default()
            },
            session_id: SessionId::new(12),
            message_counter: counter,
            security_flags: crate::wire::SECURITY_SCHEME_CHACHA20POLY1305,
            source_node_id: None,
            destination_node_id: None,
        }
    }

    #[test]
    fn test_roles_are_mirrored() {
        let initiator = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();
        let responder = SecureSession::derive(SECRET, SALT, SessionRole::Responder).unwrap();

        let hdr = header(1);
        let ciphertext = initiator.encrypt(b"hello", &hdr).unwrap();
        assert_eq!(ciphertext.len(), 5 + TAG_SIZE);

        let plaintext = responder.decrypt(&ciphertext, &hdr).unwrap();
        assert_eq!(plaintext, b"hello");

        // and the reverse direction uses the other key
        let reply = responder.encrypt(b"world", &hdr).unwrap();
        assert_ne!(reply, ciphertext);
        assert_eq!(initiator.decrypt(&reply, &hdr).unwrap(), b"world");
    }

    #[test]
    fn test_same_role_cannot_decrypt() {
        let a = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();
        let b = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();

        let hdr = header(1);
        let ciphertext = a.encrypt(b"hello", &hdr).unwrap();
        assert_eq!(
            b.decrypt(&ciphertext, &hdr),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let initiator = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();
        let responder = SecureSession::derive(SECRET, SALT, SessionRole::Responder).unwrap();

        let hdr = header(5);
        let mut ciphertext = initiator.encrypt(b"hello", &hdr).unwrap();
        ciphertext[0] ^= 0x01;
        assert_eq!(
            responder.decrypt(&ciphertext, &hdr),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn test_tampered_header_rejected() {
        let initiator = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();
        let responder = SecureSession::derive(SECRET, SALT, SessionRole::Responder).unwrap();

        let hdr = header(5);
        let ciphertext = initiator.encrypt(b"hello", &hdr).unwrap();

        // counter change breaks both AAD and nonce
        let mut altered = hdr;
        altered.message_counter = 6;
        assert_eq!(
            responder.decrypt(&ciphertext, &altered),
            Err(CryptoError::DecryptFailed)
        );

        // session id change breaks AAD only
        let mut altered = hdr;
        altered.session_id = SessionId::new(13);
        assert_eq!(
            responder.decrypt(&ciphertext, &altered),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn test_source_node_id_feeds_nonce() {
        let initiator = SecureSession::derive(SECRET, SALT, SessionRole::Initiator).unwrap();
        let responder = SecureSession::derive(SECRET, SALT, SessionRole::Responder).unwrap();

        let mut hdr = header(9);
        hdr.source_node_id = Some(NodeId::new(0xABCD));
        let ciphertext = initiator.encrypt(b"hello", &hdr).unwrap();
        assert_eq!(responder.decrypt(&ciphertext, &hdr).unwrap(), b"hello");

        let mut stripped = hdr;
        stripped.source_node_id = None;
        assert_eq!(
            responder.decrypt(&ciphertext, &stripped),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn test_empty_session_refuses_traffic() {
        let empty = SecureSession::empty();
        assert!(!empty.has_keys());
        assert_eq!(
            empty.encrypt(b"x", &header(1)),
            Err(CryptoError::KeysNotDerived)
        );
        assert_eq!(
            empty.decrypt(&[0u8; TAG_SIZE], &header(1)),
            Err(CryptoError::KeysNotDerived)
        );
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let session = SecureSession::derive(SECRET, SALT, SessionRole::Responder).unwrap();
        assert_eq!(
            session.decrypt(&[0u8; TAG_SIZE - 1], &header(1)),
            Err(CryptoError::MessageTooShort {
                expected: TAG_SIZE,
                got: TAG_SIZE - 1
            })
        );
    }
}
