//! Cryptographic primitives for peer sessions.
//!
//! Each peer-to-peer session is keyed by an ephemeral X25519 exchange:
//!
//! ```text
//! Initiator: (sk_i, pk_i) = X25519::generate()
//! Responder: (sk_r, pk_r) = X25519::generate()
//!
//! session_key = X25519(sk_i, pk_r) = X25519(sk_r, pk_i)
//! ```
//!
//! The raw 32-byte shared secret is used directly as the AES-256-GCM key;
//! interoperability depends on there being no KDF step. Public keys travel
//! as base64-encoded SubjectPublicKeyInfo DER, and sealed payloads as
//! `base64(nonce ‖ tag ‖ ciphertext)`. Keys never outlive the TCP
//! connection they were negotiated on.

mod aead;
mod exchange;

pub use aead::{open, seal};
pub use exchange::{KeyPair, PublicKey};

use thiserror::Error;

/// AES-GCM nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Session key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// Smallest valid sealed token after base64 decoding (nonce + tag)
pub const MIN_TOKEN_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Errors from crypto operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key is not a valid X25519 SPKI envelope
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication failure or malformed token; intentionally carries
    /// no detail about which
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Symmetric session key derived from an X25519 exchange
#[derive(Clone)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// Simple hex encoder
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}
