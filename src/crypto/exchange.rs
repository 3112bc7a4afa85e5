//! X25519 key exchange with SPKI public key envelopes.
//!
//! Both sides of a session generate a fresh key pair per TCP connection
//! and swap public keys inside the handshake frames. The wire form of a
//! public key is the SubjectPublicKeyInfo DER encoding, base64-encoded
//! with standard padding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::{hex_encode, CryptoError, SessionKey, KEY_SIZE};

/// DER prefix of a SubjectPublicKeyInfo wrapping an X25519 key:
/// SEQUENCE(42) { SEQUENCE(5) { OID 1.3.101.110 }, BIT STRING(33) }
const SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// Total SPKI length for an X25519 key
const SPKI_LEN: usize = SPKI_PREFIX.len() + KEY_SIZE;

/// X25519 public key (32 bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Parse the wire form: base64-encoded X25519 SPKI DER
    pub fn from_spki(encoded: &str) -> Result<Self, CryptoError> {
        let der = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("bad base64: {e}")))?;

        if der.len() != SPKI_LEN {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected {SPKI_LEN}-byte SPKI, got {}",
                der.len()
            )));
        }
        if der[..SPKI_PREFIX.len()] != SPKI_PREFIX {
            return Err(CryptoError::InvalidPublicKey(
                "not an X25519 SubjectPublicKeyInfo".to_string(),
            ));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&der[SPKI_PREFIX.len()..]);
        Ok(Self(bytes))
    }

    /// Encode to the wire form: base64-encoded X25519 SPKI DER
    pub fn to_spki(&self) -> String {
        let mut der = Vec::with_capacity(SPKI_LEN);
        der.extend_from_slice(&SPKI_PREFIX);
        der.extend_from_slice(&self.0);
        BASE64.encode(der)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey([{}...])", hex_encode(&self.0[..4]))
    }
}

/// Ephemeral X25519 key pair (private + public)
pub struct KeyPair {
    /// Secret key
    secret: x25519_dalek::StaticSecret,
    /// Public key
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);

        Self {
            secret,
            public: PublicKey::from_bytes(public.to_bytes()),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Wire form of the public key
    pub fn public_spki(&self) -> String {
        self.public.to_spki()
    }

    /// Perform Diffie-Hellman against a peer public key. The raw shared
    /// secret is the session key; no KDF step.
    pub fn derive(&self, peer_public: &PublicKey) -> SessionKey {
        use x25519_dalek::PublicKey as X25519Public;

        let peer = X25519Public::from(*peer_public.as_bytes());
        let shared = self.secret.diffie_hellman(&peer);

        SessionKey::from_bytes(*shared.as_bytes())
    }

    /// Parse the peer's SPKI wire form and derive the session key
    pub fn derive_from_spki(&self, peer_spki: &str) -> Result<SessionKey, CryptoError> {
        let peer = PublicKey::from_spki(peer_spki)?;
        Ok(self.derive(&peer))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
