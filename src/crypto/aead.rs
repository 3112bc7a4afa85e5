//! AES-256-GCM seal/open for session payloads.
//!
//! The on-wire token is `base64( nonce(12) ‖ tag(16) ‖ ciphertext )` with
//! a fresh random nonce per seal. Open rejects anything shorter than
//! nonce + tag after decoding, and yields no partial plaintext and no
//! diagnostic detail on authentication failure.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::{CryptoError, SessionKey, MIN_TOKEN_SIZE, NONCE_SIZE, TAG_SIZE};

/// Encrypt a payload under a session key.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    use rand::RngCore;

    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    // aes-gcm appends the tag to the ciphertext; the wire order is
    // nonce, tag, then ciphertext
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: b"",
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let split = sealed.len() - TAG_SIZE;
    let (ciphertext, tag) = sealed.split_at(split);

    let mut token = Vec::with_capacity(NONCE_SIZE + sealed.len());
    token.extend_from_slice(&nonce);
    token.extend_from_slice(tag);
    token.extend_from_slice(ciphertext);

    Ok(BASE64.encode(token))
}

/// Decrypt a sealed token. Any malformed or tampered input yields
/// [`CryptoError::DecryptionFailed`] with no further detail.
pub fn open(key: &SessionKey, token: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = BASE64
        .decode(token)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    if raw.len() < MIN_TOKEN_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let nonce = &raw[..NONCE_SIZE];
    let tag = &raw[NONCE_SIZE..MIN_TOKEN_SIZE];
    let ciphertext = &raw[MIN_TOKEN_SIZE..];

    // Rebuild the ciphertext ‖ tag layout aes-gcm expects
    let mut sealed = Vec::with_capacity(raw.len() - NONCE_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &sealed,
                aad: b"",
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes([0x42u8; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let plaintext = b"Hello, World!";

        let token = seal(&key, plaintext).unwrap();
        let opened = open(&key, &token).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_seal_open_empty_payload() {
        let key = test_key();

        let token = seal(&key, b"").unwrap();
        let opened = open(&key, &token).unwrap();

        assert!(opened.is_empty());
    }

    #[test]
    fn test_open_wrong_key() {
        let token = seal(&SessionKey::from_bytes([1u8; 32]), b"secret").unwrap();

        let result = open(&SessionKey::from_bytes([2u8; 32]), &token);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_open_tamper_detection() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let key = test_key();
        let token = seal(&key, b"Hello, World!").unwrap();

        // Flip one ciphertext byte
        let mut raw = STANDARD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = STANDARD.encode(raw);

        assert!(open(&key, &tampered).is_err());
    }

    #[test]
    fn test_open_rejects_short_token() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let key = test_key();

        // 27 bytes decoded: one short of nonce + tag
        let short = STANDARD.encode([0u8; 27]);
        assert!(open(&key, &short).is_err());

        assert!(open(&key, "").is_err());
        assert!(open(&key, "%%% not base64 %%%").is_err());
    }

    #[test]
    fn test_seal_fresh_nonce_per_call() {
        let key = test_key();

        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();

        assert_ne!(a, b);
        assert_eq!(open(&key, &a).unwrap(), open(&key, &b).unwrap());
    }

    #[test]
    fn test_token_layout() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let key = test_key();
        let plaintext = b"layout check";

        let raw = STANDARD.decode(seal(&key, plaintext).unwrap()).unwrap();
        assert_eq!(raw.len(), NONCE_SIZE + TAG_SIZE + plaintext.len());
    }
}
