//! AEAD encryption stage: AES-256-GCM keyed by an HKDF-derived key.
//!
//! Grounded on the symmetric-cipher wrapper pattern used elsewhere in this
//! codebase's cryptography layer: a fresh random nonce per call, stored
//! alongside the ciphertext in a single envelope (`nonce || ciphertext`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CacheError, CacheResult};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Derive a 32-byte AEAD key deterministically from `(key, salt)` via
/// HKDF-SHA256. The same pair always derives the same key.
fn derive_key(key: &str, salt: &str) -> [u8; KEY_SIZE] {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), key.as_bytes());
    let mut out = [0u8; KEY_SIZE];
    hk.expand(b"tiered-cache-codec-encryption", &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

/// Encrypt `plaintext` under a key derived from `(key, salt)`. Returns
/// `nonce || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &str, salt: &str) -> CacheResult<Vec<u8>> {
    let mut derived = derive_key(key, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
    derived.zeroize();

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CacheError::Serialization("encryption failed".to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`] under the same `(key,
/// salt)` pair. Any tamper or wrong key surfaces as
/// [`CacheError::Integrity`].
pub fn decrypt(envelope: &[u8], key: &str, salt: &str) -> CacheResult<Vec<u8>> {
    if envelope.len() < NONCE_SIZE {
        return Err(CacheError::Integrity(
            "ciphertext shorter than nonce".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);

    let mut derived = derive_key(key, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
    derived.zeroize();

    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CacheError::Integrity("AEAD decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let envelope = encrypt(b"secret payload", "key-material", "salt-material").unwrap();
        let plaintext = decrypt(&envelope, "key-material", "salt-material").unwrap();
        assert_eq!(plaintext, b"secret payload");
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let a = encrypt(b"same plaintext", "k", "s").unwrap();
        let b = encrypt(b"same plaintext", "k", "s").unwrap();
        assert_ne!(a, b, "two encryptions of the same plaintext must differ");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let envelope = encrypt(b"secret", "key-a", "salt").unwrap();
        assert!(decrypt(&envelope, "key-b", "salt").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let mut envelope = encrypt(b"secret", "key", "salt").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;
        assert!(decrypt(&envelope, "key", "salt").is_err());
    }
}
