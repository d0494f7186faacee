//! Keyed-MAC signing stage.
//!
//! Generalizes the HMAC-SHA256 signing idiom used for webhook payloads
//! elsewhere in this codebase to three configurable SHA-2 variants.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

use crate::config::SigningAlgorithm;
use crate::error::{CacheError, CacheResult};

/// MAC length in bytes for each supported algorithm.
pub fn mac_len(algorithm: SigningAlgorithm) -> usize {
    match algorithm {
        SigningAlgorithm::Sha256 => 32,
        SigningAlgorithm::Sha384 => 48,
        SigningAlgorithm::Sha512 => 64,
    }
}

fn compute(algorithm: SigningAlgorithm, key: &str, body: &[u8]) -> Vec<u8> {
    match algorithm {
        SigningAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SigningAlgorithm::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SigningAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Prepend a MAC over `body` to the returned buffer: `mac || body`.
pub fn sign(body: &[u8], key: &str, algorithm: SigningAlgorithm) -> Vec<u8> {
    let mac = compute(algorithm, key, body);
    let mut out = Vec::with_capacity(mac.len() + body.len());
    out.extend_from_slice(&mac);
    out.extend_from_slice(body);
    out
}

/// Split a signed buffer into its body, verifying the MAC in constant
/// time. Any mismatch is [`CacheError::Integrity`].
pub fn verify_and_strip<'a>(
    signed: &'a [u8],
    key: &str,
    algorithm: SigningAlgorithm,
) -> CacheResult<&'a [u8]> {
    let len = mac_len(algorithm);
    if signed.len() < len {
        return Err(CacheError::Integrity(
            "signed payload shorter than MAC".to_string(),
        ));
    }
    let (mac, body) = signed.split_at(len);
    let expected = compute(algorithm, key, body);
    if constant_time_eq(mac, &expected) {
        Ok(body)
    } else {
        Err(CacheError::Integrity("MAC verification failed".to_string()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
