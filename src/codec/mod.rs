//! The value pipeline: serialize → compress? → encrypt? → sign?, and the
//! inverse on read.
//!
//! Framed payload layout:
//! `[SIG(mac)]? [ENC(nonce || ciphertext)]? [FLAG: 'C'|'U'] [BODY]`.
//! Decoding consumes markers left-to-right in reverse of their
//! application order: verify → decrypt → inspect flag → decompress →
//! deserialize. The pipeline holds only configuration, so a single
//! instance is safe to share across concurrent callers via `Arc`.

pub mod compression;
pub mod encryption;
pub mod signing;

use crate::config::{CacheConfig, SigningAlgorithm};
use crate::error::{CacheError, CacheResult};
use crate::value::Value;

const FLAG_COMPRESSED: u8 = b'C';
const FLAG_UNCOMPRESSED: u8 = b'U';

/// Stateless configuration for the codec pipeline, cloned out of a
/// [`CacheConfig`] so the pipeline can be shared independently of the
/// rest of the engine.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub enable_compression: bool,
    pub compression_min_size: usize,
    pub compression_level: u32,
    pub enable_encryption: bool,
    pub encryption_key: String,
    pub encryption_salt: String,
    pub enable_data_signing: bool,
    pub signing_key: String,
    pub signing_algorithm: SigningAlgorithm,
}

impl From<&CacheConfig> for CodecConfig {
    fn from(cfg: &CacheConfig) -> Self {
        CodecConfig {
            enable_compression: cfg.enable_compression,
            compression_min_size: cfg.compression_min_size,
            compression_level: cfg.compression_level,
            enable_encryption: cfg.enable_encryption,
            encryption_key: cfg.encryption_key.clone(),
            encryption_salt: cfg.encryption_salt.clone(),
            enable_data_signing: cfg.enable_data_signing,
            signing_key: cfg.signing_key.clone(),
            signing_algorithm: cfg.signing_algorithm,
        }
    }
}

/// The codec pipeline. Holds only configuration; safe for concurrent use.
#[derive(Debug, Clone)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    /// Build a pipeline from the relevant slice of a [`CacheConfig`].
    pub fn new(config: impl Into<CodecConfig>) -> Self {
        Codec {
            config: config.into(),
        }
    }

    /// Run the full write-side pipeline over a [`Value`].
    pub fn encode(&self, value: &Value) -> CacheResult<Vec<u8>> {
        let serialized = value.encode();

        let (flag, body) = if self.config.enable_compression
            && serialized.len() >= self.config.compression_min_size
        {
            (
                FLAG_COMPRESSED,
                compression::compress(&serialized, self.config.compression_level)?,
            )
        } else {
            (FLAG_UNCOMPRESSED, serialized)
        };

        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(flag);
        framed.extend_from_slice(&body);

        let framed = if self.config.enable_encryption {
            encryption::encrypt(
                &framed,
                &self.config.encryption_key,
                &self.config.encryption_salt,
            )?
        } else {
            framed
        };

        let framed = if self.config.enable_data_signing {
            signing::sign(&framed, &self.config.signing_key, self.config.signing_algorithm)
        } else {
            framed
        };

        Ok(framed)
    }

    /// Run the full read-side pipeline, returning the original [`Value`].
    pub fn decode(&self, bytes: &[u8]) -> CacheResult<Value> {
        let verified: std::borrow::Cow<[u8]> = if self.config.enable_data_signing {
            std::borrow::Cow::Borrowed(signing::verify_and_strip(
                bytes,
                &self.config.signing_key,
                self.config.signing_algorithm,
            )?)
        } else {
            std::borrow::Cow::Borrowed(bytes)
        };

        let decrypted: std::borrow::Cow<[u8]> = if self.config.enable_encryption {
            std::borrow::Cow::Owned(encryption::decrypt(
                &verified,
                &self.config.encryption_key,
                &self.config.encryption_salt,
            )?)
        } else {
            verified
        };

        let (flag, body) = decrypted
            .split_first()
            .ok_or_else(|| CacheError::Serialization("empty framed payload".to_string()))?;

        let decompressed = match *flag {
            FLAG_COMPRESSED => compression::decompress(body)?,
            FLAG_UNCOMPRESSED => body.to_vec(),
            other => {
                return Err(CacheError::Serialization(format!(
                    "unknown frame flag byte {other:#x}"
                )))
            }
        };

        Value::decode(&decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_value() -> Value {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Value::Int(42));
        map.insert(
            "xs".to_string(),
            Value::Seq(vec![Value::Int(1), Value::Int(2)]),
        );
        Value::Map(map)
    }

    #[test]
    fn plain_roundtrip() {
        let codec = Codec::new(CodecConfig {
            enable_compression: false,
            compression_min_size: 256,
            compression_level: 6,
            enable_encryption: false,
            encryption_key: String::new(),
            encryption_salt: String::new(),
            enable_data_signing: false,
            signing_key: String::new(),
            signing_algorithm: SigningAlgorithm::Sha256,
        });
        let v = sample_value();
        let encoded = codec.encode(&v).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), v);
    }

    #[test]
    fn full_pipeline_roundtrip_every_combination() {
        for compression_level in [1u32, 5, 9] {
            for enable_encryption in [false, true] {
                for signing_algorithm in [
                    None,
                    Some(SigningAlgorithm::Sha256),
                    Some(SigningAlgorithm::Sha384),
                    Some(SigningAlgorithm::Sha512),
                ] {
                    let codec = Codec::new(CodecConfig {
                        enable_compression: true,
                        compression_min_size: 0,
                        compression_level,
                        enable_encryption,
                        encryption_key: "key-material".to_string(),
                        encryption_salt: "salt-material".to_string(),
                        enable_data_signing: signing_algorithm.is_some(),
                        signing_key: "signing-secret".to_string(),
                        signing_algorithm: signing_algorithm.unwrap_or(SigningAlgorithm::Sha256),
                    });
                    let v = sample_value();
                    let encoded = codec.encode(&v).unwrap();
                    assert_eq!(codec.decode(&encoded).unwrap(), v);
                }
            }
        }
    }

    #[test]
    fn tampering_a_signed_payload_is_detected() {
        let codec = Codec::new(CodecConfig {
            enable_compression: false,
            compression_min_size: 256,
            compression_level: 6,
            enable_encryption: false,
            encryption_key: String::new(),
            encryption_salt: String::new(),
            enable_data_signing: true,
            signing_key: "signing-secret".to_string(),
            signing_algorithm: SigningAlgorithm::Sha256,
        });
        let mut encoded = codec.encode(&sample_value()).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            codec.decode(&encoded),
            Err(CacheError::Integrity(_))
        ));
    }

    #[test]
    fn small_values_skip_compression_below_threshold() {
        let codec = Codec::new(CodecConfig {
            enable_compression: true,
            compression_min_size: 1_000_000,
            compression_level: 6,
            enable_encryption: false,
            encryption_key: String::new(),
            encryption_salt: String::new(),
            enable_data_signing: false,
            signing_key: String::new(),
            signing_algorithm: SigningAlgorithm::Sha256,
        });
        let v = Value::Str("short".to_string());
        let encoded = codec.encode(&v).unwrap();
        assert_eq!(encoded[0], FLAG_UNCOMPRESSED);
        assert_eq!(codec.decode(&encoded).unwrap(), v);
    }
}
