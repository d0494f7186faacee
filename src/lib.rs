#![warn(missing_docs)]
#![warn(clippy::all)]

//! A multi-tier caching engine with pluggable eviction, TTL, compression,
//! encryption, signing, adaptive TTL, a per-tier circuit breaker, warmup
//! loading, and cross-instance invalidation.
//!
//! # Quick start
//!
//! ```no_run
//! use tiered_cache::{CacheConfig, CacheEngine, Value};
//!
//! # async fn run() -> tiered_cache::CacheResult<()> {
//! let engine = CacheEngine::start(CacheConfig::default()).await?;
//! engine.set("u:1", &Value::Str("alice".to_string()), None).await?;
//! assert_eq!(engine.get("u:1").await?, Some(Value::Str("alice".to_string())));
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! CacheEngine (orchestrator)
//!   |-- codec            serialize -> compress? -> encrypt? -> sign?
//!   |-- key              namespace resolution, validation
//!   |-- tier::MemoryTier      in-process, LRU/FIFO/LFU + TTL
//!   |-- tier::PersistentTier  sled-backed, sidecar expiry, retention, compaction
//!   |-- adaptive_ttl     per-key access stats -> effective TTL
//!   |-- failure_guard    circuit breaker + retry/backoff per tier
//!   |-- warmup           seed entries at start
//!   `-- invalidation     cross-instance pub/sub
//! ```
//!
//! Writes fan out fastest-tier-first (write-through by default); reads
//! stop at the first hit and promote it into every faster tier traversed.

/// Per-key adaptive TTL: access statistics drive effective expiry.
pub mod adaptive_ttl;
/// The serialize/compress/encrypt/sign value pipeline.
pub mod codec;
/// Engine configuration.
pub mod config;
/// The public orchestrator.
pub mod engine;
/// The error taxonomy.
pub mod error;
/// Per-tier circuit breaker with retry/backoff.
pub mod failure_guard;
/// Cross-instance invalidation bus.
pub mod invalidation;
/// Key validation and namespace resolution.
pub mod key;
/// Hit/miss/latency/error statistics.
pub mod stats;
/// The tier contract and its memory/persistent implementations.
pub mod tier;
/// The encodable value type.
pub mod value;
/// Seed entries from an external source at engine start.
pub mod warmup;

pub use config::{CacheConfig, CacheLayerConfig, EvictionPolicy, SigningAlgorithm};
pub use engine::{CacheEngine, ScopedCacheEngine};
pub use error::{CacheError, CacheResult};
pub use value::Value;

/// Crate version, exposed for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name, exposed for diagnostics.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_and_name_are_populated() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "tiered-cache");
    }
}
