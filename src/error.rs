//! Error taxonomy for the tiered cache engine.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// The complete set of failure modes the cache engine can surface.
///
/// Propagation policy: an operation never surfaces a lower-tier transient
/// error once a higher tier already produced a definitive answer. `clear()`
/// never fails globally — partial per-tier failures are only recorded in
/// statistics. `close()` attempts every sub-close regardless of earlier
/// failures and aggregates them into a single [`CacheError::Internal`].
#[derive(Error, Debug)]
pub enum CacheError {
    /// The supplied key is invalid: empty, longer than 512 bytes, or
    /// contains a control character.
    #[error("invalid key: {0}")]
    Key(String),

    /// Encoding or decoding a value failed. Surfaced on writes; on reads
    /// the offending entry is treated as a miss and removed from the
    /// serving tier.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A MAC or AEAD check failed while decoding a stored payload. The
    /// offending entry is removed from the serving tier.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A tier's circuit breaker is open, or the tier timed out. Reads
    /// treat this as a miss and continue to the next tier; writes under
    /// write-through log and continue; deletes are best-effort.
    #[error("tier unavailable: {0}")]
    TierUnavailable(String),

    /// The engine was constructed with an invalid configuration. Always
    /// fatal, raised only at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An unexpected internal failure, tagged with a correlation id for
    /// cross-referencing logs.
    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        /// Monotonic id correlating this error with the `tracing` event
        /// emitted when it was raised.
        correlation_id: u64,
        /// Human-readable description.
        message: String,
    },
}

impl CacheError {
    /// Build an [`CacheError::Internal`] and log it via `tracing::error!`,
    /// returning a fresh correlation id each call.
    pub fn internal(message: impl Into<String>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let correlation_id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let message = message.into();
        tracing::error!(correlation_id, %message, "internal cache error");
        CacheError::Internal {
            correlation_id,
            message,
        }
    }
}
