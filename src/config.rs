//! Engine configuration.
//!
//! Construction is always programmatic: there is no environment or file
//! loader. Callers build a [`CacheConfig`] with [`CacheConfig::default`]
//! and override the fields they care about.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CacheError, CacheResult};

/// Eviction discipline for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least-recently-used entry on overflow.
    Lru,
    /// Evict the oldest-inserted entry on overflow.
    Fifo,
    /// Evict the least-frequently-used entry on overflow, ties broken by
    /// oldest last access.
    Lfu,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru
    }
}

/// Signing algorithm for the codec pipeline's MAC stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    /// HMAC-SHA256, 32-byte MAC.
    Sha256,
    /// HMAC-SHA384, 48-byte MAC.
    Sha384,
    /// HMAC-SHA512, 64-byte MAC.
    Sha512,
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::Sha256
    }
}

/// One entry of an explicit, ordered cache stack used when
/// [`CacheConfig::use_layered_cache`] is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLayerConfig {
    /// Layer kind: `"memory"` or `"disk"`.
    pub layer_type: String,
    /// Default TTL for entries written through this layer.
    pub ttl: std::time::Duration,
    /// Whether this layer participates at all.
    pub enabled: bool,
    /// Relative weight, reserved for future load-balancing use; unused by
    /// the orchestrator today but carried through so layered configs
    /// round-trip.
    pub weight: f32,
    /// Maximum entries (memory layers only).
    pub max_size: usize,
}

/// Full configuration surface for a [`crate::engine::CacheEngine`].
///
/// Options with no bearing on a disabled feature are simply ignored
/// (e.g. `encryption_key` is unused when `enable_encryption` is
/// `false`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    // --- persistent tier location ---
    /// Directory holding persistent-tier database files.
    pub cache_dir: PathBuf,
    /// Base filename; the actual file is `<cache_file>_<namespace>.db`.
    pub cache_file: String,

    // --- sizing / ttl / eviction ---
    /// Maximum live entries in the memory tier (and the adaptive-TTL
    /// access-statistics table).
    pub cache_max_size: usize,
    /// Default TTL applied when a `set` supplies none.
    pub cache_ttl: std::time::Duration,
    /// Eviction discipline for the memory tier.
    pub eviction_policy: EvictionPolicy,
    /// Logical namespace; `"default"` is the reserved identity namespace.
    pub namespace: String,

    // --- per-tier enablement ---
    /// Whether the memory tier participates.
    pub memory_cache_enabled: bool,
    /// TTL override for the memory tier specifically.
    pub memory_cache_ttl: std::time::Duration,
    /// Whether the persistent tier participates.
    pub disk_cache_enabled: bool,
    /// TTL override for the persistent tier specifically.
    pub disk_cache_ttl: std::time::Duration,

    // --- layered mode ---
    /// Use the explicit `cache_layers` ordering instead of the default
    /// `[memory?, disk?]` assembly.
    pub use_layered_cache: bool,
    /// Explicit tier ordering, fastest first, when layered mode is on.
    pub cache_layers: Vec<CacheLayerConfig>,

    // --- write/read semantics ---
    /// Write to every enabled tier (`true`) or only the fastest (`false`).
    pub write_through: bool,
    /// Whether `get` traverses slower tiers on a faster-tier miss.
    pub read_through: bool,

    // --- compression ---
    /// Enable the compress stage of the codec pipeline.
    pub enable_compression: bool,
    /// Minimum serialized length before compression is attempted.
    pub compression_min_size: usize,
    /// DEFLATE level, 1 (fastest) to 9 (smallest).
    pub compression_level: u32,

    // --- persistent tier housekeeping ---
    /// Fraction of device capacity considered "high" usage; informational.
    pub disk_usage_threshold: f64,
    /// Fraction of device capacity that triggers aggressive retention.
    pub disk_critical_threshold: f64,
    /// Entries older than this many days are dropped by a normal sweep.
    pub disk_retention_days: u32,
    /// Fraction of live entries removed by an aggressive sweep (at least
    /// 10 entries regardless of this fraction). Defaults to `0.5`.
    pub aggressive_fraction: f64,
    /// How often the background retention sweep runs against every
    /// enabled persistent tier.
    pub disk_retention_interval: std::time::Duration,
    /// Assumed device capacity in bytes, used to turn a persistent tier's
    /// `size_on_disk` into the fraction `disk_usage_threshold`/
    /// `disk_critical_threshold` are expressed against. There is no
    /// portable `std` API for actual free-space querying, so this crate
    /// takes the capacity as configuration rather than querying the OS.
    pub disk_capacity_bytes: u64,

    // --- failure guard ---
    /// Maximum retry attempts per externally-observable tier call.
    pub retry_attempts: u32,
    /// Base delay before the first retry; doubles on each subsequent one.
    pub retry_delay: std::time::Duration,

    // --- adaptive ttl ---
    /// Enable per-key adaptive TTL.
    pub enable_adaptive_ttl: bool,
    /// Lower clamp for the effective TTL.
    pub adaptive_ttl_min: std::time::Duration,
    /// Upper clamp for the effective TTL.
    pub adaptive_ttl_max: std::time::Duration,
    /// Access count above which the TTL starts to adjust.
    pub access_count_threshold: u64,
    /// Growth factor applied per doubling of access count past the
    /// threshold.
    pub adaptive_ttl_adjustment_factor: f64,

    // --- encryption ---
    /// Enable the encrypt stage of the codec pipeline.
    pub enable_encryption: bool,
    /// Base key material; combined with `encryption_salt` via HKDF to
    /// derive the AEAD key. Never logged.
    pub encryption_key: String,
    /// Salt combined with `encryption_key` via HKDF.
    pub encryption_salt: String,

    // --- signing ---
    /// Enable the sign stage of the codec pipeline.
    pub enable_data_signing: bool,
    /// HMAC key. Never logged.
    pub signing_key: String,
    /// HMAC hash algorithm.
    pub signing_algorithm: SigningAlgorithm,

    // --- warmup ---
    /// Load seed entries at engine start.
    pub enable_warmup: bool,
    /// Path to a newline-delimited JSON file of `{"key": ..., "value": ...}`
    /// records consumed by the warmup loader.
    pub warmup_keys_file: Option<PathBuf>,

    // --- invalidation ---
    /// Enable the cross-instance invalidation bus. Only meaningful when a
    /// shared tier is attached.
    pub enable_invalidation: bool,
    /// Logical channel name, used only for observability/logging; the
    /// actual transport is a caller-supplied broadcast channel.
    pub invalidation_channel: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_dir: PathBuf::from("./cache"),
            cache_file: "cache".to_string(),

            cache_max_size: 10_000,
            cache_ttl: std::time::Duration::from_secs(3600),
            eviction_policy: EvictionPolicy::default(),
            namespace: "default".to_string(),

            memory_cache_enabled: true,
            memory_cache_ttl: std::time::Duration::from_secs(3600),
            disk_cache_enabled: false,
            disk_cache_ttl: std::time::Duration::from_secs(86400),

            use_layered_cache: false,
            cache_layers: Vec::new(),

            write_through: true,
            read_through: true,

            enable_compression: false,
            compression_min_size: 256,
            compression_level: 6,

            disk_usage_threshold: 0.8,
            disk_critical_threshold: 0.95,
            disk_retention_days: 30,
            aggressive_fraction: 0.5,
            disk_retention_interval: std::time::Duration::from_secs(3600),
            disk_capacity_bytes: 10 * 1024 * 1024 * 1024,

            retry_attempts: 3,
            retry_delay: std::time::Duration::from_millis(100),

            enable_adaptive_ttl: false,
            adaptive_ttl_min: std::time::Duration::from_secs(60),
            adaptive_ttl_max: std::time::Duration::from_secs(86400),
            access_count_threshold: 10,
            adaptive_ttl_adjustment_factor: 1.5,

            enable_encryption: false,
            encryption_key: String::new(),
            encryption_salt: String::new(),

            enable_data_signing: false,
            signing_key: String::new(),
            signing_algorithm: SigningAlgorithm::default(),

            enable_warmup: false,
            warmup_keys_file: None,

            enable_invalidation: false,
            invalidation_channel: "cache-invalidation".to_string(),
        }
    }
}

impl CacheConfig {
    /// Validate invariants that can be checked without touching the
    /// filesystem or network. Called by [`crate::engine::CacheEngine::start`].
    pub fn validate(&self) -> CacheResult<()> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(CacheError::Config(format!(
                "compression_level must be in 1..=9, got {}",
                self.compression_level
            )));
        }
        if self.enable_encryption && self.encryption_key.is_empty() {
            return Err(CacheError::Config(
                "enable_encryption is set but encryption_key is empty".to_string(),
            ));
        }
        if self.enable_data_signing && self.signing_key.is_empty() {
            return Err(CacheError::Config(
                "enable_data_signing is set but signing_key is empty".to_string(),
            ));
        }
        if self.cache_max_size == 0 {
            return Err(CacheError::Config(
                "cache_max_size must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.disk_critical_threshold) {
            return Err(CacheError::Config(
                "disk_critical_threshold must be in 0.0..=1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.aggressive_fraction) {
            return Err(CacheError::Config(
                "aggressive_fraction must be in 0.0..=1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.disk_usage_threshold) {
            return Err(CacheError::Config(
                "disk_usage_threshold must be in 0.0..=1.0".to_string(),
            ));
        }
        if self.disk_capacity_bytes == 0 {
            return Err(CacheError::Config(
                "disk_capacity_bytes must be greater than zero".to_string(),
            ));
        }
        if self.use_layered_cache {
            if self.cache_layers.is_empty() {
                return Err(CacheError::Config(
                    "use_layered_cache is set but cache_layers is empty".to_string(),
                ));
            }
            for layer in &self.cache_layers {
                if layer.layer_type != "memory" && layer.layer_type != "disk" {
                    return Err(CacheError::Config(format!(
                        "unknown cache layer type {:?}",
                        layer.layer_type
                    )));
                }
            }
        }
        Ok(())
    }
}
