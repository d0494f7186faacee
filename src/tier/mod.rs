//! The tier contract shared by every storage tier, and its two concrete
//! in-tree implementations: the memory tier and the persistent tier.

pub mod memory;
pub mod persistent;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

pub use memory::MemoryTier;
pub use persistent::PersistentTier;

/// Operations every tier exposes. Tier keys crossing this interface are
/// already namespaced by the caller.
#[async_trait]
pub trait Tier: Send + Sync {
    /// A short, stable name used in statistics and log lines.
    fn name(&self) -> &str;

    /// Fetch a value. `Ok((false, _))` on miss or expiry; never an error
    /// for a plain miss.
    async fn get(&self, tier_key: &str) -> CacheResult<(bool, Vec<u8>)>;

    /// Store a value, optionally overriding the tier's default TTL. On
    /// success the entry is durable (persistent tiers) or present
    /// (memory tier).
    async fn set(&self, tier_key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Remove a value. Idempotent; returns whether it previously existed.
    async fn delete(&self, tier_key: &str) -> CacheResult<bool>;

    /// Fetch several keys at once. Keys absent from the result map are
    /// misses; this is not an all-or-nothing operation.
    async fn get_many(&self, tier_keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// Store several entries at once. Returns whether every entry was
    /// applied; a `false` means the caller may retry.
    async fn set_many(
        &self,
        entries: &HashMap<String, Vec<u8>>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Remove every entry belonging to this tier's namespace.
    async fn clear(&self) -> CacheResult<bool>;

    /// Release all resources. Idempotent.
    async fn close(&self) -> CacheResult<()>;

    /// Cumulative count of entries this tier has evicted to stay within
    /// its size bound. Tiers with no eviction policy (e.g. the
    /// persistent tier) report `0`.
    fn eviction_count(&self) -> u64 {
        0
    }
}
