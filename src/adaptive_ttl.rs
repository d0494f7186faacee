//! Adaptive TTL: per-key access statistics drive the effective TTL of
//! subsequent writes.
//!
//! The closed-form formula is a monotonic, clamped curve: it only needs
//! to be non-decreasing in `access_count` and clamped to
//! `[adaptive_ttl_min, adaptive_ttl_max]`.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-key access statistics tracked while adaptive TTL is enabled.
#[derive(Debug, Clone, Copy)]
struct KeyStats {
    access_count: u64,
    last_access_at: Instant,
}

/// Configuration the formula needs, mirrored from [`crate::config::CacheConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveTtlConfig {
    pub min: Duration,
    pub max: Duration,
    pub access_count_threshold: u64,
    pub adjustment_factor: f64,
}

/// Bounded table of per-key access statistics, size-capped at
/// `cache_max_size` and aged out by [`AdaptiveTtlTracker::sweep`].
pub struct AdaptiveTtlTracker {
    table: DashMap<String, KeyStats>,
    max_entries: usize,
    config: AdaptiveTtlConfig,
}

impl AdaptiveTtlTracker {
    /// Build a tracker bounded to `max_entries` keys.
    pub fn new(max_entries: usize, config: AdaptiveTtlConfig) -> Self {
        AdaptiveTtlTracker {
            table: DashMap::new(),
            max_entries,
            config,
        }
    }

    /// Record an access to `key` and return the current access count.
    pub fn record_access(&self, key: &str) -> u64 {
        if let Some(mut entry) = self.table.get_mut(key) {
            entry.access_count += 1;
            entry.last_access_at = Instant::now();
            return entry.access_count;
        }
        if self.table.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.table.insert(
            key.to_string(),
            KeyStats {
                access_count: 1,
                last_access_at: Instant::now(),
            },
        );
        1
    }

    fn evict_oldest(&self) {
        if let Some(oldest_key) = self
            .table
            .iter()
            .min_by_key(|e| e.last_access_at)
            .map(|e| e.key().clone())
        {
            self.table.remove(&oldest_key);
        }
    }

    /// Compute the effective TTL for `key` given `base` (the override or
    /// `config.cache_ttl`). Does not itself record an access — callers
    /// call [`AdaptiveTtlTracker::record_access`] first.
    pub fn effective_ttl(&self, key: &str, base: Duration) -> Duration {
        let access_count = self
            .table
            .get(key)
            .map(|e| e.access_count)
            .unwrap_or(1);
        compute_effective_ttl(base, access_count, &self.config)
    }

    /// Remove entries whose last access predates `idle_cutoff` in the
    /// past, bounding table growth over time the way a periodic sweep
    /// would in the orchestrator's background task.
    pub fn sweep(&self, idle_cutoff: Duration) {
        let horizon = Instant::now() - idle_cutoff;
        self.table.retain(|_, stats| stats.last_access_at >= horizon);
    }

    /// Current tracked key count.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the tracker currently holds no keys.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// The standalone formula, exposed for unit testing independent of the
/// tracker's table management.
pub fn compute_effective_ttl(base: Duration, access_count: u64, config: &AdaptiveTtlConfig) -> Duration {
    if access_count < config.access_count_threshold || config.access_count_threshold == 0 {
        return base;
    }
    let ratio = access_count as f64 / config.access_count_threshold as f64;
    let k = (ratio.ln() / 2f64.ln()).floor().max(0.0);
    let scaled = base.as_secs_f64() * config.adjustment_factor.powf(k);
    let clamped = scaled.clamp(config.min.as_secs_f64(), config.max.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveTtlConfig {
        AdaptiveTtlConfig {
            min: Duration::from_secs(60),
            max: Duration::from_secs(86_400),
            access_count_threshold: 10,
            adjustment_factor: 1.5,
        }
    }

    #[test]
    fn below_threshold_uses_base_ttl() {
        let base = Duration::from_secs(3600);
        let ttl = compute_effective_ttl(base, 1, &config());
        assert_eq!(ttl, base);
    }

    #[test]
    fn monotonic_in_access_count() {
        let base = Duration::from_secs(3600);
        let cfg = config();
        let mut last = compute_effective_ttl(base, 10, &cfg);
        for access_count in [20, 40, 80, 160, 1000] {
            let next = compute_effective_ttl(base, access_count, &cfg);
            assert!(next >= last, "ttl must never decrease as access_count grows");
            last = next;
        }
    }

    #[test]
    fn clamped_to_configured_bounds() {
        let cfg = config();
        let ttl = compute_effective_ttl(Duration::from_secs(3600), 10_000_000, &cfg);
        assert!(ttl <= cfg.max);
        assert!(ttl >= cfg.min);
    }

    #[test]
    fn tracker_records_and_bounds_access_counts() {
        let tracker = AdaptiveTtlTracker::new(2, config());
        assert_eq!(tracker.record_access("a"), 1);
        assert_eq!(tracker.record_access("a"), 2);
        tracker.record_access("b");
        tracker.record_access("c");
        assert!(tracker.len() <= 2);
    }
}
