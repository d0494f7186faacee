//! Engine statistics: hits, misses, latencies, errors, evictions.
//!
//! Counters are lock-free atomics, one increment per operation, the
//! same pattern used by this codebase's metrics collector elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// An immutable snapshot of [`StatsCollector`]'s counters at a point in
/// time, returned by `get_stats()`.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Hits per tier name.
    pub hits_by_tier: HashMap<String, u64>,
    /// Total misses (exhausted every tier).
    pub misses: u64,
    /// Total successful sets.
    pub sets: u64,
    /// Total successful deletes.
    pub deletes: u64,
    /// Total evictions across all memory tiers.
    pub evictions: u64,
    /// Errors by category (`"key"`, `"serialization"`, `"integrity"`,
    /// `"tier_unavailable"`, `"config"`, `"internal"`).
    pub errors_by_category: HashMap<String, u64>,
    /// Mean observed operation latency, in microseconds, over a bounded
    /// recent sample window.
    pub avg_latency_us: f64,
}

/// Accumulates statistics for one [`crate::engine::CacheEngine`]
/// instance. Cheap to clone via `Arc` and share across tasks.
pub struct StatsCollector {
    hits_by_tier: dashmap::DashMap<String, AtomicU64>,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors_by_category: dashmap::DashMap<String, AtomicU64>,
    // Latency samples are low-volume enough (one push per op) that a
    // plain mutex-guarded ring buffer is simpler than a lock-free
    // histogram and still keeps the hot counters above lock-free.
    latencies_us: Mutex<Vec<f64>>,
}

const MAX_LATENCY_SAMPLES: usize = 4096;

impl StatsCollector {
    /// Build an empty collector.
    pub fn new() -> Self {
        StatsCollector {
            hits_by_tier: dashmap::DashMap::new(),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors_by_category: dashmap::DashMap::new(),
            latencies_us: Mutex::new(Vec::new()),
        }
    }

    /// Record a hit served by `tier_name`.
    pub fn record_hit(&self, tier_name: &str) {
        self.hits_by_tier
            .entry(tier_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss that exhausted every tier.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful `set`.
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful `delete`.
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a memory-tier eviction.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error in the given taxonomy category.
    pub fn record_error(&self, category: &str) {
        self.errors_by_category
            .entry(category.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation's wall-clock latency.
    pub fn record_latency(&self, duration: Duration) {
        let mut samples = self.latencies_us.lock();
        if samples.len() >= MAX_LATENCY_SAMPLES {
            samples.remove(0);
        }
        samples.push(duration.as_secs_f64() * 1_000_000.0);
    }

    /// Take an immutable snapshot of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits_by_tier = self
            .hits_by_tier
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let errors_by_category = self
            .errors_by_category
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let avg_latency_us = {
            let samples = self.latencies_us.lock();
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };
        StatsSnapshot {
            hits_by_tier,
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors_by_category,
            avg_latency_us,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatsCollector::new();
        stats.record_hit("memory");
        stats.record_hit("memory");
        stats.record_miss();
        stats.record_error("integrity");

        let snap = stats.snapshot();
        assert_eq!(snap.hits_by_tier.get("memory"), Some(&2));
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.errors_by_category.get("integrity"), Some(&1));
    }

    #[test]
    fn latency_window_is_bounded() {
        let stats = StatsCollector::new();
        for _ in 0..(MAX_LATENCY_SAMPLES + 10) {
            stats.record_latency(Duration::from_micros(1));
        }
        assert_eq!(stats.latencies_us.lock().len(), MAX_LATENCY_SAMPLES);
    }
}
