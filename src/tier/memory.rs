//! The bounded in-process memory tier with pluggable eviction.
//!
//! Lookup, writes, and deletes all work through a single `parking_lot`
//! mutex guarding the record map plus whichever auxiliary ordering index
//! the active eviction discipline needs, an acceptable trade for a
//! simple, correct implementation. Both the recency/insertion-order
//! index and the frequency index are balanced trees keyed so that
//! eviction is a single `first()` lookup, O(log n) per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::EvictionPolicy;
use crate::error::CacheResult;
use crate::tier::Tier;

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
    /// Current position in `order_index` (LRU/FIFO) — the sequence
    /// number assigned when the entry last became "most recent".
    order_key: u64,
    /// Access count, used as the primary ordering key under LFU.
    freq: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Inner {
    entries: HashMap<String, MemoryEntry>,
    seq: u64,
    /// LRU/FIFO ordering: sequence number → key, oldest first.
    order_index: BTreeMap<u64, String>,
    /// LFU ordering: (access_count, recency sequence, key), smallest
    /// first; ties broken by the older recency sequence.
    freq_index: BTreeSet<(u64, u64, String)>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            entries: HashMap::new(),
            seq: 0,
            order_index: BTreeMap::new(),
            freq_index: BTreeSet::new(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// A bounded in-process cache tier with a single eviction discipline
/// selected at construction.
pub struct MemoryTier {
    name: String,
    max_size: usize,
    default_ttl: Duration,
    discipline: EvictionPolicy,
    inner: Mutex<Inner>,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Build a new memory tier.
    pub fn new(name: impl Into<String>, max_size: usize, default_ttl: Duration, discipline: EvictionPolicy) -> Self {
        MemoryTier {
            name: name.into(),
            max_size,
            default_ttl,
            discipline,
            inner: Mutex::new(Inner::new()),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current live entry count (may include not-yet-swept expired
    /// entries observed by nothing but the next `get`).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the tier currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch_on_write(&self, inner: &mut Inner, key: &str) -> (u64, u64) {
        let seq = inner.next_seq();
        match self.discipline {
            // LRU: a write makes the entry most recent.
            EvictionPolicy::Lru => (seq, 0),
            // FIFO: order is fixed at first insertion; touch_on_write is
            // only called for brand-new keys, so this is still the
            // correct (only) assignment.
            EvictionPolicy::Fifo => (seq, 0),
            // LFU: frequency starts at 1 on first write and increments
            // are handled by the caller; recency sequence still needed
            // for the tie-break.
            EvictionPolicy::Lfu => (seq, 1),
        }
    }

    fn evict_one(&self, inner: &mut Inner) -> Option<String> {
        let victim = match self.discipline {
            EvictionPolicy::Lru | EvictionPolicy::Fifo => {
                inner.order_index.iter().next().map(|(_, k)| k.clone())
            }
            EvictionPolicy::Lfu => inner
                .freq_index
                .iter()
                .next()
                .map(|(_, _, k)| k.clone()),
        };
        if let Some(key) = &victim {
            if let Some(entry) = inner.entries.remove(key) {
                inner.order_index.remove(&entry.order_key);
                inner
                    .freq_index
                    .remove(&(entry.freq, entry.order_key, key.clone()));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        victim
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, tier_key: &str) -> CacheResult<(bool, Vec<u8>)> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(tier_key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok((false, Vec::new())),
        };
        if expired {
            if let Some(entry) = inner.entries.remove(tier_key) {
                inner.order_index.remove(&entry.order_key);
                inner
                    .freq_index
                    .remove(&(entry.freq, entry.order_key, tier_key.to_string()));
            }
            return Ok((false, Vec::new()));
        }

        let seq = inner.next_seq();
        let value = {
            let entry = inner.entries.get(tier_key).unwrap();
            entry.value.clone()
        };

        match self.discipline {
            EvictionPolicy::Lru => {
                let entry = inner.entries.get_mut(tier_key).unwrap();
                let old_order_key = entry.order_key;
                entry.order_key = seq;
                inner.order_index.remove(&old_order_key);
                inner.order_index.insert(seq, tier_key.to_string());
            }
            EvictionPolicy::Fifo => {
                // reads never change FIFO order
            }
            EvictionPolicy::Lfu => {
                let (old_freq, old_order_key, new_freq) = {
                    let entry = inner.entries.get_mut(tier_key).unwrap();
                    let old_freq = entry.freq;
                    let old_order_key = entry.order_key;
                    entry.freq += 1;
                    entry.order_key = seq;
                    (old_freq, old_order_key, entry.freq)
                };
                inner
                    .freq_index
                    .remove(&(old_freq, old_order_key, tier_key.to_string()));
                inner
                    .freq_index
                    .insert((new_freq, seq, tier_key.to_string()));
            }
        }

        Ok((true, value))
    }

    async fn set(&self, tier_key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(tier_key) {
            // Overwrite in place; LRU treats this as a fresh touch, FIFO
            // and LFU keep position but LFU still counts the write.
            let seq = inner.next_seq();
            let (old_order_key, old_freq) = {
                let entry = inner.entries.get(tier_key).unwrap();
                (entry.order_key, entry.freq)
            };
            let (new_order_key, new_freq) = match self.discipline {
                EvictionPolicy::Lru => (seq, old_freq),
                EvictionPolicy::Fifo => (old_order_key, old_freq),
                EvictionPolicy::Lfu => (old_order_key, old_freq + 1),
            };
            if let Some(entry) = inner.entries.get_mut(tier_key) {
                entry.value = bytes;
                entry.expires_at = expires_at;
                entry.order_key = new_order_key;
                entry.freq = new_freq;
            }
            if self.discipline == EvictionPolicy::Lru {
                inner.order_index.remove(&old_order_key);
                inner.order_index.insert(new_order_key, tier_key.to_string());
            }
            if self.discipline == EvictionPolicy::Lfu {
                inner
                    .freq_index
                    .remove(&(old_freq, old_order_key, tier_key.to_string()));
                inner
                    .freq_index
                    .insert((new_freq, new_order_key, tier_key.to_string()));
            }
            return Ok(true);
        }

        // New key: evict before insertion if this write would overflow.
        if inner.entries.len() >= self.max_size {
            self.evict_one(&mut inner);
        }

        let (order_key, freq) = self.touch_on_write(&mut inner, tier_key);
        inner.entries.insert(
            tier_key.to_string(),
            MemoryEntry {
                value: bytes,
                expires_at,
                order_key,
                freq,
            },
        );
        match self.discipline {
            EvictionPolicy::Lru | EvictionPolicy::Fifo => {
                inner.order_index.insert(order_key, tier_key.to_string());
            }
            EvictionPolicy::Lfu => {
                inner
                    .freq_index
                    .insert((freq, order_key, tier_key.to_string()));
            }
        }
        Ok(true)
    }

    async fn delete(&self, tier_key: &str) -> CacheResult<bool> {
        let mut inner = self.inner.lock();
        match inner.entries.remove(tier_key) {
            Some(entry) => {
                inner.order_index.remove(&entry.order_key);
                inner
                    .freq_index
                    .remove(&(entry.freq, entry.order_key, tier_key.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_many(&self, tier_keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::with_capacity(tier_keys.len());
        for key in tier_keys {
            let (found, bytes) = self.get(key).await?;
            if found {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }

    async fn set_many(
        &self,
        entries: &HashMap<String, Vec<u8>>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        for (key, value) in entries {
            self.set(key, value.clone(), ttl).await?;
        }
        Ok(true)
    }

    async fn clear(&self) -> CacheResult<bool> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order_index.clear();
        inner.freq_index.clear();
        Ok(true)
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }

    fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
