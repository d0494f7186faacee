//! The tier orchestrator: the public [`CacheEngine`].
//!
//! Composes an ordered list of tiers (fastest first), implementing
//! read-through with promotion, write-through, best-effort delete, and
//! the bulk `get_many`/`set_many` variants.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::adaptive_ttl::{AdaptiveTtlConfig, AdaptiveTtlTracker};
use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::failure_guard::{FailureGuard, FailureGuardConfig};
use crate::invalidation::{InvalidationBus, InvalidationKind};
use crate::key;
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::tier::{MemoryTier, PersistentTier, Tier};
use crate::value::Value;
use crate::warmup::{FileWarmupSource, WarmupSource};

fn error_category(e: &CacheError) -> &'static str {
    match e {
        CacheError::Key(_) => "key",
        CacheError::Serialization(_) => "serialization",
        CacheError::Integrity(_) => "integrity",
        CacheError::TierUnavailable(_) => "tier_unavailable",
        CacheError::Config(_) => "config",
        CacheError::Internal { .. } => "internal",
    }
}

/// The public tiered-cache engine.
///
/// Construct with [`CacheEngine::start`], which assembles the enabled
/// tiers and spawns the background warmup/invalidation tasks, and
/// returns a ready-to-use engine. Always call [`CacheEngine::close`] on
/// every exit path; `Drop` cannot `.await` so closing isn't automatic.
pub struct CacheEngine {
    config: CacheConfig,
    tiers: Vec<Arc<dyn Tier>>,
    /// The subset of `tiers` that are persistent tiers, retained in their
    /// concrete type so the background retention sweep can call
    /// `size_on_disk`/`retention_sweep`, which aren't part of the generic
    /// `Tier` contract.
    persistent_tiers: Vec<Arc<PersistentTier>>,
    codec: Codec,
    stats: Arc<StatsCollector>,
    adaptive_ttl: Option<Arc<AdaptiveTtlTracker>>,
    guards: HashMap<String, Arc<FailureGuard>>,
    invalidation: Option<InvalidationBus>,
    origin_id: u64,
    background: AsyncMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CacheEngine {
    /// Assemble and start an engine from `config`. When
    /// [`CacheConfig::enable_invalidation`] is set, this instance gets its
    /// own standalone invalidation bus and so never observes another
    /// engine's invalidations — use [`CacheEngine::start_with_invalidation_bus`]
    /// to share one bus across multiple instances (e.g. several engines
    /// in one process fronting a shared tier).
    pub async fn start(config: CacheConfig) -> CacheResult<Self> {
        let bus = if config.enable_invalidation {
            Some(InvalidationBus::new(rand::thread_rng().next_u64(), 256))
        } else {
            None
        };
        Self::start_inner(config, bus).await
    }

    /// Assemble and start an engine that publishes and subscribes on a
    /// caller-supplied [`InvalidationBus`], shared with every other engine
    /// instance that should observe each other's key/clear invalidations.
    /// Ignored when [`CacheConfig::enable_invalidation`] is `false`.
    pub async fn start_with_invalidation_bus(
        config: CacheConfig,
        bus: InvalidationBus,
    ) -> CacheResult<Self> {
        let bus = config.enable_invalidation.then_some(bus);
        Self::start_inner(config, bus).await
    }

    async fn start_inner(config: CacheConfig, invalidation: Option<InvalidationBus>) -> CacheResult<Self> {
        config.validate()?;

        let mut tiers: Vec<Arc<dyn Tier>> = Vec::new();
        let mut persistent_tiers: Vec<Arc<PersistentTier>> = Vec::new();
        let mut guards = HashMap::new();

        if config.use_layered_cache {
            for (i, layer) in config.cache_layers.iter().enumerate() {
                if !layer.enabled {
                    continue;
                }
                match layer.layer_type.as_str() {
                    "memory" => {
                        let name = format!("memory-{i}");
                        tiers.push(Arc::new(MemoryTier::new(
                            &name,
                            layer.max_size,
                            layer.ttl,
                            config.eviction_policy,
                        )));
                    }
                    "disk" => {
                        let persistent = Arc::new(PersistentTier::open(
                            &config.cache_dir,
                            &format!("{}-{i}", config.cache_file),
                            &config.namespace,
                            layer.ttl,
                            config.disk_retention_days,
                            config.aggressive_fraction,
                        )?);
                        guards.insert(
                            persistent.name().to_string(),
                            Arc::new(FailureGuard::new(
                                persistent.name(),
                                FailureGuardConfig {
                                    retry_attempts: config.retry_attempts,
                                    retry_delay: config.retry_delay,
                                    ..FailureGuardConfig::default()
                                },
                            )),
                        );
                        persistent_tiers.push(persistent.clone());
                        tiers.push(persistent);
                    }
                    other => {
                        return Err(CacheError::Config(format!(
                            "unknown cache layer type {other:?}"
                        )));
                    }
                }
            }
        } else {
            if config.memory_cache_enabled {
                let memory = Arc::new(MemoryTier::new(
                    "memory",
                    config.cache_max_size,
                    config.memory_cache_ttl,
                    config.eviction_policy,
                ));
                tiers.push(memory);
            }

            if config.disk_cache_enabled {
                let persistent = Arc::new(PersistentTier::open(
                    &config.cache_dir,
                    &config.cache_file,
                    &config.namespace,
                    config.disk_cache_ttl,
                    config.disk_retention_days,
                    config.aggressive_fraction,
                )?);
                guards.insert(
                    persistent.name().to_string(),
                    Arc::new(FailureGuard::new(
                        persistent.name(),
                        FailureGuardConfig {
                            retry_attempts: config.retry_attempts,
                            retry_delay: config.retry_delay,
                            ..FailureGuardConfig::default()
                        },
                    )),
                );
                persistent_tiers.push(persistent.clone());
                tiers.push(persistent);
            }
        }

        let adaptive_ttl = if config.enable_adaptive_ttl {
            Some(Arc::new(AdaptiveTtlTracker::new(
                config.cache_max_size,
                AdaptiveTtlConfig {
                    min: config.adaptive_ttl_min,
                    max: config.adaptive_ttl_max,
                    access_count_threshold: config.access_count_threshold,
                    adjustment_factor: config.adaptive_ttl_adjustment_factor,
                },
            )))
        } else {
            None
        };

        let engine = CacheEngine {
            codec: Codec::new(&config),
            stats: Arc::new(StatsCollector::new()),
            adaptive_ttl,
            guards,
            origin_id: invalidation.as_ref().map(|b| b.origin_id()).unwrap_or(0),
            invalidation,
            tiers,
            persistent_tiers,
            background: AsyncMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            config,
        };

        engine.spawn_invalidation_subscriber().await;
        engine.spawn_retention_sweeps().await;
        engine.run_warmup().await;

        Ok(engine)
    }

    /// Spawn one interval-driven retention-sweep task per persistent tier,
    /// per `SPEC_FULL.md` §4.4: normal mode drops entries past
    /// `disk_retention_days`; when the tier's on-disk footprint (against
    /// the configured `disk_capacity_bytes`) exceeds
    /// `disk_critical_threshold`, the same tick runs an aggressive sweep
    /// instead. Cancelled on `close`.
    async fn spawn_retention_sweeps(&self) {
        for tier in &self.persistent_tiers {
            let tier = tier.clone();
            let stats = self.stats.clone();
            let interval = self.config.disk_retention_interval;
            let critical_threshold = self.config.disk_critical_threshold;
            let capacity_bytes = self.config.disk_capacity_bytes;
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick fires immediately; skip it
                loop {
                    ticker.tick().await;
                    let aggressive = match tier.size_on_disk() {
                        Ok(bytes) => {
                            (bytes as f64 / capacity_bytes as f64) >= critical_threshold
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, tier = tier.name(), "retention sweep size check failed");
                            false
                        }
                    };
                    match tier.retention_sweep(aggressive).await {
                        Ok(removed) => {
                            tracing::info!(tier = tier.name(), removed, aggressive, "retention sweep completed");
                        }
                        Err(e) => {
                            stats.record_error("tier_unavailable");
                            tracing::warn!(error = %e, tier = tier.name(), "retention sweep failed");
                        }
                    }
                }
            });
            self.background.lock().await.push(handle);
        }
    }

    async fn spawn_invalidation_subscriber(&self) {
        let Some(bus) = &self.invalidation else {
            return;
        };
        let mut rx = bus.subscribe();
        let origin_id = self.origin_id;
        let tiers = self.tiers.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if msg.origin_id != origin_id => match msg.kind {
                        InvalidationKind::Key(key) => {
                            for tier in &tiers {
                                let _ = tier.delete(&key).await;
                            }
                        }
                        InvalidationKind::Clear => {
                            for tier in &tiers {
                                let _ = tier.clear().await;
                            }
                        }
                    },
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.background.lock().await.push(handle);
    }

    async fn run_warmup(&self) {
        if !self.config.enable_warmup {
            return;
        }
        let Some(path) = &self.config.warmup_keys_file else {
            tracing::warn!("enable_warmup is set but warmup_keys_file is unset; skipping");
            return;
        };
        let source = FileWarmupSource::new(path);
        match source.load().await {
            Ok(entries) => {
                let mut encoded = HashMap::with_capacity(entries.len());
                for entry in entries {
                    match self.codec.encode(&entry.value) {
                        Ok(bytes) => {
                            encoded.insert(key::to_tier(&self.config.namespace, &entry.key), bytes);
                        }
                        Err(e) => tracing::warn!(error = %e, key = %entry.key, "warmup entry failed to encode"),
                    }
                }
                if !encoded.is_empty() {
                    for tier in &self.tiers {
                        if let Err(e) = tier.set_many(&encoded, Some(self.config.cache_ttl)).await {
                            tracing::warn!(error = %e, tier = tier.name(), "warmup set_many failed");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "warmup load failed"),
        }
    }

    async fn guarded_call<T, F, Fut>(&self, tier: &Arc<dyn Tier>, op: F) -> CacheResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        match self.guards.get(tier.name()) {
            Some(guard) => guard.call(op).await,
            None => op().await,
        }
    }

    /// Fetch a value, traversing tiers fastest-first and promoting hits
    /// back into every faster tier traversed.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let start = Instant::now();
        crate::key::validate_key(key)?;
        let tier_key = key::to_tier(&self.config.namespace, key);

        if let Some(tracker) = &self.adaptive_ttl {
            tracker.record_access(&tier_key);
        }

        for i in 0..self.tiers.len() {
            let tier = self.tiers[i].clone();
            let tk = tier_key.clone();
            let result = self.guarded_call(&tier, || {
                let tier = tier.clone();
                let tk = tk.clone();
                async move { tier.get(&tk).await }
            }).await;

            let (found, bytes) = match result {
                Ok(v) => v,
                Err(e) => {
                    self.stats.record_error(error_category(&e));
                    if !self.config.read_through {
                        break;
                    }
                    continue;
                }
            };
            if !found {
                if !self.config.read_through {
                    break;
                }
                continue;
            }

            match self.codec.decode(&bytes) {
                Ok(value) => {
                    self.stats.record_hit(tier.name());
                    self.stats.record_latency(start.elapsed());
                    for j in 0..i {
                        let faster = self.tiers[j].clone();
                        let tk = tier_key.clone();
                        let bytes = bytes.clone();
                        tokio::spawn(async move {
                            if let Err(e) = faster.set(&tk, bytes, None).await {
                                tracing::warn!(error = %e, tier = faster.name(), "promotion write failed");
                            }
                        });
                    }
                    return Ok(Some(value));
                }
                Err(e) => {
                    self.stats.record_error(error_category(&e));
                    let _ = tier.delete(&tier_key).await;
                    if !self.config.read_through {
                        break;
                    }
                    continue;
                }
            }
        }

        self.stats.record_miss();
        self.stats.record_latency(start.elapsed());
        Ok(None)
    }

    /// Compute the effective TTL for a write: `ttl_override ?? cache_ttl`,
    /// then adaptive-TTL-adjusted based on the key's access count whenever
    /// adaptive TTL is on — regardless of whether `base` came from an
    /// override or the default, per `SPEC_FULL.md` §4.7.
    fn effective_ttl(&self, tier_key: &str, ttl: Option<Duration>) -> Duration {
        let base = ttl.unwrap_or(self.config.cache_ttl);
        match &self.adaptive_ttl {
            Some(tracker) => {
                tracker.record_access(tier_key);
                tracker.effective_ttl(tier_key, base)
            }
            None => base,
        }
    }

    /// Encode and store a value. Write-through writes to every enabled
    /// tier; otherwise only the fastest.
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<bool> {
        let start = Instant::now();
        crate::key::validate_key(key)?;
        let tier_key = key::to_tier(&self.config.namespace, key);
        let encoded = self.codec.encode(value)?;
        let effective_ttl = self.effective_ttl(&tier_key, ttl);

        if self.tiers.is_empty() {
            return Ok(false);
        }

        let targets: &[Arc<dyn Tier>] = if self.config.write_through {
            &self.tiers
        } else {
            &self.tiers[..1]
        };

        let mut first_ok = false;
        for (i, tier) in targets.iter().enumerate() {
            let tier_c = tier.clone();
            let tk = tier_key.clone();
            let bytes = encoded.clone();
            let evictions_before = tier.eviction_count();
            let result = self
                .guarded_call(&tier_c, || {
                    let tier_c = tier_c.clone();
                    let tk = tk.clone();
                    let bytes = bytes.clone();
                    async move { tier_c.set(&tk, bytes, Some(effective_ttl)).await }
                })
                .await;
            for _ in 0..tier.eviction_count().saturating_sub(evictions_before) {
                self.stats.record_eviction();
            }
            match result {
                Ok(true) if i == 0 => first_ok = true,
                Ok(_) => {}
                Err(e) => {
                    self.stats.record_error(error_category(&e));
                    if i == 0 {
                        self.stats.record_latency(start.elapsed());
                        return Ok(false);
                    }
                    tracing::warn!(error = %e, tier = tier.name(), "write-through set failed on a slower tier");
                }
            }
        }

        if first_ok {
            self.stats.record_set();
        }
        self.stats.record_latency(start.elapsed());
        Ok(first_ok)
    }

    /// Delete a key from every enabled tier; returns whether any tier
    /// reported it as existing.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        crate::key::validate_key(key)?;
        let tier_key = key::to_tier(&self.config.namespace, key);
        let mut any = false;
        for tier in &self.tiers {
            match self.guarded_call(tier, || {
                let tier = tier.clone();
                let tk = tier_key.clone();
                async move { tier.delete(&tk).await }
            }).await {
                Ok(existed) => any = any || existed,
                Err(e) => self.stats.record_error(error_category(&e)),
            }
        }
        if any {
            self.stats.record_delete();
        }
        if let Some(bus) = &self.invalidation {
            bus.publish_key(&tier_key);
        }
        Ok(any)
    }

    /// Fetch several keys, cascading misses to slower tiers and
    /// promoting any hit served by a slower tier.
    pub async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, Value>> {
        let mut remaining: Vec<String> = keys
            .iter()
            .map(|k| key::to_tier(&self.config.namespace, k))
            .collect();
        let mut out: HashMap<String, Vec<u8>> = HashMap::new();
        let mut served_by: HashMap<String, usize> = HashMap::new();

        for (i, tier) in self.tiers.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            let found = match self.guarded_call(tier, || {
                let tier = tier.clone();
                let remaining = remaining.clone();
                async move { tier.get_many(&remaining).await }
            }).await {
                Ok(m) => m,
                Err(e) => {
                    self.stats.record_error(error_category(&e));
                    continue;
                }
            };
            for (k, v) in found {
                served_by.insert(k.clone(), i);
                out.insert(k.clone(), v);
            }
            remaining.retain(|k| !out.contains_key(k));
        }

        // Promote hits served by a slower tier into every faster tier.
        for (tier_key, served_index) in &served_by {
            if *served_index == 0 {
                continue;
            }
            let bytes = out.get(tier_key).cloned().unwrap_or_default();
            for faster in &self.tiers[..*served_index] {
                let faster = faster.clone();
                let tk = tier_key.clone();
                let bytes = bytes.clone();
                tokio::spawn(async move {
                    let mut one = HashMap::new();
                    one.insert(tk, bytes);
                    let _ = faster.set_many(&one, None).await;
                });
            }
        }

        let mut decoded = HashMap::with_capacity(out.len());
        for (tier_key, bytes) in out {
            if let Some(logical) = keys
                .iter()
                .find(|k| key::to_tier(&self.config.namespace, k) == tier_key)
            {
                match self.codec.decode(&bytes) {
                    Ok(value) => {
                        decoded.insert(logical.clone(), value);
                    }
                    Err(e) => self.stats.record_error(error_category(&e)),
                }
            }
        }
        Ok(decoded)
    }

    /// Encode and store several entries; delegates to each enabled
    /// tier's `set_many`.
    pub async fn set_many(&self, entries: &HashMap<String, Value>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut encoded = HashMap::with_capacity(entries.len());
        for (k, v) in entries {
            crate::key::validate_key(k)?;
            let tier_key = key::to_tier(&self.config.namespace, k);
            encoded.insert(tier_key, self.codec.encode(v)?);
        }
        let targets: &[Arc<dyn Tier>] = if self.config.write_through {
            &self.tiers
        } else {
            &self.tiers[..self.tiers.len().min(1)]
        };
        for tier in targets {
            let evictions_before = tier.eviction_count();
            if let Err(e) = self.guarded_call(tier, || {
                let tier = tier.clone();
                let encoded = encoded.clone();
                async move { tier.set_many(&encoded, ttl).await }
            }).await {
                self.stats.record_error(error_category(&e));
                tracing::warn!(error = %e, tier = tier.name(), "set_many failed on a tier");
            }
            for _ in 0..tier.eviction_count().saturating_sub(evictions_before) {
                self.stats.record_eviction();
            }
        }
        Ok(())
    }

    /// Remove every entry from every enabled tier. Never fails globally;
    /// per-tier failures are only recorded in statistics.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut handles = Vec::with_capacity(self.tiers.len());
        for tier in self.tiers.clone() {
            handles.push(tokio::spawn(async move { tier.clear().await }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => self.stats.record_error(error_category(&e)),
                Err(_) => self.stats.record_error("internal"),
            }
        }
        if let Some(bus) = &self.invalidation {
            bus.publish_clear();
        }
        Ok(())
    }

    /// Snapshot current statistics.
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The ordered tier list, fastest first. Exposed for integration
    /// tests and diagnostics that need to act on a specific tier
    /// directly (e.g. simulating a faster tier's restart, or inspecting
    /// raw stored bytes).
    pub fn tiers(&self) -> &[Arc<dyn Tier>] {
        &self.tiers
    }

    /// The engine's invalidation bus, when [`CacheConfig::enable_invalidation`]
    /// is set. An external shared-tier implementation can subscribe to this
    /// bus directly, or publish to it, to integrate with this engine's
    /// key/clear invalidation protocol without going through `CacheEngine`.
    pub fn invalidation_bus(&self) -> Option<&InvalidationBus> {
        self.invalidation.as_ref()
    }

    /// Wrap `self` in a guard whose `Drop` best-effort closes the engine if
    /// the caller never explicitly awaited [`CacheEngine::close`]. `Drop`
    /// cannot `.await`, so this bridges onto a detached blocking task and
    /// cannot surface close errors or guarantee completion before process
    /// exit; prefer calling `close` explicitly on every exit path and treat
    /// this purely as a backstop for early returns and panics.
    pub fn scoped(self: Arc<Self>) -> ScopedCacheEngine {
        ScopedCacheEngine { engine: Some(self) }
    }

    /// Idempotently release every resource: closes every tier
    /// (attempting all of them regardless of earlier failures) and
    /// aborts background tasks.
    pub async fn close(&self) -> CacheResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_err = None;
        for tier in &self.tiers {
            if let Err(e) = tier.close().await {
                tracing::warn!(error = %e, tier = tier.name(), "tier close failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
        match first_err {
            Some(e) => Err(CacheError::internal(format!("close encountered errors: {e}"))),
            None => Ok(()),
        }
    }
}

/// RAII wrapper returned by [`CacheEngine::scoped`]. Derefs to `CacheEngine`;
/// on drop, spawns a best-effort `close()` if one hasn't already run.
pub struct ScopedCacheEngine {
    engine: Option<Arc<CacheEngine>>,
}

impl std::ops::Deref for ScopedCacheEngine {
    type Target = CacheEngine;

    fn deref(&self) -> &CacheEngine {
        self.engine.as_ref().expect("engine taken only on drop")
    }
}

impl Drop for ScopedCacheEngine {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if engine.closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::task::spawn_blocking(move || {
                tokio::runtime::Handle::current().block_on(async move {
                    if let Err(e) = engine.close().await {
                        tracing::warn!(error = %e, "scoped engine close failed");
                    }
                });
            });
        }
    }
}
