//! Black-box scenarios S1-S8 driving a fully constructed `CacheEngine`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tiered_cache::config::EvictionPolicy;
use tiered_cache::{CacheConfig, CacheEngine, Value};

/// Initializes a `tracing` subscriber writing to the test harness's
/// captured output, so circuit breaker transitions, retention sweeps,
/// and promotion-write failures are visible with `cargo test -- --nocapture`.
/// Idempotent across the many tests in this file.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn memory_config(max_size: usize, policy: EvictionPolicy) -> CacheConfig {
    CacheConfig {
        memory_cache_enabled: true,
        disk_cache_enabled: false,
        cache_max_size: max_size,
        eviction_policy: policy,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn s1_set_then_get_hits_memory() {
    init_tracing();
    let engine = CacheEngine::start(memory_config(10, EvictionPolicy::Lru))
        .await
        .unwrap();
    engine
        .set("u:1", &Value::Str("alice".to_string()), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    let value = engine.get("u:1").await.unwrap();
    assert_eq!(value, Some(Value::Str("alice".to_string())));
    let stats = engine.get_stats();
    assert_eq!(*stats.hits_by_tier.get("memory").unwrap_or(&0), 1);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s2_ttl_expiry_is_a_miss() {
    init_tracing();
    let engine = CacheEngine::start(memory_config(10, EvictionPolicy::Lru))
        .await
        .unwrap();
    engine
        .set("x", &Value::Str("y".to_string()), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(engine.get("x").await.unwrap(), None);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s3_lru_eviction_trace() {
    init_tracing();
    let engine = CacheEngine::start(memory_config(2, EvictionPolicy::Lru))
        .await
        .unwrap();
    engine.set("a", &Value::Int(1), None).await.unwrap();
    engine.set("b", &Value::Int(2), None).await.unwrap();
    engine.get("a").await.unwrap();
    engine.set("c", &Value::Int(3), None).await.unwrap();
    assert_eq!(engine.get("b").await.unwrap(), None);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s4_layered_memory_and_disk_promotes_on_hit() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = CacheConfig {
        memory_cache_enabled: true,
        disk_cache_enabled: true,
        cache_dir: dir.path().to_path_buf(),
        cache_max_size: 10,
        ..CacheConfig::default()
    };
    let engine = CacheEngine::start(cfg).await.unwrap();
    engine.set("k", &Value::Str("v".to_string()), None).await.unwrap();

    // Drop the memory tier's contents to simulate a restart, leaving the
    // disk tier as the only surviving source of truth.
    engine.tiers()[0].clear().await.unwrap();

    let value = engine.get("k").await.unwrap();
    assert_eq!(value, Some(Value::Str("v".to_string())));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s5_encryption_and_signing_roundtrip_a_nested_value() {
    init_tracing();
    let mut cfg = memory_config(10, EvictionPolicy::Lru);
    cfg.enable_encryption = true;
    cfg.encryption_key = "key-material".to_string();
    cfg.encryption_salt = "salt-material".to_string();
    cfg.enable_data_signing = true;
    cfg.signing_key = "signing-secret".to_string();
    let engine = CacheEngine::start(cfg).await.unwrap();

    let mut map = BTreeMap::new();
    map.insert("n".to_string(), Value::Int(42));
    map.insert("xs".to_string(), Value::Seq(vec![Value::Int(1), Value::Int(2)]));
    let value = Value::Map(map);

    engine.set("k", &value, None).await.unwrap();
    assert_eq!(engine.get("k").await.unwrap(), Some(value));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s6_tampered_signed_payload_is_not_found() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = CacheConfig {
        memory_cache_enabled: false,
        disk_cache_enabled: true,
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    cfg.enable_data_signing = true;
    cfg.signing_key = "signing-secret".to_string();
    let engine = CacheEngine::start(cfg).await.unwrap();
    engine.set("k", &Value::Int(7), None).await.unwrap();

    let tier = &engine.tiers()[0];
    let (found, mut bytes) = tier.get("k").await.unwrap();
    assert!(found);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    tier.set("k", bytes, None).await.unwrap();

    assert_eq!(engine.get("k").await.unwrap(), None);
    let stats = engine.get_stats();
    assert!(*stats.errors_by_category.get("integrity").unwrap_or(&0) >= 1);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn s7_namespace_isolation_on_shared_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg_a = CacheConfig {
        memory_cache_enabled: false,
        disk_cache_enabled: true,
        cache_dir: dir.path().to_path_buf(),
        namespace: "a".to_string(),
        ..CacheConfig::default()
    };
    let cfg_b = CacheConfig {
        namespace: "b".to_string(),
        ..cfg_a.clone()
    };
    let engine_a = CacheEngine::start(cfg_a).await.unwrap();
    let engine_b = CacheEngine::start(cfg_b).await.unwrap();

    engine_a.set("k", &Value::Int(1), None).await.unwrap();
    engine_b.set("k", &Value::Int(2), None).await.unwrap();
    engine_a.clear().await.unwrap();

    assert_eq!(engine_b.get("k").await.unwrap(), Some(Value::Int(2)));
    engine_a.close().await.unwrap();
    engine_b.close().await.unwrap();
}

#[tokio::test]
async fn s8_bulk_set_many_and_get_many() {
    init_tracing();
    let engine = CacheEngine::start(memory_config(10, EvictionPolicy::Lru))
        .await
        .unwrap();
    let mut entries = HashMap::new();
    entries.insert("k1".to_string(), Value::Int(1));
    entries.insert("k2".to_string(), Value::Int(2));
    entries.insert("k3".to_string(), Value::Int(3));
    engine.set_many(&entries, None).await.unwrap();

    let result = engine
        .get_many(&["k1".to_string(), "k2".to_string(), "k4".to_string()])
        .await
        .unwrap();

    assert_eq!(result.get("k1"), Some(&Value::Int(1)));
    assert_eq!(result.get("k2"), Some(&Value::Int(2)));
    assert!(!result.contains_key("k4"));
    engine.close().await.unwrap();
}
