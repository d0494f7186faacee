//! The disk-resident persistent tier, backed by `sled`.
//!
//! Grounded on the `sled`-backed L2 cache used elsewhere in this
//! codebase's database layer: one `sled::Db` per file, opened eagerly at
//! construction. Each tier instance owns exactly one namespace's file
//! (`<cache_file>_<namespace>.db`, or `<cache_file>.db` for the default
//! namespace), so cross-namespace isolation is structural; `clear()`
//! still filters by namespace prefix as a second line of defense.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};
use crate::key;
use crate::tier::Tier;

const SIDECAR_SUFFIX: &str = "__expires";

fn sidecar_key(tier_key: &str) -> String {
    format!("{tier_key}{SIDECAR_SUFFIX}")
}

fn is_sidecar_key(raw: &str) -> bool {
    raw.ends_with(SIDECAR_SUFFIX)
}

fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The on-disk tier. One instance owns one `sled::Db` file.
pub struct PersistentTier {
    name: String,
    namespace: String,
    default_ttl: Duration,
    db: sled::Db,
    path: PathBuf,
    /// Days after which an expired entry is dropped by a normal sweep.
    pub retention_days: u32,
    /// Fraction of live entries an aggressive sweep removes.
    pub aggressive_fraction: f64,
}

impl PersistentTier {
    /// Open (creating if absent) the database file for `namespace` under
    /// `cache_dir`.
    pub fn open(
        cache_dir: &Path,
        basename: &str,
        namespace: &str,
        default_ttl: Duration,
        retention_days: u32,
        aggressive_fraction: f64,
    ) -> CacheResult<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            CacheError::TierUnavailable(format!("cannot create cache_dir: {e}"))
        })?;
        let filename = if namespace == key::DEFAULT_NAMESPACE {
            format!("{basename}.db")
        } else {
            format!("{basename}_{namespace}.db")
        };
        let path = cache_dir.join(filename);
        let db = sled::open(&path)
            .map_err(|e| CacheError::TierUnavailable(format!("cannot open persistent tier: {e}")))?;
        Ok(PersistentTier {
            name: "persistent".to_string(),
            namespace: namespace.to_string(),
            default_ttl,
            db,
            path,
            retention_days,
            aggressive_fraction,
        })
    }

    /// Path to the underlying database file, exposed for diagnostics and
    /// for constructing the sibling file compaction writes into.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Approximate on-disk footprint, used by the caller to decide when
    /// to trigger an aggressive retention sweep.
    pub fn size_on_disk(&self) -> CacheResult<u64> {
        self.db
            .size_on_disk()
            .map_err(|e| CacheError::TierUnavailable(format!("size_on_disk failed: {e}")))
    }

    fn read_expiry(&self, tier_key: &str) -> CacheResult<Option<f64>> {
        match self
            .db
            .get(sidecar_key(tier_key))
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?
        {
            Some(ivec) => {
                let bytes: [u8; 8] = ivec.as_ref().try_into().map_err(|_| {
                    CacheError::Serialization("malformed expiry sidecar".to_string())
                })?;
                Ok(Some(f64::from_le_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn remove_pair(&self, tier_key: &str) -> CacheResult<()> {
        self.db
            .remove(tier_key)
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        self.db
            .remove(sidecar_key(tier_key))
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Run a retention sweep. `aggressive` trims a fraction of the
    /// oldest entries regardless of age; returns the number removed.
    pub async fn retention_sweep(&self, aggressive: bool) -> CacheResult<usize> {
        let now = now_unix_secs();
        let mut candidates: Vec<(f64, String)> = Vec::new();

        for item in self.db.iter() {
            let (raw_key, _) = item.map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
            let raw_key = String::from_utf8_lossy(&raw_key).to_string();
            if is_sidecar_key(&raw_key) {
                continue;
            }
            if let Some(expires_at) = self.read_expiry(&raw_key)? {
                candidates.push((expires_at, raw_key));
            }
        }
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut removed = 0usize;
        if aggressive {
            let quota = ((candidates.len() as f64) * self.aggressive_fraction).ceil() as usize;
            let quota = quota.max(10).min(candidates.len());
            for (_, key) in candidates.into_iter().take(quota) {
                self.remove_pair(&key)?;
                removed += 1;
            }
        } else {
            let horizon = now - (self.retention_days as f64) * 86_400.0;
            for (expires_at, key) in candidates {
                if expires_at < horizon {
                    self.remove_pair(&key)?;
                    removed += 1;
                }
            }
        }

        self.db
            .flush_async()
            .await
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        Ok(removed)
    }

    /// Atomically rewrite the backing file, keeping only live entries.
    /// The new file is built beside the old one and swapped in; on any
    /// failure before the rename, the original file is untouched.
    pub async fn compact(&mut self) -> CacheResult<()> {
        let compact_path = {
            let mut p = self.path.clone();
            let mut filename = p
                .file_name()
                .map(|f| f.to_os_string())
                .unwrap_or_default();
            filename.push(".compact");
            p.set_file_name(filename);
            p
        };
        if compact_path.exists() {
            std::fs::remove_dir_all(&compact_path).ok();
        }

        let fresh = sled::open(&compact_path)
            .map_err(|e| CacheError::TierUnavailable(format!("cannot open compaction target: {e}")))?;

        let now = now_unix_secs();
        for item in self.db.iter() {
            let (raw_key, value) = item.map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
            let raw_key_str = String::from_utf8_lossy(&raw_key).to_string();
            if is_sidecar_key(&raw_key_str) {
                continue;
            }
            let live = match self.read_expiry(&raw_key_str)? {
                Some(expires_at) => expires_at >= now,
                None => true,
            };
            if !live {
                continue;
            }
            fresh
                .insert(&raw_key, value.as_ref())
                .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
            if let Some(expires_at) = self.read_expiry(&raw_key_str)? {
                fresh
                    .insert(sidecar_key(&raw_key_str), &expires_at.to_le_bytes())
                    .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
            }
        }
        fresh
            .flush_async()
            .await
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        drop(fresh);

        // sled keeps its own directory layout; dropping the old handle
        // before the swap avoids holding two writers on the same path.
        let old_db = std::mem::replace(
            &mut self.db,
            sled::open(&compact_path)
                .map_err(|e| CacheError::TierUnavailable(format!("cannot reopen compacted db: {e}")))?,
        );
        drop(old_db);

        std::fs::remove_dir_all(&self.path).ok();
        std::fs::rename(&compact_path, &self.path)
            .map_err(|e| CacheError::TierUnavailable(format!("compaction rename failed: {e}")))?;
        self.db = sled::open(&self.path)
            .map_err(|e| CacheError::TierUnavailable(format!("cannot reopen after compaction: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Tier for PersistentTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, tier_key: &str) -> CacheResult<(bool, Vec<u8>)> {
        let expires_at = match self.read_expiry(tier_key)? {
            Some(v) => v,
            None => return Ok((false, Vec::new())),
        };
        if expires_at < now_unix_secs() {
            self.remove_pair(tier_key)?;
            return Ok((false, Vec::new()));
        }
        match self
            .db
            .get(tier_key)
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?
        {
            Some(ivec) => Ok((true, ivec.to_vec())),
            None => Ok((false, Vec::new())),
        }
    }

    async fn set(&self, tier_key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = now_unix_secs() + ttl.as_secs_f64();
        self.db
            .insert(tier_key, bytes)
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        self.db
            .insert(sidecar_key(tier_key), &expires_at.to_le_bytes())
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        Ok(true)
    }

    async fn delete(&self, tier_key: &str) -> CacheResult<bool> {
        let existed = self
            .db
            .contains_key(tier_key)
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        self.remove_pair(tier_key)?;
        Ok(existed)
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
        for (k, v) in entries {
            self.set(k, v.clone(), ttl).await?;
        }
        Ok(true)
    }

    async fn clear(&self) -> CacheResult<bool> {
        let mut keys_to_remove = Vec::new();
        for item in self.db.iter() {
            let (raw_key, _) = item.map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
            let raw_key = String::from_utf8_lossy(&raw_key).to_string();
            if is_sidecar_key(&raw_key) {
                continue;
            }
            if key::belongs_to_namespace(&self.namespace, &raw_key) || self.namespace == key::DEFAULT_NAMESPACE {
                keys_to_remove.push(raw_key);
            }
        }
        for k in keys_to_remove {
            self.remove_pair(&k)?;
        }
        self.db
            .flush_async()
            .await
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        Ok(true)
    }

    async fn close(&self) -> CacheResult<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| CacheError::TierUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tier(dir: &Path, namespace: &str) -> PersistentTier {
        PersistentTier::open(dir, "cache", namespace, Duration::from_secs(60), 30, 0.5).unwrap()
    }

    #[tokio::test]
    async fn post_set_read_returns_the_value() {
        let dir = tempfile::tempdir().unwrap();
        let t = open_tier(dir.path(), "default");
        t.set("a", b"hello".to_vec(), None).await.unwrap();
        let (found, bytes) = t.get("a").await.unwrap();
        assert!(found);
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn ttl_expiry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let t = PersistentTier::open(
            dir.path(),
            "cache",
            "default",
            Duration::from_millis(50),
            30,
            0.5,
        )
        .unwrap();
        t.set("a", b"v".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (found, _) = t.get("a").await.unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let t = open_tier(dir.path(), "default");
        t.set("a", b"v".to_vec(), None).await.unwrap();
        assert!(t.delete("a").await.unwrap());
        assert!(!t.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_share_a_directory_without_colliding() {
        let dir = tempfile::tempdir().unwrap();
        let a = open_tier(dir.path(), "tenant-a");
        let b = open_tier(dir.path(), "tenant-b");
        a.set("tenant-a:k", b"1".to_vec(), None).await.unwrap();
        b.set("tenant-b:k", b"2".to_vec(), None).await.unwrap();
        a.clear().await.unwrap();
        let (found, bytes) = b.get("tenant-b:k").await.unwrap();
        assert!(found);
        assert_eq!(bytes, b"2");
    }

    #[tokio::test]
    async fn retention_sweep_removes_only_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let t = open_tier(dir.path(), "default");
        t.set("fresh", b"v".to_vec(), Some(Duration::from_secs(600)))
            .await
            .unwrap();
        let removed = t.retention_sweep(false).await.unwrap();
        assert_eq!(removed, 0);
        let (found, _) = t.get("fresh").await.unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn compaction_preserves_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = open_tier(dir.path(), "default");
        t.set("a", b"1".to_vec(), Some(Duration::from_secs(600)))
            .await
            .unwrap();
        t.compact().await.unwrap();
        let (found, bytes) = t.get("a").await.unwrap();
        assert!(found);
        assert_eq!(bytes, b"1");
    }
}
