//! Warmup loader: seeds entries from an external source at engine start.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CacheError, CacheResult};
use crate::value::Value;

/// A single seed record read by a [`WarmupSource`].
#[derive(Debug, Clone)]
pub struct WarmupEntry {
    /// Logical key.
    pub key: String,
    /// Value to seed.
    pub value: Value,
}

/// A source of warmup entries, abstracted so tests can supply an
/// in-memory source instead of a file.
#[async_trait]
pub trait WarmupSource: Send + Sync {
    /// Load every entry this source provides. Errors are logged by the
    /// caller and never fatal.
    async fn load(&self) -> CacheResult<Vec<WarmupEntry>>;
}

/// A JSON-lines record: `{"key": "...", "value": <json>}`. Only a
/// restricted subset of JSON types are accepted, matching this crate's
/// own value type.
#[derive(Debug, Deserialize)]
struct WarmupRecord {
    key: String,
    value: serde_json::Value,
}

fn json_to_value(json: serde_json::Value) -> CacheResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(CacheError::Serialization(format!(
                    "warmup value number out of range: {n}"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_value(item)?);
            }
            Ok(Value::Seq(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k, json_to_value(v)?);
            }
            Ok(Value::Map(out))
        }
    }
}

/// Reads `(key, value)` pairs from a newline-delimited JSON file.
pub struct FileWarmupSource {
    path: PathBuf,
}

impl FileWarmupSource {
    /// Build a source reading from `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileWarmupSource {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl WarmupSource for FileWarmupSource {
    async fn load(&self) -> CacheResult<Vec<WarmupEntry>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CacheError::TierUnavailable(format!("cannot read warmup file: {e}")))?;

        let mut entries = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: WarmupRecord = serde_json::from_str(line).map_err(|e| {
                CacheError::Serialization(format!("warmup file line {}: {e}", line_no + 1))
            })?;
            entries.push(WarmupEntry {
                key: record.key,
                value: json_to_value(record.value)?,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InMemorySource(Vec<WarmupEntry>);

    #[async_trait]
    impl WarmupSource for InMemorySource {
        async fn load(&self) -> CacheResult<Vec<WarmupEntry>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn in_memory_source_round_trips() {
        let source = InMemorySource(vec![WarmupEntry {
            key: "k".to_string(),
            value: Value::Int(1),
        }]);
        let entries = source.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "k");
    }

    #[tokio::test]
    async fn file_source_parses_jsonlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmup.jsonl");
        tokio::fs::write(
            &path,
            "{\"key\":\"u:1\",\"value\":\"alice\"}\n{\"key\":\"u:2\",\"value\":42}\n",
        )
        .await
        .unwrap();

        let source = FileWarmupSource::new(&path);
        let entries = source.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "u:1");
        assert_eq!(entries[0].value, Value::Str("alice".to_string()));
        assert_eq!(entries[1].value, Value::Int(42));
    }

    #[tokio::test]
    async fn missing_file_is_an_error_not_a_panic() {
        let source = FileWarmupSource::new("/nonexistent/path/warmup.jsonl");
        assert!(source.load().await.is_err());
    }
}
