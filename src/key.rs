//! Key validation and namespace resolution.
//!
//! Maps logical keys to tier-local keys (`to_tier`) and back
//! (`from_tier`), and enumerates only the current namespace for
//! scan-like operations (`clear`, retention sweeps).

use crate::error::{CacheError, CacheResult};

/// Maximum encoded key length, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// The namespace whose mapping is the identity (no prefix).
pub const DEFAULT_NAMESPACE: &str = "default";

/// Validate a logical key: non-empty, UTF-8, at most [`MAX_KEY_LEN`]
/// bytes, no control characters.
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::Key("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::Key(format!(
            "key length {} exceeds maximum of {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(CacheError::Key(
            "key must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Map a logical key to its tier-local form, `"<namespace>:<key>"`, or the
/// identity when `namespace == "default"`.
pub fn to_tier(namespace: &str, key: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        key.to_string()
    } else {
        format!("{namespace}:{key}")
    }
}

/// Inverse of [`to_tier`]: strip the namespace prefix the given namespace
/// would have added. Returns `None` if `tier_key` does not belong to
/// `namespace`.
pub fn from_tier<'a>(namespace: &str, tier_key: &'a str) -> Option<&'a str> {
    if namespace == DEFAULT_NAMESPACE {
        Some(tier_key)
    } else {
        let prefix = format!("{namespace}:");
        tier_key.strip_prefix(prefix.as_str())
    }
}

/// Whether a tier-local key belongs to the given namespace, used by
/// `clear()` and retention sweeps to enumerate only their own entries.
pub fn belongs_to_namespace(namespace: &str, tier_key: &str) -> bool {
    from_tier(namespace, tier_key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_is_identity() {
        assert_eq!(to_tier("default", "k"), "k");
        assert_eq!(from_tier("default", "k"), Some("k"));
    }

    #[test]
    fn named_namespace_prefixes() {
        assert_eq!(to_tier("tenant-a", "k"), "tenant-a:k");
        assert_eq!(from_tier("tenant-a", "tenant-a:k"), Some("k"));
        assert_eq!(from_tier("tenant-b", "tenant-a:k"), None);
    }

    #[test]
    fn rejects_empty_and_oversized_and_control_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_key("bad\u{0007}key").is_err());
        assert!(validate_key("good-key").is_ok());
    }

    #[test]
    fn namespace_isolation_roundtrip() {
        assert!(belongs_to_namespace("a", "a:k1"));
        assert!(!belongs_to_namespace("b", "a:k1"));
    }
}
