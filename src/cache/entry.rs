//! Cache Entry Types
//!
//! Defines cache keys, entries, and the write options used to build them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default entry lifetime: 1 hour
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Size assumed for an entry whose value cannot be measured
pub const DEFAULT_ENTRY_SIZE: u64 = 1024;

// =============================================================================
// Cache Key
// =============================================================================

/// Identifier for cached data, optionally scoped to a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Namespace (e.g., "users", "sessions")
    pub namespace: Option<String>,
    /// Key within the namespace
    pub id: String,
}

impl CacheKey {
    /// Create an unscoped key
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            namespace: None,
            id: id.into(),
        }
    }

    /// Create a key scoped to a namespace
    pub fn namespaced(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            id: id.into(),
        }
    }

    /// Create a key from an optional namespace
    pub fn scoped(namespace: Option<&str>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            id: id.into(),
        }
    }

    /// Get the string representation used by every storage backend
    pub fn to_storage_key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, self.id),
            None => self.id.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with access and eviction metadata
///
/// Every storage backend owns its own copy of an entry, so the same logical
/// key may carry different `hits`/`last_accessed` values in different layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload
    pub value: Value,
    /// Time the entry was written
    pub timestamp: DateTime<Utc>,
    /// Entry lifetime
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
    /// Number of successful reads
    pub hits: u64,
    /// Time of the last successful read
    pub last_accessed: DateTime<Utc>,
    /// Invalidation labels
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Approximate serialized size in bytes
    pub size: u64,
    /// Backend-local free-form metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CacheEntry {
    /// Create a new entry, measuring its size once
    pub fn new(value: Value, ttl: Duration) -> Self {
        let now = Utc::now();
        let size = estimate_size(&value);
        Self {
            value,
            timestamp: now,
            ttl,
            hits: 0,
            last_accessed: now,
            tags: BTreeSet::new(),
            size,
            metadata: Map::new(),
        }
    }

    /// Attach invalidation tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record a successful read
    pub fn record_access(&mut self) {
        self.hits += 1;
        self.last_accessed = Utc::now();
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }

    /// Time elapsed since the entry was written
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Lifetime left before expiry
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }

    /// Check whether the entry carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Serialize-and-measure the payload, falling back to [`DEFAULT_ENTRY_SIZE`]
pub fn estimate_size(value: &Value) -> u64 {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len() as u64,
        Err(_) => DEFAULT_ENTRY_SIZE,
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// =============================================================================
// Write Options
// =============================================================================

/// Predicate deciding whether a value is worth caching
pub type ShouldCache = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Options for a single `set`
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Entry lifetime (defaults to the manager's default TTL)
    pub ttl: Option<Duration>,
    /// Invalidation labels
    pub tags: Vec<String>,
    /// Gate: when it returns false nothing is written
    pub should_cache: Option<ShouldCache>,
    /// Free-form metadata stored with the entry
    pub metadata: Map<String, Value>,
}

impl SetOptions {
    /// Options with an explicit TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    /// Add tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Install a caching gate
    pub fn should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetOptions")
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .field("should_cache", &self.should_cache.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_creation() {
        let key = CacheKey::new("user:1");
        assert_eq!(key.namespace, None);
        assert_eq!(key.to_storage_key(), "user:1");

        let key = CacheKey::namespaced("sessions", "abc");
        assert_eq!(key.to_storage_key(), "sessions:abc");
        assert_eq!(key.to_string(), "sessions:abc");

        assert_eq!(CacheKey::scoped(None, "a"), CacheKey::new("a"));
        assert_eq!(CacheKey::scoped(Some("ns"), "a"), CacheKey::namespaced("ns", "a"));
    }

    #[test]
    fn test_entry_size_measured_once() {
        let entry = CacheEntry::new(json!({"name": "alice"}), DEFAULT_TTL);
        assert_eq!(entry.size, br#"{"name":"alice"}"#.len() as u64);
        assert_eq!(entry.hits, 0);
        assert_eq!(entry.timestamp, entry.last_accessed);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(3600));
        assert!(!entry.is_expired());
        assert!(entry.remaining_ttl() > Duration::from_secs(3500));

        let mut stale = CacheEntry::new(json!(1), Duration::from_millis(10));
        stale.timestamp = Utc::now() - chrono::Duration::seconds(1);
        assert!(stale.is_expired());
        assert_eq!(stale.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_record_access() {
        let mut entry = CacheEntry::new(json!("v"), DEFAULT_TTL).with_tags(["a", "b"]);
        let written = entry.timestamp;
        entry.record_access();
        entry.record_access();
        assert_eq!(entry.hits, 2);
        assert_eq!(entry.timestamp, written);
        assert!(entry.last_accessed >= written);
        assert!(entry.has_tag("a"));
        assert!(!entry.has_tag("c"));
    }

    #[test]
    fn test_entry_serde_keeps_ttl_in_millis() {
        let entry = CacheEntry::new(json!([1, 2, 3]), Duration::from_millis(1500)).with_tags(["g"]);
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded["ttl"], json!(1500));

        let decoded: CacheEntry = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_set_options_builder() {
        let options = SetOptions::with_ttl(Duration::from_secs(5))
            .tags(["x", "y"])
            .should_cache(|v| !v.is_null());
        assert_eq!(options.ttl, Some(Duration::from_secs(5)));
        assert_eq!(options.tags, vec!["x".to_string(), "y".to_string()]);
        let gate = options.should_cache.as_ref().unwrap();
        assert!(gate(&json!(1)));
        assert!(!gate(&Value::Null));
    }
}
