//! In-Memory Storage
//!
//! In-process cache layer with entry-count and byte-budget constraints and a
//! pluggable eviction policy. Entries live in an insertion-ordered map so the
//! FIFO policy and every tie-break follow insertion order.

use crate::cache::entry::CacheEntry;
use crate::cache::pattern::KeyPattern;
use crate::cache::storage::{CacheStorage, SupportsMemoryIntrospection};
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Eviction Policy
// =============================================================================

/// Policy for selecting the entry to evict when a constraint is hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used - evict the entry read or written longest ago
    #[default]
    Lru,
    /// Least Frequently Used - evict the entry with the fewest reads
    Lfu,
    /// First In First Out - evict the earliest inserted entry
    Fifo,
    /// Oldest write first, regardless of access pattern
    Ttl,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
            EvictionPolicy::Ttl => write!(f, "ttl"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(Error::Configuration(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Memory Storage Configuration
// =============================================================================

/// Callback invoked with every entry removed by delete, expiry or eviction
pub type EvictCallback = Arc<dyn Fn(&str, &CacheEntry) + Send + Sync>;

/// Configuration for memory storage
#[derive(Clone, Default)]
pub struct MemoryStorageConfig {
    /// Maximum number of entries (None = unbounded, 0 = store nothing)
    pub max_size: Option<usize>,
    /// Maximum bytes of entry payload (None = unbounded)
    pub max_memory: Option<u64>,
    /// Eviction policy
    pub eviction_policy: EvictionPolicy,
    /// Removal callback
    pub on_evict: Option<EvictCallback>,
}

impl MemoryStorageConfig {
    /// Bounded by entry count
    pub fn with_max_size(max_size: usize, eviction_policy: EvictionPolicy) -> Self {
        Self {
            max_size: Some(max_size),
            eviction_policy,
            ..Default::default()
        }
    }

    /// Bounded by bytes
    pub fn with_max_memory(max_memory: u64, eviction_policy: EvictionPolicy) -> Self {
        Self {
            max_memory: Some(max_memory),
            eviction_policy,
            ..Default::default()
        }
    }

    /// Install a removal callback
    pub fn on_evict<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &CacheEntry) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for MemoryStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorageConfig")
            .field("max_size", &self.max_size)
            .field("max_memory", &self.max_memory)
            .field("eviction_policy", &self.eviction_policy)
            .field("on_evict", &self.on_evict.is_some())
            .finish()
    }
}

// =============================================================================
// Memory State
// =============================================================================

/// A stored entry plus its eviction bookkeeping
#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Logical clock value of the last read or write (LRU index)
    last_access: u64,
    /// Number of reads (LFU index)
    access_count: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Entries in insertion order (FIFO index)
    entries: IndexMap<String, Slot>,
    /// Logical access clock; strictly increasing
    clock: u64,
    /// Sum of entry sizes
    usage_bytes: u64,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.shift_remove(key)?;
        self.usage_bytes = self.usage_bytes.saturating_sub(slot.entry.size);
        Some(slot.entry)
    }

    /// Pick the eviction victim; `min_by_key` keeps the first of equal keys,
    /// so ties resolve to the earliest inserted entry
    fn victim(&self, policy: EvictionPolicy, exclude: &str) -> Option<String> {
        let mut candidates = self.entries.iter().filter(|(k, _)| k.as_str() != exclude);
        let chosen = match policy {
            EvictionPolicy::Lru => candidates.min_by_key(|(_, s)| s.last_access),
            EvictionPolicy::Lfu => candidates.min_by_key(|(_, s)| s.access_count),
            EvictionPolicy::Fifo => candidates.next(),
            EvictionPolicy::Ttl => candidates.min_by_key(|(_, s)| s.entry.timestamp),
        };
        chosen.map(|(k, _)| k.clone())
    }

    fn remove_where<F>(&mut self, predicate: F) -> Vec<(String, CacheEntry)>
    where
        F: Fn(&str, &CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, s)| predicate(k, &s.entry))
            .map(|(k, _)| k.clone())
            .collect();

        keys.into_iter()
            .filter_map(|k| self.remove(&k).map(|e| (k, e)))
            .collect()
    }
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-process cache storage
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    config: MemoryStorageConfig,
    evictions: AtomicU64,
}

impl MemoryStorage {
    /// Create unbounded memory storage
    pub fn new() -> Self {
        Self::with_config(MemoryStorageConfig::default())
    }

    /// Create memory storage with full config
    pub fn with_config(config: MemoryStorageConfig) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            config,
            evictions: AtomicU64::new(0),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &MemoryStorageConfig {
        &self.config
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if no entries are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries removed by capacity constraints so far
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn notify_removed(&self, removed: &[(String, CacheEntry)]) {
        if let Some(callback) = &self.config.on_evict {
            for (key, entry) in removed {
                callback(key, entry);
            }
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SupportsMemoryIntrospection for MemoryStorage {
    fn memory_usage_bytes(&self) -> u64 {
        self.state.lock().usage_bytes
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            None => return Ok(None),
            Some(slot) => slot.entry.is_expired(),
        };

        if expired {
            let removed: Vec<_> = state.remove(key).map(|e| (key.to_string(), e)).into_iter().collect();
            drop(state);
            debug!(key = %key, "Expired entry removed on read");
            self.notify_removed(&removed);
            return Ok(None);
        }

        let tick = state.tick();
        let slot = match state.entries.get_mut(key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        slot.last_access = tick;
        slot.access_count += 1;
        slot.entry.record_access();
        Ok(Some(slot.entry.clone()))
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .get(key)
            .filter(|s| !s.entry.is_expired())
            .map(|s| s.entry.clone()))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        if self.config.max_size == Some(0) {
            debug!(key = %key, "Memory storage has zero capacity; entry not stored");
            return Ok(());
        }
        let policy = self.config.eviction_policy;
        let mut evicted = Vec::new();
        let mut state = self.state.lock();

        let old_size = state.entries.get(key).map(|s| s.entry.size);

        if let Some(max_size) = self.config.max_size {
            if old_size.is_none() && state.entries.len() >= max_size {
                if let Some(victim) = state.victim(policy, key) {
                    if let Some(e) = state.remove(&victim) {
                        evicted.push((victim, e));
                    }
                }
            }
        }

        if let Some(max_memory) = self.config.max_memory {
            let replaced = old_size.unwrap_or(0);
            while state.usage_bytes - replaced + entry.size > max_memory {
                let Some(victim) = state.victim(policy, key) else {
                    break;
                };
                match state.remove(&victim) {
                    Some(e) => evicted.push((victim, e)),
                    None => break,
                }
            }
        }

        let tick = state.tick();
        let size = entry.size;
        match state.entries.get_mut(key) {
            Some(slot) => {
                let previous = slot.entry.size;
                slot.entry = entry;
                slot.last_access = tick;
                state.usage_bytes = state.usage_bytes.saturating_sub(previous) + size;
            }
            None => {
                state.entries.insert(
                    key.to_string(),
                    Slot {
                        entry,
                        last_access: tick,
                        access_count: 0,
                    },
                );
                state.usage_bytes += size;
            }
        }
        drop(state);

        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!(
                key = %key,
                policy = %policy,
                evicted = evicted.len(),
                "Evicted entries to admit write"
            );
            self.notify_removed(&evicted);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.state.lock().remove(key);
        match removed {
            Some(entry) => {
                self.notify_removed(&[(key.to_string(), entry)]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.usage_bytes = 0;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().entries.keys().cloned().collect())
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.state.lock().entries.len() as u64)
    }

    async fn invalidate_by_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        let removed = self.state.lock().remove_where(|k, _| pattern.matches(k));
        self.notify_removed(&removed);
        Ok(removed.len() as u64)
    }

    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let removed = self.state.lock().remove_where(|_, e| e.has_tag(tag));
        self.notify_removed(&removed);
        Ok(removed.len() as u64)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.state.lock().remove_where(|_, e| e.is_expired());
        if !removed.is_empty() {
            debug!(removed = removed.len(), "Cleaned up expired entries");
        }
        self.notify_removed(&removed);
        Ok(removed.len() as u64)
    }

    fn memory_introspection(&self) -> Option<&dyn SupportsMemoryIntrospection> {
        Some(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::DEFAULT_TTL;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn test_entry(value: serde_json::Value) -> CacheEntry {
        CacheEntry::new(value, DEFAULT_TTL)
    }

    fn bounded(max_size: usize, policy: EvictionPolicy) -> MemoryStorage {
        MemoryStorage::with_config(MemoryStorageConfig::with_max_size(max_size, policy))
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = MemoryStorage::new();

        storage.set("file1", test_entry(json!("hello world"))).await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 1);
        assert_eq!(storage.memory_usage_bytes(), 13);

        let retrieved = storage.get("file1").await.unwrap().unwrap();
        assert_eq!(retrieved.value, json!("hello world"));
        assert_eq!(retrieved.hits, 1);

        let again = storage.get("file1").await.unwrap().unwrap();
        assert_eq!(again.hits, 2);

        assert!(storage.delete("file1").await.unwrap());
        assert!(!storage.delete("file1").await.unwrap());
        assert_eq!(storage.size().await.unwrap(), 0);
        assert_eq!(storage.memory_usage_bytes(), 0);
    }

    #[tokio::test]
    async fn test_update_existing() {
        let storage = MemoryStorage::new();

        storage.set("file1", test_entry(json!("short"))).await.unwrap();
        assert_eq!(storage.memory_usage_bytes(), 7);

        storage
            .set("file1", test_entry(json!("much longer data here")))
            .await
            .unwrap();
        assert_eq!(storage.memory_usage_bytes(), 23);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let storage = bounded(2, EvictionPolicy::Lru);

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("b", test_entry(json!(2))).await.unwrap();
        storage.get("a").await.unwrap();
        storage.set("c", test_entry(json!(3))).await.unwrap();

        assert!(storage.peek("a").await.unwrap().is_some());
        assert!(storage.peek("b").await.unwrap().is_none());
        assert!(storage.peek("c").await.unwrap().is_some());
        assert_eq!(storage.eviction_count(), 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_ignores_access() {
        let storage = bounded(2, EvictionPolicy::Fifo);

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("b", test_entry(json!(2))).await.unwrap();
        storage.get("a").await.unwrap();
        storage.set("c", test_entry(json!(3))).await.unwrap();

        assert!(storage.peek("a").await.unwrap().is_none());
        assert!(storage.peek("b").await.unwrap().is_some());
        assert!(storage.peek("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lfu_eviction() {
        let storage = bounded(2, EvictionPolicy::Lfu);

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("b", test_entry(json!(2))).await.unwrap();
        storage.get("a").await.unwrap();
        storage.get("a").await.unwrap();
        storage.get("b").await.unwrap();
        storage.set("c", test_entry(json!(3))).await.unwrap();

        assert!(storage.peek("a").await.unwrap().is_some());
        assert!(storage.peek("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lfu_tie_breaks_by_insertion_order() {
        let storage = bounded(3, EvictionPolicy::Lfu);

        for key in ["x", "y", "z"] {
            storage.set(key, test_entry(json!(key))).await.unwrap();
        }
        storage.set("w", test_entry(json!("w"))).await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["y", "z", "w"]);
    }

    #[tokio::test]
    async fn test_ttl_policy_evicts_oldest_write() {
        let storage = bounded(2, EvictionPolicy::Ttl);

        let mut old = test_entry(json!("old"));
        old.timestamp = Utc::now() - chrono::Duration::seconds(30);
        storage.set("newer-key", test_entry(json!("new"))).await.unwrap();
        storage.set("older-key", old).await.unwrap();
        storage.get("older-key").await.unwrap();

        storage.set("c", test_entry(json!("c"))).await.unwrap();

        assert!(storage.peek("older-key").await.unwrap().is_none());
        assert!(storage.peek("newer-key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replacing_key_does_not_evict() {
        let storage = bounded(2, EvictionPolicy::Lru);

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("b", test_entry(json!(2))).await.unwrap();
        storage.set("a", test_entry(json!(10))).await.unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.eviction_count(), 0);
        assert_eq!(storage.peek("a").await.unwrap().unwrap().value, json!(10));
    }

    #[tokio::test]
    async fn test_zero_capacity_stores_nothing() {
        let storage = bounded(0, EvictionPolicy::Lru);

        storage.set("a", test_entry(json!(1))).await.unwrap();

        assert_eq!(storage.len(), 0);
        assert!(storage.get("a").await.unwrap().is_none());
        assert_eq!(storage.eviction_count(), 0);
    }

    #[tokio::test]
    async fn test_max_memory_evicts_until_fit() {
        // each "xxxxxxxx" string entry measures 10 bytes
        let storage =
            MemoryStorage::with_config(MemoryStorageConfig::with_max_memory(40, EvictionPolicy::Fifo));

        for key in ["a", "b", "c"] {
            storage.set(key, test_entry(json!("xxxxxxxx"))).await.unwrap();
        }
        assert_eq!(storage.memory_usage_bytes(), 30);

        // 22 bytes: two evictions needed
        storage
            .set("big", test_entry(json!("xxxxxxxxxxxxxxxxxxxx")))
            .await
            .unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["c", "big"]);
        assert_eq!(storage.memory_usage_bytes(), 32);
        assert_eq!(storage.eviction_count(), 2);
    }

    #[tokio::test]
    async fn test_max_memory_empties_store_for_oversized_entry() {
        let storage =
            MemoryStorage::with_config(MemoryStorageConfig::with_max_memory(5, EvictionPolicy::Lru));

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("huge", test_entry(json!("0123456789"))).await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["huge"]);
    }

    #[tokio::test]
    async fn test_on_evict_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = MemoryStorageConfig::with_max_size(1, EvictionPolicy::Lru)
            .on_evict(move |key, _| sink.lock().push(key.to_string()));
        let storage = MemoryStorage::with_config(config);

        storage.set("a", test_entry(json!(1))).await.unwrap();
        storage.set("b", test_entry(json!(2))).await.unwrap();
        storage.delete("b").await.unwrap();

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_expiry_on_read() {
        let storage = MemoryStorage::new();

        storage
            .set("short", CacheEntry::new(json!("v"), Duration::from_millis(30)))
            .await
            .unwrap();
        storage.set("long", test_entry(json!("v"))).await.unwrap();

        assert!(storage.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(storage.get("short").await.unwrap().is_none());
        assert_eq!(storage.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let storage = MemoryStorage::new();

        let mut stale = test_entry(json!(1));
        stale.timestamp = Utc::now() - chrono::Duration::hours(2);
        storage.set("stale", stale).await.unwrap();
        storage.set("fresh", test_entry(json!(2))).await.unwrap();

        assert!(storage.peek("stale").await.unwrap().is_none());
        assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
        assert_eq!(storage.keys().await.unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let storage = MemoryStorage::new();

        storage.set("x", test_entry(json!(1)).with_tags(["g"])).await.unwrap();
        storage.set("y", test_entry(json!(2)).with_tags(["g", "h"])).await.unwrap();
        storage.set("z", test_entry(json!(3))).await.unwrap();

        assert_eq!(storage.invalidate_by_tag("g").await.unwrap(), 2);
        assert!(storage.get("z").await.unwrap().is_some());
        assert_eq!(storage.invalidate_by_tag("g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let storage = MemoryStorage::new();

        for key in ["user:1", "user:2", "order:1"] {
            storage.set(key, test_entry(json!(key))).await.unwrap();
        }

        let pattern = KeyPattern::regex("^user:").unwrap();
        assert_eq!(storage.invalidate_by_pattern(&pattern).await.unwrap(), 2);
        assert_eq!(storage.keys().await.unwrap(), vec!["order:1"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let storage = MemoryStorage::new();

        storage.set("file1", test_entry(json!("data1"))).await.unwrap();
        storage.set("file2", test_entry(json!("data2"))).await.unwrap();

        storage.clear().await.unwrap();

        assert!(storage.is_empty());
        assert_eq!(storage.memory_usage_bytes(), 0);
        assert!(storage.memory_introspection().is_some());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!("random".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::default().to_string(), "lru");
    }
}
