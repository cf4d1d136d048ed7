//! In-process key/value node
//!
//! Implements the same command semantics as a Redis node (string TTLs, sets
//! with optional expiry, conditional writes, glob KEYS) without a network. Used for local development and as the
//! contract double in tests.

use super::client::{KvClient, KvConnector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
    ttl_secs: u64,
}

#[derive(Default)]
struct StoredSet {
    members: BTreeSet<String>,
    expires_at: Option<Instant>,
}

impl StoredSet {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A single in-process node
pub struct InMemoryKvClient {
    endpoint: String,
    strings: DashMap<String, StoredValue>,
    sets: DashMap<String, StoredSet>,
    available: AtomicBool,
    failing: DashSet<String>,
}

impl InMemoryKvClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            strings: DashMap::new(),
            sets: DashMap::new(),
            available: AtomicBool::new(true),
            failing: DashSet::new(),
        }
    }

    /// Simulate the node going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Make one command fail while the rest of the node keeps working
    pub fn fail_command(&self, operation: &str) {
        self.failing.insert(operation.to_string());
    }

    pub fn restore_command(&self, operation: &str) {
        self.failing.remove(operation);
    }

    /// TTL the key was last written with, if it is live
    pub fn ttl_secs(&self, key: &str) -> Option<u64> {
        self.strings
            .get(key)
            .filter(|v| v.expires_at > Instant::now())
            .map(|v| v.ttl_secs)
    }

    /// Whether a key of any type exists
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.ttl_secs(key).is_some() || self.sets.get(key).map_or(false, |set| set.is_live(now))
    }

    /// Time left before a key expires; `None` for missing or persistent keys
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let expires_at = match self.strings.get(key) {
            Some(v) => Some(v.expires_at),
            None => self.sets.get(key).and_then(|set| set.expires_at),
        }?;
        expires_at.checked_duration_since(now)
    }

    fn check(&self, operation: &str) -> Result<()> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(Error::distributed(operation, Some(&self.endpoint), "node unavailable"));
        }
        if self.failing.contains(operation) {
            return Err(Error::distributed(operation, Some(&self.endpoint), "command failed"));
        }
        Ok(())
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.strings.retain(|_, v| v.expires_at > now);
        self.sets.retain(|_, set| set.is_live(now));
    }
}

/// Translate a Redis glob into the syntax of the `glob` crate
fn to_glob_pattern(redis_pattern: &str) -> Result<glob::Pattern> {
    let mut translated = String::with_capacity(redis_pattern.len());
    let mut chars = redis_pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => translated.push_str(&glob::Pattern::escape(&escaped.to_string())),
                None => translated.push_str(&glob::Pattern::escape("\\")),
            },
            other => translated.push(other),
        }
    }
    glob::Pattern::new(&translated).map_err(|e| Error::InvalidPattern {
        pattern: redis_pattern.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl KvClient for InMemoryKvClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check("get")?;
        let now = Instant::now();
        let expired = match self.strings.get(key) {
            Some(v) if v.expires_at > now => return Ok(Some(v.bytes.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.strings.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        self.check("setex")?;
        self.sets.remove(key);
        self.strings.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
                ttl_secs,
            },
        );
        Ok(())
    }

    async fn set_xx(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        self.check("set")?;
        let now = Instant::now();
        let Some(mut stored) = self.strings.get_mut(key) else {
            return Ok(false);
        };
        if stored.expires_at <= now {
            return Ok(false);
        }
        *stored = StoredValue {
            bytes: value.to_vec(),
            expires_at: now + Duration::from_secs(ttl_secs),
            ttl_secs,
        };
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check("del")?;
        self.purge_expired();
        let mut removed = 0;
        for key in keys {
            if self.strings.remove(key).is_some() || self.sets.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check("keys")?;
        self.purge_expired();
        let pattern = to_glob_pattern(pattern)?;
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .map(|e| e.key().clone())
            .chain(self.sets.iter().map(|e| e.key().clone()))
            .filter(|k| pattern.matches(k))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check("sadd")?;
        let now = Instant::now();
        let mut set = self.sets.entry(key.to_string()).or_default();
        if !set.is_live(now) {
            *set = StoredSet::default();
        }
        set.members.insert(member.to_string());
        Ok(())
    }

    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.check("expire")?;
        let now = Instant::now();
        let target = now + Duration::from_secs(ttl_secs);
        if let Some(mut stored) = self.strings.get_mut(key) {
            if stored.expires_at > now && stored.expires_at < target {
                stored.expires_at = target;
            }
            return Ok(());
        }
        if let Some(mut set) = self.sets.get_mut(key) {
            match set.expires_at {
                Some(at) if at <= now => {}
                Some(at) if at >= target => {}
                _ => set.expires_at = Some(target),
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check("smembers")?;
        let now = Instant::now();
        Ok(self
            .sets
            .get(key)
            .filter(|set| set.is_live(now))
            .map(|set| set.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping")
    }
}

/// Hands out one shared in-process node per endpoint, so data survives
/// reconnects the way it would on a real server
#[derive(Default)]
pub struct InMemoryConnector {
    nodes: DashMap<String, Arc<InMemoryKvClient>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node behind an endpoint, created on first use
    pub fn node(&self, endpoint: &str) -> Arc<InMemoryKvClient> {
        self.nodes
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(InMemoryKvClient::new(endpoint)))
            .clone()
    }
}

#[async_trait]
impl KvConnector for InMemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn KvClient>> {
        let node = self.node(endpoint);
        node.check("connect")?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_string_and_set_commands() {
        let node = InMemoryKvClient::new("memory://a");
        node.set_ex("cache:a", b"1", 60).await.unwrap();
        node.sadd("cache:tags:t", "a").await.unwrap();

        assert_eq!(node.get("cache:a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(node.ttl_secs("cache:a"), Some(60));
        assert_eq!(node.smembers("cache:tags:t").await.unwrap(), vec!["a".to_string()]);
        assert_eq!(
            node.keys("cache:*").await.unwrap(),
            vec!["cache:a".to_string(), "cache:tags:t".to_string()]
        );

        let removed = node
            .del(&["cache:a".into(), "cache:tags:t".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(node.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_escaped_glob() {
        let node = InMemoryKvClient::new("memory://a");
        node.set_ex("a*b", b"1", 60).await.unwrap();
        node.set_ex("axb", b"1", 60).await.unwrap();

        assert_eq!(node.keys("a\\*b").await.unwrap(), vec!["a*b".to_string()]);
        assert_eq!(node.keys("a*b").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conditional_write_needs_live_key() {
        let node = InMemoryKvClient::new("memory://a");
        assert!(!node.set_xx("k", b"1", 60).await.unwrap());
        assert!(!node.contains("k"));

        node.set_ex("k", b"1", 60).await.unwrap();
        assert!(node.set_xx("k", b"2", 30).await.unwrap());
        assert_eq!(node.get("k").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(node.ttl_secs("k"), Some(30));

        node.del(&["k".into()]).await.unwrap();
        assert!(!node.set_xx("k", b"3", 60).await.unwrap());
        assert_eq!(node.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_only_extends() {
        let node = InMemoryKvClient::new("memory://a");
        node.sadd("s", "a").await.unwrap();
        assert_eq!(node.expires_in("s"), None);

        node.expire_at_least("s", 10).await.unwrap();
        let first = node.expires_in("s").unwrap();
        assert!(first > Duration::from_secs(9) && first <= Duration::from_secs(10));

        node.expire_at_least("s", 5).await.unwrap();
        assert!(node.expires_in("s").unwrap() > Duration::from_secs(9));

        node.expire_at_least("s", 60).await.unwrap();
        assert!(node.expires_in("s").unwrap() > Duration::from_secs(59));

        // missing keys stay missing
        node.expire_at_least("absent", 60).await.unwrap();
        assert!(!node.contains("absent"));
    }

    #[tokio::test]
    async fn test_failed_command() {
        let node = InMemoryKvClient::new("memory://a");
        node.fail_command("sadd");

        let err = node.sadd("s", "a").await.unwrap_err();
        assert_matches!(err, Error::Distributed { .. });
        node.set_ex("k", b"1", 60).await.unwrap();

        node.restore_command("sadd");
        node.sadd("s", "a").await.unwrap();
        assert!(node.contains("s"));
    }

    #[tokio::test]
    async fn test_unavailable_node() {
        let connector = InMemoryConnector::new();
        connector.node("memory://down").set_available(false);

        let err = connector.connect("memory://down").await.err().unwrap();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_connector_shares_nodes() {
        let connector = InMemoryConnector::new();
        let first = connector.connect("memory://a").await.unwrap();
        first.set_ex("k", b"v", 60).await.unwrap();

        let second = connector.connect("memory://a").await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
