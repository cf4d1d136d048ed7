//! Distributed Storage
//!
//! Redis-compatible backend. Entries are serialized with a pluggable
//! [`EntrySerializer`] and written with `SETEX`; tags are tracked in
//! per-tag sets stored next to the data. A fixed node list is treated as a
//! cluster and keys are routed with a deterministic string hash.

mod client;
mod in_memory;

pub use client::{escape_glob, KvClient, KvConnector, RedisConnector, RedisKvClient};
pub use in_memory::{InMemoryConnector, InMemoryKvClient};

use super::CacheStorage;
use crate::cache::entry::CacheEntry;
use crate::cache::pattern::KeyPattern;
use crate::cache::serializer::{EntrySerializer, SerializerKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Infix separating tag index keys from data keys
const TAG_INDEX_INFIX: &str = "tags:";

// =============================================================================
// Configuration
// =============================================================================

/// Distributed backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedStorageConfig {
    /// Node endpoints; more than one enables cluster routing
    pub nodes: Vec<String>,
    /// Prefix applied to every key this backend writes. Keys starting with
    /// `tags:` are reserved for the tag index under this prefix and cannot
    /// be stored.
    pub key_prefix: String,
    /// Entry codec
    pub serializer: SerializerKind,
    /// Bound on every wire call
    pub operation_timeout_ms: u64,
}

impl Default for DistributedStorageConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["redis://127.0.0.1:6379".to_string()],
            key_prefix: "cache:".to_string(),
            serializer: SerializerKind::Json,
            operation_timeout_ms: 2_000,
        }
    }
}

impl DistributedStorageConfig {
    /// Single-endpoint configuration
    pub fn single(endpoint: impl Into<String>) -> Self {
        Self {
            nodes: vec![endpoint.into()],
            ..Default::default()
        }
    }

    /// Cluster configuration over a fixed node list
    pub fn cluster<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Node index for a key: 31-multiplier string hash (over UTF-16 code units,
/// wrapping at 32 bits) modulo the node count
pub fn node_index(key: &str, nodes: usize) -> usize {
    if nodes <= 1 {
        return 0;
    }
    let hash = key
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
    hash.unsigned_abs() as usize % nodes
}

type Nodes = Arc<Vec<Arc<dyn KvClient>>>;

// =============================================================================
// Distributed Storage
// =============================================================================

/// Redis-compatible storage backend
pub struct DistributedStorage {
    config: DistributedStorageConfig,
    serializer: Arc<dyn EntrySerializer>,
    connector: Arc<dyn KvConnector>,
    nodes: RwLock<Option<Nodes>>,
}

impl DistributedStorage {
    /// Create a backend that talks to Redis
    pub fn new(config: DistributedStorageConfig) -> Self {
        Self::with_connector(config, Arc::new(RedisConnector::default()))
    }

    /// Create a backend with a custom wire connector
    pub fn with_connector(config: DistributedStorageConfig, connector: Arc<dyn KvConnector>) -> Self {
        let serializer = config.serializer.build();
        Self {
            config,
            serializer,
            connector,
            nodes: RwLock::new(None),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &DistributedStorageConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.nodes.read().is_some()
    }

    /// Open a client for every configured node
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.config.nodes.is_empty() {
            return Err(Error::Configuration(
                "distributed storage requires at least one node".to_string(),
            ));
        }

        let timeout = self.config.operation_timeout();
        let attempts = self.config.nodes.iter().map(|endpoint| async move {
            match tokio::time::timeout(timeout, self.connector.connect(endpoint)).await {
                Ok(Ok(client)) => Ok(client),
                Ok(Err(e @ Error::Distributed { .. })) => Err(e),
                Ok(Err(e)) => Err(Error::distributed("connect", Some(endpoint), e.to_string())),
                Err(_) => Err(Error::distributed(
                    "connect",
                    Some(endpoint),
                    format!("timed out after {:?}", timeout),
                )),
            }
        });
        let clients = join_all(attempts)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        info!(
            nodes = clients.len(),
            prefix = %self.config.key_prefix,
            serializer = self.serializer.name(),
            "Distributed storage connected"
        );
        *self.nodes.write() = Some(Arc::new(clients));
        Ok(())
    }

    /// Close every node client; a no-op when not connected
    pub async fn disconnect(&self) -> Result<()> {
        let taken = self.nodes.write().take();
        let Some(nodes) = taken else {
            return Ok(());
        };
        let results = join_all(nodes.iter().map(|node| node.close())).await;
        for (node, result) in nodes.iter().zip(results) {
            if let Err(e) = result {
                warn!(node = %node.endpoint(), error = %e, "Failed to close node client");
                return Err(Error::distributed("disconnect", Some(node.endpoint()), e.to_string()));
            }
        }
        info!("Distributed storage disconnected");
        Ok(())
    }

    fn connected(&self, operation: &str) -> Result<Nodes> {
        self.nodes.read().clone().ok_or_else(|| Error::NotConnected {
            operation: operation.to_string(),
        })
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}{}", self.config.key_prefix, TAG_INDEX_INFIX, tag)
    }

    /// Strip the prefix from a stored key; tag index keys map to `None`
    fn raw_key<'a>(&self, stored: &'a str) -> Option<&'a str> {
        stored
            .strip_prefix(self.config.key_prefix.as_str())
            .filter(|raw| !raw.starts_with(TAG_INDEX_INFIX))
    }

    fn route<'a>(&self, nodes: &'a Nodes, key: &str) -> &'a Arc<dyn KvClient> {
        &nodes[node_index(key, nodes.len())]
    }

    /// Run a wire call under the operation timeout
    async fn bounded<T>(
        &self,
        node: &dyn KvClient,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.config.operation_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                layer: node.endpoint().to_string(),
                operation: operation.to_string(),
                timeout,
            })?
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        let millis = ttl.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }

    async fn fetch(&self, key: &str, operation: &str) -> Result<Option<(Arc<dyn KvClient>, CacheEntry)>> {
        let nodes = self.connected(operation)?;
        let node = self.route(&nodes, key).clone();
        let stored = self.data_key(key);

        let Some(bytes) = self.bounded(node.as_ref(), operation, node.get(&stored)).await? else {
            return Ok(None);
        };
        let entry = self.serializer.deserialize(&bytes)?;

        if entry.is_expired() {
            self.bounded(node.as_ref(), "delete", node.del(&[stored])).await?;
            debug!(key = %key, "Expired distributed entry removed");
            return Ok(None);
        }
        Ok(Some((node, entry)))
    }

    /// Stored data keys on one node, prefix stripped
    async fn node_keys(&self, node: &Arc<dyn KvClient>) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.config.key_prefix));
        let stored = self.bounded(node.as_ref(), "keys", node.keys(&pattern)).await?;
        Ok(stored
            .iter()
            .filter_map(|k| self.raw_key(k))
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl CacheStorage for DistributedStorage {
    fn backend(&self) -> &str {
        "distributed"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some((node, mut entry)) = self.fetch(key, "get").await? else {
            return Ok(None);
        };
        entry.record_access();

        let stored = self.data_key(key);
        let ttl_secs = Self::ttl_secs(entry.remaining_ttl());
        let serializer = self.serializer.clone();
        let timeout = self.config.operation_timeout();
        let snapshot = entry.clone();
        tokio::spawn(async move {
            // XX: a key deleted or invalidated since the read stays gone
            let write = async {
                let bytes = serializer.serialize(&snapshot)?;
                node.set_xx(&stored, &bytes, ttl_secs).await
            };
            match tokio::time::timeout(timeout, write).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => debug!(key = %stored, "Entry removed before access metadata was persisted"),
                Ok(Err(e)) => debug!(key = %stored, error = %e, "Failed to persist access metadata"),
                Err(_) => debug!(key = %stored, "Timed out persisting access metadata"),
            }
        });

        Ok(Some(entry))
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let nodes = self.connected("peek")?;
        let node = self.route(&nodes, key);
        let stored = self.data_key(key);
        match self.bounded(node.as_ref(), "peek", node.get(&stored)).await? {
            Some(bytes) => {
                let entry = self.serializer.deserialize(&bytes)?;
                Ok((!entry.is_expired()).then_some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        if key.starts_with(TAG_INDEX_INFIX) {
            return Err(Error::cache(
                "set",
                format!("key '{}' uses the reserved '{}' prefix", key, TAG_INDEX_INFIX),
            ));
        }
        let nodes = self.connected("set")?;
        let node = self.route(&nodes, key);
        let bytes = self.serializer.serialize(&entry)?;
        let ttl_secs = Self::ttl_secs(entry.ttl);

        // Index first: a data key never exists without its tag memberships
        for tag in &entry.tags {
            let index_key = self.tag_key(tag);
            let index_node = self.route(&nodes, &index_key);
            self.bounded(index_node.as_ref(), "set", index_node.sadd(&index_key, key))
                .await?;
            self.bounded(
                index_node.as_ref(),
                "set",
                index_node.expire_at_least(&index_key, ttl_secs),
            )
            .await?;
        }

        self.bounded(node.as_ref(), "set", node.set_ex(&self.data_key(key), &bytes, ttl_secs))
            .await?;

        debug!(key = %key, ttl_secs, bytes = bytes.len(), tags = entry.tags.len(), "Distributed set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let nodes = self.connected("delete")?;
        let node = self.route(&nodes, key);
        let removed = self
            .bounded(node.as_ref(), "delete", node.del(&[self.data_key(key)]))
            .await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let nodes = self.connected("clear")?;
        let pattern = format!("{}*", escape_glob(&self.config.key_prefix));
        let clears = nodes.iter().map(|node| {
            let pattern = pattern.as_str();
            async move {
                let stored = self.bounded(node.as_ref(), "clear", node.keys(pattern)).await?;
                self.bounded(node.as_ref(), "clear", node.del(&stored)).await
            }
        });
        let removed: u64 = join_all(clears)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sum();
        info!(removed, "Distributed storage cleared");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let nodes = self.connected("keys")?;
        let per_node = join_all(nodes.iter().map(|node| self.node_keys(node))).await;
        let mut keys = Vec::new();
        for result in per_node {
            keys.extend(result?);
        }
        Ok(keys)
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.keys().await?.len() as u64)
    }

    async fn invalidate_by_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        let nodes = self.connected("invalidate_by_pattern")?;
        let sweeps = nodes.iter().map(|node| async move {
            let matching: Vec<String> = self
                .node_keys(node)
                .await?
                .into_iter()
                .filter(|raw| pattern.matches(raw))
                .map(|raw| self.data_key(&raw))
                .collect();
            self.bounded(node.as_ref(), "invalidate_by_pattern", node.del(&matching))
                .await
        });

        let mut removed = 0;
        for result in join_all(sweeps).await {
            removed += result?;
        }
        debug!(pattern = %pattern, removed, "Distributed pattern invalidation");
        Ok(removed)
    }

    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let nodes = self.connected("invalidate_by_tag")?;
        let index_key = self.tag_key(tag);
        let index_node = self.route(&nodes, &index_key);
        let members = self
            .bounded(index_node.as_ref(), "invalidate_by_tag", index_node.smembers(&index_key))
            .await?;

        let mut by_node: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for member in &members {
            by_node
                .entry(node_index(member, nodes.len()))
                .or_default()
                .push(self.data_key(member));
        }

        let deletes = by_node.iter().map(|(&idx, stored)| {
            let node = &nodes[idx];
            self.bounded(node.as_ref(), "invalidate_by_tag", node.del(stored))
        });
        let mut removed = 0;
        for result in join_all(deletes).await {
            removed += result?;
        }

        self.bounded(
            index_node.as_ref(),
            "invalidate_by_tag",
            index_node.del(&[index_key]),
        )
        .await?;

        debug!(tag = %tag, members = members.len(), removed, "Distributed tag invalidation");
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        let Ok(nodes) = self.connected("health_check") else {
            return Ok(false);
        };
        let pings = join_all(
            nodes
                .iter()
                .map(|node| self.bounded(node.as_ref(), "ping", node.ping())),
        )
        .await;
        Ok(pings.iter().all(|p| p.is_ok()))
    }
}
