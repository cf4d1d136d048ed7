//! Layered Cache Manager
//!
//! Coordinates any number of prioritized storage layers. Reads walk the
//! layers from the highest priority down and return the first hit, promoting
//! it into the faster layers in the background. Writes and invalidations fan
//! out to every layer concurrently; a failing or stalled layer is logged and
//! contributes nothing, it never fails the request.

use crate::cache::analytics::{
    AnalyticsSink, LayerEvent, NoopAnalytics, OperationAttributes, OperationKind,
};
use crate::cache::entry::{CacheEntry, CacheKey, SetOptions, DEFAULT_TTL};
use crate::cache::events::{CacheEvent, InvalidationTarget};
use crate::cache::invalidation::{AccessKind, InvalidationHook, NoopInvalidation, ObservedOperation};
use crate::cache::metrics::{CacheMetrics, LayerMetricsSnapshot};
use crate::cache::pattern::KeyPattern;
use crate::cache::storage::{CacheStorage, CacheStorageRef};
use crate::cache::warming::{
    WarmEntry, WarmReport, WarmStats, WarmStatsSnapshot, WarmingConfig, WarmingStrategy,
};
use crate::error::{Error, Result};
use dashmap::{DashMap, DashSet};
use futures::future::{join_all, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManagerConfig {
    /// TTL applied when a write does not specify one
    pub default_ttl_ms: u64,
    /// Bound on every individual layer call
    pub layer_timeout_ms: u64,
    /// Copy hits into higher-priority layers
    pub promote_on_hit: bool,
    /// Skip a promotion while another one for the same key is running
    pub dedupe_promotions: bool,
    /// Keys sampled per layer by `get_stats`
    pub stats_sample_size: usize,
    /// Event channel capacity
    pub event_channel_capacity: usize,
    /// Warm-up settings
    pub warming: WarmingConfig,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            layer_timeout_ms: 1_000,
            promote_on_hit: true,
            dedupe_promotions: true,
            stats_sample_size: 100,
            event_channel_capacity: 1024,
            warming: WarmingConfig::default(),
        }
    }
}

impl CacheManagerConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn layer_timeout(&self) -> Duration {
        Duration::from_millis(self.layer_timeout_ms)
    }
}

// =============================================================================
// Layers
// =============================================================================

/// A named storage backend with a read priority
#[derive(Clone)]
pub struct CacheLayer {
    pub name: String,
    pub storage: CacheStorageRef,
    /// Higher is read first
    pub priority: i32,
}

impl CacheLayer {
    pub fn new(name: impl Into<String>, storage: impl CacheStorage + 'static, priority: i32) -> Self {
        Self::shared(name, Arc::new(storage), priority)
    }

    /// Wrap a storage the caller keeps a handle to
    pub fn shared(name: impl Into<String>, storage: CacheStorageRef, priority: i32) -> Self {
        Self {
            name: name.into(),
            storage,
            priority,
        }
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("name", &self.name)
            .field("backend", &self.storage.backend())
            .field("priority", &self.priority)
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate statistics across all layers
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// `hits / (hits + misses)`, zero before the first lookup
    pub hit_rate: f64,
    pub total_keys: u64,
    /// Bytes held by layers that can report memory usage
    pub total_memory_bytes: u64,
    /// Per-layer detail, in read order
    pub layers: Vec<LayerStats>,
    /// Sampled entries, most-hit first
    pub top_entries: Vec<EntrySample>,
    pub warming: WarmStatsSnapshot,
}

/// Statistics for one layer
#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub name: String,
    pub backend: String,
    pub priority: i32,
    pub keys: u64,
    /// `None` for layers without memory introspection
    pub memory_bytes: Option<u64>,
    pub metrics: LayerMetricsSnapshot,
}

/// One sampled entry
#[derive(Debug, Clone, Serialize)]
pub struct EntrySample {
    pub layer: String,
    pub key: String,
    pub hits: u64,
    pub size_bytes: u64,
    pub age_ms: u64,
}

enum WriteOutcome {
    Skipped,
    Written { accepted: usize },
}

/// Run a layer call under the per-layer timeout
async fn bounded<T>(
    layer: &str,
    operation: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::Timeout {
            layer: layer.to_string(),
            operation: operation.to_string(),
            timeout,
        })?
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Multi-layer cache coordinator
pub struct CacheManager {
    config: CacheManagerConfig,
    /// Sorted by priority, highest first; replaced wholesale on change
    layers: RwLock<Arc<Vec<CacheLayer>>>,
    metrics: Arc<CacheMetrics>,
    analytics: Arc<dyn AnalyticsSink>,
    invalidation: Arc<dyn InvalidationHook>,
    strategies: DashMap<String, Arc<dyn WarmingStrategy>>,
    warm_stats: WarmStats,
    promotions_in_flight: Arc<DashSet<String>>,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheManagerConfig::default())
    }
}

impl CacheManager {
    /// Create a manager with no layers
    pub fn new(config: CacheManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            layers: RwLock::new(Arc::new(Vec::new())),
            metrics: Arc::new(CacheMetrics::new()),
            analytics: Arc::new(NoopAnalytics),
            invalidation: Arc::new(NoopInvalidation),
            strategies: DashMap::new(),
            warm_stats: WarmStats::default(),
            promotions_in_flight: Arc::new(DashSet::new()),
            event_tx,
        }
    }

    /// Report operations to an analytics collector
    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Report operations to an invalidation manager
    pub fn with_invalidation_hook(mut self, hook: Arc<dyn InvalidationHook>) -> Self {
        self.invalidation = hook;
        self
    }

    /// Get configuration
    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    fn layers(&self) -> Arc<Vec<CacheLayer>> {
        self.layers.read().clone()
    }

    // -------------------------------------------------------------------------
    // Layer registry
    // -------------------------------------------------------------------------

    /// Register a layer; names must be unique
    pub fn add_layer(&self, layer: CacheLayer) -> Result<()> {
        let mut guard = self.layers.write();
        if guard.iter().any(|l| l.name == layer.name) {
            return Err(Error::Configuration(format!(
                "cache layer '{}' is already registered",
                layer.name
            )));
        }

        info!(
            layer = %layer.name,
            backend = layer.storage.backend(),
            priority = layer.priority,
            "Cache layer registered"
        );
        let mut next = guard.as_ref().clone();
        next.push(layer);
        // Stable: equal priorities keep registration order
        next.sort_by_key(|l| std::cmp::Reverse(l.priority));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Unregister a layer, leaving its entries in place; false if unknown
    pub fn remove_layer(&self, name: &str) -> bool {
        let mut guard = self.layers.write();
        let mut next = guard.as_ref().clone();
        let before = next.len();
        next.retain(|l| l.name != name);
        if next.len() == before {
            return false;
        }
        *guard = Arc::new(next);
        drop(guard);

        self.metrics.remove_layer(name);
        info!(layer = %name, "Cache layer removed");
        true
    }

    /// Layer names in read order
    pub fn layer_names(&self) -> Vec<String> {
        self.layers().iter().map(|l| l.name.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Look a key up, highest-priority layer first
    ///
    /// A hit is promoted into every layer with a strictly higher priority in
    /// a detached task. A failing layer counts as a miss for that layer.
    pub async fn get(&self, key: &str, namespace: Option<&str>) -> Result<Option<CacheEntry>> {
        let start = Instant::now();
        let storage_key = CacheKey::scoped(namespace, key).to_storage_key();
        let mut attrs = OperationAttributes::for_key(&storage_key, namespace);
        let layers = self.layers();
        let timeout = self.config.layer_timeout();

        for (idx, layer) in layers.iter().enumerate() {
            match bounded(&layer.name, "get", timeout, layer.storage.get(&storage_key)).await {
                Ok(Some(entry)) => {
                    self.metrics.record_hit();
                    self.metrics.layer(&layer.name).record_hit();
                    attrs.layer = Some(layer.name.clone());
                    attrs.size_bytes = Some(entry.size);
                    self.analytics
                        .record_layer_metrics(&layer.name, LayerEvent::Hit, &attrs);
                    self.analytics
                        .record_operation(OperationKind::Hit, start.elapsed(), &attrs);
                    self.emit(CacheEvent::hit(&storage_key, &layer.name));

                    if self.config.promote_on_hit {
                        let targets: Vec<CacheLayer> = layers[..idx]
                            .iter()
                            .filter(|higher| higher.priority > layer.priority)
                            .cloned()
                            .collect();
                        self.spawn_promotion(targets, &layer.name, &storage_key, &entry);
                    }

                    self.invalidation.process_operation(ObservedOperation {
                        kind: AccessKind::Get,
                        key: &storage_key,
                        value: &entry.value,
                        metadata: &entry.metadata,
                    });
                    debug!(key = %storage_key, layer = %layer.name, hits = entry.hits, "Cache hit");
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    self.metrics.layer(&layer.name).record_miss();
                    self.analytics
                        .record_layer_metrics(&layer.name, LayerEvent::Miss, &attrs);
                }
                Err(e) => {
                    self.metrics.layer(&layer.name).record_error();
                    self.report_layer_failure(layer, "get", &e, &attrs);
                }
            }
        }

        self.metrics.record_miss();
        self.analytics
            .record_operation(OperationKind::Miss, start.elapsed(), &attrs);
        self.emit(CacheEvent::miss(&storage_key));
        debug!(key = %storage_key, "Cache miss");
        Ok(None)
    }

    /// Look a key up and decode its value
    pub async fn get_value<T: DeserializeOwned>(
        &self,
        key: &str,
        namespace: Option<&str>,
    ) -> Result<Option<T>> {
        match self.get(key, namespace).await? {
            Some(entry) => serde_json::from_value(entry.value).map(Some).map_err(|e| {
                Error::cache("get_value", format!("cached value for '{}' has an unexpected shape: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    fn spawn_promotion(&self, targets: Vec<CacheLayer>, source: &str, key: &str, entry: &CacheEntry) {
        if targets.is_empty() {
            return;
        }
        let dedupe = self.config.dedupe_promotions;
        if dedupe && !self.promotions_in_flight.insert(key.to_string()) {
            debug!(key = %key, "Promotion already in flight");
            return;
        }

        let in_flight = self.promotions_in_flight.clone();
        let metrics = self.metrics.clone();
        let analytics = self.analytics.clone();
        let events = self.event_tx.clone();
        let timeout = self.config.layer_timeout();
        let source = source.to_string();
        let key = key.to_string();
        let entry = entry.clone();

        tokio::spawn(async move {
            let attrs = OperationAttributes {
                key: key.clone(),
                layer: Some(source.clone()),
                size_bytes: Some(entry.size),
                ..Default::default()
            };
            let writes = targets.iter().map(|layer| {
                let entry = entry.clone();
                let key = key.as_str();
                async move {
                    let result = bounded(&layer.name, "promote", timeout, layer.storage.set(key, entry)).await;
                    (layer, result)
                }
            });

            for (layer, result) in join_all(writes).await {
                match result {
                    Ok(()) => {
                        metrics.layer(&layer.name).record_promotion();
                        analytics.record_layer_metrics(&layer.name, LayerEvent::Promotion, &attrs);
                        let _ = events.send(CacheEvent::promote(&key, &source, &layer.name));
                        debug!(key = %key, from = %source, to = %layer.name, "Promoted cache entry");
                    }
                    Err(e) => {
                        metrics.layer(&layer.name).record_error();
                        analytics.record_layer_metrics(&layer.name, LayerEvent::Error, &attrs);
                        let _ = events.send(CacheEvent::layer_failed(&layer.name, "promote", &e));
                        warn!(key = %key, layer = %layer.name, error = %e, "Promotion failed");
                    }
                }
            }

            if dedupe {
                in_flight.remove(&key);
            }
        });
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Write a value to every layer
    ///
    /// Succeeds even when some layers reject the write.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        options: SetOptions,
        namespace: Option<&str>,
    ) -> Result<()> {
        self.write(key, value, options, namespace).await.map(|_| ())
    }

    /// Serialize and write a value
    pub async fn set_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
        namespace: Option<&str>,
    ) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            Error::cache("set", format!("value for '{}' is not representable: {}", key, e))
        })?;
        self.set(key, value, options, namespace).await
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        options: SetOptions,
        namespace: Option<&str>,
    ) -> Result<WriteOutcome> {
        let start = Instant::now();
        let storage_key = CacheKey::scoped(namespace, key).to_storage_key();

        if let Some(should_cache) = &options.should_cache {
            if !should_cache(&value) {
                debug!(key = %storage_key, "Value rejected by should_cache");
                return Ok(WriteOutcome::Skipped);
            }
        }

        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        let entry = CacheEntry::new(value, ttl)
            .with_tags(options.tags)
            .with_metadata(options.metadata);
        let mut attrs = OperationAttributes::for_key(&storage_key, namespace);
        attrs.size_bytes = Some(entry.size);

        let layers = self.layers();
        let timeout = self.config.layer_timeout();
        let writes = layers.iter().map(|layer| {
            let entry = entry.clone();
            let storage_key = storage_key.as_str();
            async move {
                let result = bounded(&layer.name, "set", timeout, layer.storage.set(storage_key, entry)).await;
                (layer, result)
            }
        });

        let mut accepted = 0;
        for (layer, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    accepted += 1;
                    self.metrics.layer(&layer.name).record_set();
                    self.analytics
                        .record_layer_metrics(&layer.name, LayerEvent::Set, &attrs);
                }
                Err(e) => {
                    self.metrics.layer(&layer.name).record_set_failure();
                    self.report_layer_failure(layer, "set", &e, &attrs);
                }
            }
        }
        if accepted == 0 && !layers.is_empty() {
            warn!(key = %storage_key, "No cache layer accepted the write");
        }

        self.metrics.record_set();
        self.analytics
            .record_operation(OperationKind::Set, start.elapsed(), &attrs);
        self.emit(CacheEvent::Set {
            key: storage_key.clone(),
            size_bytes: entry.size,
            layers: accepted,
        });
        self.invalidation.process_operation(ObservedOperation {
            kind: AccessKind::Set,
            key: &storage_key,
            value: &entry.value,
            metadata: &entry.metadata,
        });
        debug!(
            key = %storage_key,
            ttl_ms = ttl.as_millis() as u64,
            size = entry.size,
            layers = accepted,
            "Stored cache entry"
        );

        Ok(WriteOutcome::Written { accepted })
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Run a counting operation on every layer concurrently and sum the
    /// counts of the layers that succeeded
    async fn sum_across_layers<'a, F>(
        &self,
        layers: &'a [CacheLayer],
        operation: &'static str,
        subject: &str,
        call: F,
    ) -> u64
    where
        F: Fn(&'a CacheLayer) -> BoxFuture<'a, Result<u64>>,
    {
        let timeout = self.config.layer_timeout();
        let calls = layers.iter().map(|layer| {
            let fut = call(layer);
            async move { (layer, bounded(&layer.name, operation, timeout, fut).await) }
        });

        let mut total = 0;
        for (layer, result) in join_all(calls).await {
            match result {
                Ok(count) => {
                    total += count;
                    if count > 0 {
                        self.metrics.layer(&layer.name).record_deletions(count);
                    }
                }
                Err(e) => {
                    self.metrics.layer(&layer.name).record_error();
                    let attrs = OperationAttributes::for_key(subject, None);
                    self.report_layer_failure(layer, operation, &e, &attrs);
                }
            }
        }
        total
    }

    /// Delete a key from every layer; returns how many layers held it
    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> Result<u64> {
        let storage_key = CacheKey::scoped(namespace, key).to_storage_key();
        let layers = self.layers();
        let target = storage_key.as_str();

        let removed = self
            .sum_across_layers(&layers, "delete", target, |layer| {
                async move { layer.storage.delete(target).await.map(u64::from) }.boxed()
            })
            .await;

        self.emit(CacheEvent::Delete {
            key: storage_key.clone(),
            removed,
        });
        debug!(key = %storage_key, removed, "Deleted cache entry");
        Ok(removed)
    }

    /// Remove everything from every layer
    pub async fn clear(&self) -> Result<()> {
        let layers = self.layers();
        self.sum_across_layers(&layers, "clear", "*", |layer| {
            async move { layer.storage.clear().await.map(|()| 0) }.boxed()
        })
        .await;

        self.emit(CacheEvent::Cleared {
            layers: layers.len(),
        });
        info!(layers = layers.len(), "Cache cleared");
        Ok(())
    }

    /// Delete keys matching a glob, or a regex written as `/regex/`
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<u64> {
        let compiled = KeyPattern::parse(pattern)?;
        let layers = self.layers();
        let matcher = &compiled;

        let removed = self
            .sum_across_layers(&layers, "invalidate_by_pattern", pattern, |layer| {
                async move { layer.storage.invalidate_by_pattern(matcher).await }.boxed()
            })
            .await;

        self.emit(CacheEvent::Invalidated {
            target: InvalidationTarget::Pattern(pattern.to_string()),
            removed,
        });
        info!(pattern = %compiled, removed, "Invalidated cache entries by pattern");
        Ok(removed)
    }

    /// Delete every entry carrying a tag
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let layers = self.layers();

        let removed = self
            .sum_across_layers(&layers, "invalidate_by_tag", tag, |layer| {
                async move { layer.storage.invalidate_by_tag(tag).await }.boxed()
            })
            .await;

        self.emit(CacheEvent::Invalidated {
            target: InvalidationTarget::Tag(tag.to_string()),
            removed,
        });
        info!(tag = %tag, removed, "Invalidated cache entries by tag");
        Ok(removed)
    }

    /// Invalidate whatever the invalidation hook says depends on `id`
    pub async fn invalidate_by_dependency(&self, id: &str, kind: &str) -> Result<u64> {
        let targets = self.invalidation.resolve_dependency(id, kind).await;
        let mut removed = 0;
        for target in &targets {
            removed += match target {
                InvalidationTarget::Key(key) => self.delete(key, None).await?,
                InvalidationTarget::Tag(tag) => self.invalidate_by_tag(tag).await?,
                InvalidationTarget::Pattern(pattern) => self.invalidate_by_pattern(pattern).await?,
            };
        }
        debug!(dependency = %id, kind = %kind, targets = targets.len(), removed, "Dependency invalidation");
        Ok(removed)
    }

    /// Eagerly drop expired entries from every layer
    pub async fn cleanup(&self) -> Result<u64> {
        let layers = self.layers();
        let removed = self
            .sum_across_layers(&layers, "cleanup", "*", |layer| {
                async move { layer.storage.cleanup_expired().await }.boxed()
            })
            .await;
        debug!(removed, "Expired cache entries cleaned up");
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Warming
    // -------------------------------------------------------------------------

    /// Register a named warming strategy, replacing any previous one
    pub fn register_warming_strategy(&self, name: impl Into<String>, strategy: Arc<dyn WarmingStrategy>) {
        let name = name.into();
        debug!(strategy = %name, "Warming strategy registered");
        self.strategies.insert(name, strategy);
    }

    /// Write a batch of entries concurrently; failures are independent
    pub async fn warm_cache(&self, entries: Vec<WarmEntry>) -> WarmReport {
        self.run_warm(None, entries).await
    }

    /// Load entries from a registered strategy and write them
    pub async fn warm_cache_strategy(&self, name: &str) -> Result<WarmReport> {
        let strategy = self
            .strategies
            .get(name)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::UnknownStrategy {
                name: name.to_string(),
            })?;
        let entries = strategy.load().await?;
        Ok(self.run_warm(Some(name), entries).await)
    }

    async fn run_warm(&self, strategy: Option<&str>, entries: Vec<WarmEntry>) -> WarmReport {
        let mut report = WarmReport {
            requested: entries.len(),
            ..Default::default()
        };
        self.warm_stats.start_run(report.requested);

        let concurrency = self.config.warming.max_concurrent.max(1);
        let outcomes: Vec<(String, Result<WriteOutcome>)> = stream::iter(entries)
            .map(|entry| async move {
                let WarmEntry {
                    key,
                    value,
                    namespace,
                    options,
                } = entry;
                let outcome = self.write(&key, value, options, namespace.as_deref()).await;
                (key, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (key, outcome) in outcomes {
            match outcome {
                Ok(WriteOutcome::Skipped) => report.skipped += 1,
                Ok(WriteOutcome::Written { accepted }) if accepted > 0 => report.loaded += 1,
                Ok(WriteOutcome::Written { .. }) => report.failed += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Warm-up write failed");
                    report.failed += 1;
                }
            }
        }

        self.warm_stats.complete_run(&report);
        self.emit(CacheEvent::Warmed {
            strategy: strategy.map(str::to_string),
            loaded: report.loaded,
            failed: report.failed,
        });
        info!(
            strategy = strategy.unwrap_or("-"),
            requested = report.requested,
            loaded = report.loaded,
            failed = report.failed,
            skipped = report.skipped,
            "Cache warm-up finished"
        );
        report
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Counters for every layer
    pub fn layer_metrics(&self) -> BTreeMap<String, LayerMetricsSnapshot> {
        self.metrics.layer_snapshots()
    }

    /// Compute statistics and push memory totals to the analytics sink
    pub async fn get_stats(&self) -> CacheStats {
        let layers = self.layers();
        let per_layer = join_all(layers.iter().map(|layer| self.layer_stats(layer))).await;

        let mut layer_stats = Vec::with_capacity(per_layer.len());
        let mut top_entries = Vec::new();
        for (stats, samples) in per_layer {
            layer_stats.push(stats);
            top_entries.extend(samples);
        }
        top_entries.sort_by(|a, b| b.hits.cmp(&a.hits));
        top_entries.truncate(self.config.stats_sample_size);

        let total_keys = layer_stats.iter().map(|l| l.keys).sum();
        let total_memory_bytes = layer_stats.iter().filter_map(|l| l.memory_bytes).sum();
        self.analytics
            .update_memory_usage(total_memory_bytes, total_keys);

        let hits = self.metrics.hits.load(std::sync::atomic::Ordering::Relaxed);
        let misses = self.metrics.misses.load(std::sync::atomic::Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            sets: self.metrics.sets.load(std::sync::atomic::Ordering::Relaxed),
            hit_rate: self.metrics.hit_ratio(),
            total_keys,
            total_memory_bytes,
            layers: layer_stats,
            top_entries,
            warming: self.warm_stats.snapshot(),
        }
    }

    async fn layer_stats(&self, layer: &CacheLayer) -> (LayerStats, Vec<EntrySample>) {
        let timeout = self.config.layer_timeout();
        let keys = match bounded(&layer.name, "keys", timeout, layer.storage.keys()).await {
            Ok(keys) => keys,
            Err(e) => {
                self.metrics.layer(&layer.name).record_error();
                self.report_layer_failure(layer, "keys", &e, &OperationAttributes::default());
                Vec::new()
            }
        };
        let memory_bytes = layer
            .storage
            .memory_introspection()
            .map(|m| m.memory_usage_bytes());

        let mut samples = Vec::new();
        for key in keys.iter().take(self.config.stats_sample_size) {
            if let Ok(Some(entry)) = bounded(&layer.name, "peek", timeout, layer.storage.peek(key)).await {
                samples.push(EntrySample {
                    layer: layer.name.clone(),
                    key: key.clone(),
                    hits: entry.hits,
                    size_bytes: entry.size,
                    age_ms: entry.age().as_millis() as u64,
                });
            }
        }

        let stats = LayerStats {
            name: layer.name.clone(),
            backend: layer.storage.backend().to_string(),
            priority: layer.priority,
            keys: keys.len() as u64,
            memory_bytes,
            metrics: self.metrics.layer(&layer.name).snapshot(),
        };
        (stats, samples)
    }

    /// Health of every layer, by name
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let layers = self.layers();
        let timeout = self.config.layer_timeout();
        let checks = join_all(layers.iter().map(|layer| async move {
            let healthy = bounded(&layer.name, "health_check", timeout, layer.storage.health_check())
                .await
                .unwrap_or(false);
            (layer.name.clone(), healthy)
        }))
        .await;

        for (name, healthy) in &checks {
            if !healthy {
                warn!(layer = %name, "Cache layer unhealthy");
            }
        }
        checks.into_iter().collect()
    }

    fn report_layer_failure(
        &self,
        layer: &CacheLayer,
        operation: &str,
        err: &Error,
        attrs: &OperationAttributes,
    ) {
        let event = match err {
            Error::Timeout { .. } => LayerEvent::Timeout,
            _ if operation == "set" => LayerEvent::SetFailed,
            _ => LayerEvent::Error,
        };
        self.analytics.record_layer_metrics(&layer.name, event, attrs);

        if err.is_transient() || err.is_connectivity() {
            warn!(layer = %layer.name, operation, key = %attrs.key, error = %err, "Cache layer call failed");
        } else {
            error!(layer = %layer.name, operation, key = %attrs.key, error = %err, "Cache layer call failed");
        }
        self.emit(CacheEvent::layer_failed(&layer.name, operation, err));
    }
}
