//! Cache Metrics
//!
//! Cache-line aligned counters for concurrent access. One [`LayerMetrics`]
//! block per registered layer, plus lookup-level totals kept by the manager.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Layer Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for a single cache layer, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LayerMetrics {
    /// Reads answered by this layer
    pub hits: AtomicU64,
    /// Reads this layer could not answer
    pub misses: AtomicU64,
    /// Successful writes
    pub sets: AtomicU64,
    /// Failed or timed-out writes
    pub set_failures: AtomicU64,
    /// Failed or timed-out reads and invalidations
    pub errors: AtomicU64,
    /// Entries copied into this layer from a lower one
    pub promotions: AtomicU64,
    /// Keys removed by delete/invalidate
    pub deletions: AtomicU64,
    _padding: [u8; 8],
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<LayerMetrics>() <= CACHE_LINE_SIZE);

impl Default for LayerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            set_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            deletions: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set_failure(&self) {
        self.set_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deletions(&self, count: u64) {
        self.deletions.fetch_add(count, Ordering::Relaxed);
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        self.snapshot().hit_ratio()
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> LayerMetricsSnapshot {
        LayerMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Layer Metrics Snapshot
// =============================================================================

/// Point-in-time snapshot of layer metrics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct LayerMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub set_failures: u64,
    pub errors: u64,
    pub promotions: u64,
    pub deletions: u64,
}

impl LayerMetricsSnapshot {
    pub fn hit_ratio(&self) -> f64 {
        hit_ratio(self.hits, self.misses)
    }
}

/// `hits / (hits + misses)`, zero when there were no lookups
pub fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Manager Metrics
// =============================================================================

/// Lookup totals plus one counter block per layer
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lookups answered by any layer
    pub hits: AtomicU64,
    /// Lookups no layer could answer
    pub misses: AtomicU64,
    /// Writes accepted by the manager
    pub sets: AtomicU64,
    layers: DashMap<String, Arc<LayerMetrics>>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter block for a layer, created on first use
    pub fn layer(&self, name: &str) -> Arc<LayerMetrics> {
        if let Some(metrics) = self.layers.get(name) {
            return metrics.clone();
        }
        self.layers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LayerMetrics::new()))
            .clone()
    }

    /// Forget a layer's counters
    pub fn remove_layer(&self, name: &str) {
        self.layers.remove(name);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Overall lookup hit ratio
    pub fn hit_ratio(&self) -> f64 {
        hit_ratio(self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    /// Snapshot of every layer's counters, ordered by layer name
    pub fn layer_snapshots(&self) -> BTreeMap<String, LayerMetricsSnapshot> {
        self.layers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
