//! Cache Warming
//!
//! Bulk pre-population of the cache. Entries come either directly from the
//! caller or from a named [`WarmingStrategy`] registered with the manager.

use crate::cache::entry::SetOptions;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Warming Configuration
// =============================================================================

/// Configuration for warm-up runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Maximum concurrent writes during a run
    pub max_concurrent: usize,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

// =============================================================================
// Warm Entry
// =============================================================================

/// One value to pre-populate
#[derive(Debug, Clone)]
pub struct WarmEntry {
    pub key: String,
    pub value: Value,
    pub namespace: Option<String>,
    pub options: SetOptions,
}

impl WarmEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            namespace: None,
            options: SetOptions::default(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }
}

// =============================================================================
// Warming Strategy
// =============================================================================

/// A named source of entries to warm
#[async_trait]
pub trait WarmingStrategy: Send + Sync {
    /// Registration name
    fn name(&self) -> &str;

    /// Produce the entries to write
    async fn load(&self) -> Result<Vec<WarmEntry>>;
}

/// Strategy backed by a fixed list of entries
pub struct StaticWarmingStrategy {
    name: String,
    entries: Vec<WarmEntry>,
}

impl StaticWarmingStrategy {
    pub fn new(name: impl Into<String>, entries: Vec<WarmEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }
}

#[async_trait]
impl WarmingStrategy for StaticWarmingStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<WarmEntry>> {
        Ok(self.entries.clone())
    }
}

// =============================================================================
// Warm Stats
// =============================================================================

/// Outcome of a single warm-up run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Entries handed to the run
    pub requested: usize,
    /// Entries written to at least one layer
    pub loaded: usize,
    /// Entries rejected with an error
    pub failed: usize,
    /// Entries refused by their `should_cache` gate
    pub skipped: usize,
}

/// Cumulative warm-up statistics
#[derive(Debug, Default)]
pub struct WarmStats {
    /// Warm-up runs started
    pub runs: AtomicU64,
    /// Entries requested across all runs
    pub entries_requested: AtomicU64,
    /// Entries written
    pub entries_loaded: AtomicU64,
    /// Entries that failed
    pub entries_failed: AtomicU64,
    /// Entries skipped by their gate
    pub entries_skipped: AtomicU64,
    /// Runs currently executing
    pub in_flight: AtomicU64,
}

impl WarmStats {
    /// Increment in-flight counter
    pub fn start_run(&self, requested: usize) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.entries_requested
            .fetch_add(requested as u64, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished run in and decrement the in-flight counter
    pub fn complete_run(&self, report: &WarmReport) {
        self.entries_loaded
            .fetch_add(report.loaded as u64, Ordering::Relaxed);
        self.entries_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.entries_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> WarmStatsSnapshot {
        WarmStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            entries_requested: self.entries_requested.load(Ordering::Relaxed),
            entries_loaded: self.entries_loaded.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of warm-up statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmStatsSnapshot {
    pub runs: u64,
    pub entries_requested: u64,
    pub entries_loaded: u64,
    pub entries_failed: u64,
    pub entries_skipped: u64,
    pub in_flight: u64,
}

impl WarmStatsSnapshot {
    /// Calculate success ratio (loaded / requested)
    pub fn success_ratio(&self) -> f64 {
        if self.entries_requested == 0 {
            0.0
        } else {
            self.entries_loaded as f64 / self.entries_requested as f64
        }
    }
}
