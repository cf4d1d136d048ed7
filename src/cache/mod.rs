//! Layered Caching System
//!
//! Any number of storage layers, each with a read priority, coordinated by a
//! single manager:
//! - **Memory**: bounded in-process store with LRU/LFU/FIFO/TTL eviction
//! - **Distributed**: Redis-compatible key-value nodes with client-side
//!   routing and a tag index
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Cache Manager                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   get: highest priority first ──► hit ──► promote into faster layers    │
//! │   set / delete / invalidate: fan out to every layer concurrently        │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐   │
//! │  │  Memory layer    │  │  Memory layer    │  │  Distributed layer   │   │
//! │  │  priority 100    │  │  priority 50     │  │  priority 10         │   │
//! │  │  (LRU, bounded)  │  │  (LFU, bounded)  │  │  (Redis cluster)     │   │
//! │  └──────────────────┘  └──────────────────┘  └──────────┬───────────┘   │
//! │                                                         │               │
//! │                                              ┌──────────┴───────────┐   │
//! │                                              │ Serializer           │   │
//! │                                              │ json / zstd / msgpack│   │
//! │                                              └──────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  • Per-layer timeouts           • Tag and pattern invalidation          │
//! │  • Cache-line aligned metrics   • Warm-up strategies                    │
//! │  • Broadcast events             • Pluggable analytics                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use layered_cache::cache::{CacheLayer, CacheManager, MemoryStorage, SetOptions};
//! use serde_json::json;
//!
//! let manager = CacheManager::default();
//! manager.add_layer(CacheLayer::new("local", MemoryStorage::new(), 100))?;
//! manager.add_layer(CacheLayer::new("shared", distributed, 10))?;
//!
//! manager
//!     .set("42", json!({"name": "alice"}), SetOptions::default().tags(["users"]), Some("users"))
//!     .await?;
//!
//! if let Some(entry) = manager.get("42", Some("users")).await? {
//!     println!("{} (hit {} times)", entry.value, entry.hits);
//! }
//!
//! manager.invalidate_by_tag("users").await?;
//! println!("hit rate: {:.2}", manager.get_stats().await.hit_rate);
//! ```

pub mod analytics;
pub mod compression;
pub mod entry;
pub mod events;
pub mod invalidation;
pub mod manager;
pub mod metrics;
pub mod pattern;
pub mod serializer;
pub mod storage;
pub mod warming;

// Re-export main types
pub use analytics::{
    AnalyticsSink, LayerEvent, NoopAnalytics, OperationAttributes, OperationKind,
    PrometheusAnalytics,
};
pub use compression::{CompressionAlgorithm, CompressionConfig, Compressor};
pub use entry::{CacheEntry, CacheKey, SetOptions, DEFAULT_TTL};
pub use events::{CacheEvent, InvalidationTarget};
pub use invalidation::{AccessKind, InvalidationHook, NoopInvalidation, ObservedOperation};
pub use manager::{CacheLayer, CacheManager, CacheManagerConfig, CacheStats, EntrySample, LayerStats};
pub use metrics::{CacheMetrics, LayerMetrics, LayerMetricsSnapshot};
pub use pattern::KeyPattern;
pub use serializer::{EntrySerializer, SerializerKind};
pub use storage::{
    CacheStorage, CacheStorageRef, DistributedStorage, DistributedStorageConfig, EvictionPolicy,
    MemoryStorage, MemoryStorageConfig, SupportsMemoryIntrospection,
};
pub use warming::{StaticWarmingStrategy, WarmEntry, WarmReport, WarmingConfig, WarmingStrategy};
