//! Layered Cache - Multi-Level Cache and Eviction Engine
//!
//! A cache manager over prioritized storage layers: bounded in-process
//! memory stores and Redis-compatible distributed stores, with promotion on
//! hit, tag and pattern invalidation, warm-up and statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               Cache Manager                                  │
//! │        fan-in get  •  fan-out set/delete/invalidate  •  promotion            │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │       Memory Storage        │  │        Distributed Storage          │   │
//! │  │  lru / lfu / fifo / ttl     │  │  node routing  •  tag index sets    │   │
//! │  └─────────────────────────────┘  └──────────────────┬──────────────────┘   │
//! │                                                      │                       │
//! │                                   ┌──────────────────┴──────────────────┐   │
//! │                                   │   KvClient (Redis / in-process)     │   │
//! │                                   └─────────────────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │     Events (broadcast)  •  Metrics (atomics)  •  Analytics (Prometheus)      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Entries, storage backends, serializers and the manager
//! - [`config`]: File configuration and engine construction
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheEvent, CacheKey, CacheLayer, CacheManager, CacheManagerConfig, CacheStats,
    CacheStorage, DistributedStorage, DistributedStorageConfig, EvictionPolicy, KeyPattern,
    MemoryStorage, MemoryStorageConfig, SerializerKind, SetOptions, WarmEntry,
};

pub use config::{EngineConfig, Engine};

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
