//! Cache Storage Backends
//!
//! The contract every cache layer implements, plus the in-process and
//! distributed implementations.

pub mod distributed;
mod memory;

pub use distributed::{DistributedStorage, DistributedStorageConfig};
pub use memory::{EvictCallback, EvictionPolicy, MemoryStorage, MemoryStorageConfig};

use crate::cache::entry::CacheEntry;
use crate::cache::pattern::KeyPattern;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// CacheStorage Trait
// =============================================================================

/// Trait for cache layer storage operations
///
/// Keys are fully-qualified storage keys (namespace already applied).
/// Counts returned by `delete`/`invalidate_*` are exact counts of keys that
/// were actually removed.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Backend kind label used in logs and metrics
    fn backend(&self) -> &str;

    /// Get an entry, recording the access
    ///
    /// Expired entries are removed and reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Get an entry without access bookkeeping
    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Delete an entry; true if it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// All keys currently stored
    ///
    /// Note: This may be expensive for large storages.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of entries currently stored
    async fn size(&self) -> Result<u64>;

    /// Delete every key matching the pattern
    async fn invalidate_by_pattern(&self, pattern: &KeyPattern) -> Result<u64>;

    /// Delete every entry carrying the tag
    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64>;

    /// Eagerly delete expired entries
    ///
    /// Backends whose expiry is enforced natively report zero.
    async fn cleanup_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Check if storage is available/healthy
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Memory statistics, for backends that live in this process
    fn memory_introspection(&self) -> Option<&dyn SupportsMemoryIntrospection> {
        None
    }
}

/// Capability implemented by in-process backends that can report their
/// memory footprint
pub trait SupportsMemoryIntrospection: Send + Sync {
    /// Approximate bytes held by stored entries
    fn memory_usage_bytes(&self) -> u64;
}

/// Type alias for shared cache storage
pub type CacheStorageRef = Arc<dyn CacheStorage>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory storage whose operations can be switched to fail
    pub struct FlakyStorage {
        pub inner: MemoryStorage,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl FlakyStorage {
        pub fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }

        pub fn failing_writes() -> Self {
            let storage = Self::new();
            storage.fail_writes.store(true, Ordering::Relaxed);
            storage
        }

        fn check(&self, flag: &AtomicBool, operation: &str) -> Result<()> {
            if flag.load(Ordering::Relaxed) {
                Err(crate::error::Error::BackendOperationFailed {
                    backend: "flaky".into(),
                    operation: operation.into(),
                    reason: "injected failure".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        fn backend(&self) -> &str {
            "flaky"
        }

        async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
            self.check(&self.fail_reads, "get")?;
            self.inner.get(key).await
        }

        async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
            self.check(&self.fail_reads, "peek")?;
            self.inner.peek(key).await
        }

        async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
            self.check(&self.fail_writes, "set")?;
            self.inner.set(key, entry).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.check(&self.fail_writes, "delete")?;
            self.inner.delete(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.check(&self.fail_writes, "clear")?;
            self.inner.clear().await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.check(&self.fail_reads, "keys")?;
            self.inner.keys().await
        }

        async fn size(&self) -> Result<u64> {
            self.inner.size().await
        }

        async fn invalidate_by_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
            self.check(&self.fail_writes, "invalidate_by_pattern")?;
            self.inner.invalidate_by_pattern(pattern).await
        }

        async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
            self.check(&self.fail_writes, "invalidate_by_tag")?;
            self.inner.invalidate_by_tag(tag).await
        }
    }

    /// Storage whose reads never complete
    pub struct StalledStorage;

    #[async_trait]
    impl CacheStorage for StalledStorage {
        fn backend(&self) -> &str {
            "stalled"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
            futures::future::pending().await
        }

        async fn peek(&self, _key: &str) -> Result<Option<CacheEntry>> {
            futures::future::pending().await
        }

        async fn set(&self, _key: &str, _entry: CacheEntry) -> Result<()> {
            futures::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            futures::future::pending().await
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn size(&self) -> Result<u64> {
            Ok(0)
        }

        async fn invalidate_by_pattern(&self, _pattern: &KeyPattern) -> Result<u64> {
            futures::future::pending().await
        }

        async fn invalidate_by_tag(&self, _tag: &str) -> Result<u64> {
            futures::future::pending().await
        }
    }
}
