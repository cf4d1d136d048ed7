//! Invalidation Hook
//!
//! Port to an external invalidation/warming manager. The manager reports
//! every get and set to the hook, and asks it to resolve dependency
//! identifiers into concrete invalidation targets. Rule evaluation lives on
//! the other side of this trait.

use crate::cache::events::InvalidationTarget;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Operation reported to the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Get,
    Set,
}

/// A get or set observed by the manager
#[derive(Debug, Clone, Copy)]
pub struct ObservedOperation<'a> {
    pub kind: AccessKind,
    /// Fully-qualified storage key
    pub key: &'a str,
    pub value: &'a Value,
    pub metadata: &'a Map<String, Value>,
}

/// External invalidation manager
#[async_trait]
pub trait InvalidationHook: Send + Sync {
    /// Observe an operation; called inline, must not block
    fn process_operation(&self, operation: ObservedOperation<'_>);

    /// Targets to invalidate when dependency `id` of type `kind` changes
    async fn resolve_dependency(&self, _id: &str, _kind: &str) -> Vec<InvalidationTarget> {
        Vec::new()
    }
}

/// Hook that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidation;

#[async_trait]
impl InvalidationHook for NoopInvalidation {
    fn process_operation(&self, _operation: ObservedOperation<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_resolves_nothing() {
        let hook = NoopInvalidation;
        hook.process_operation(ObservedOperation {
            kind: AccessKind::Set,
            key: "k",
            value: &Value::Null,
            metadata: &Map::new(),
        });
        assert!(hook.resolve_dependency("user:1", "user").await.is_empty());
    }
}
