//! Cache Events
//!
//! Events broadcast by the cache manager for monitoring and observability.

use serde::{Deserialize, Serialize};

/// Events emitted by the cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Entry was written; `layers` is the number of layers that accepted it
    Set {
        key: String,
        size_bytes: u64,
        layers: usize,
    },

    /// Lookup answered by a layer
    Hit { key: String, layer: String },

    /// Lookup not answered by any layer
    Miss { key: String },

    /// Entry was deleted; `removed` counts layers that held it
    Delete { key: String, removed: u64 },

    /// Entry copied from a lower-priority layer into a higher one
    Promote {
        key: String,
        from_layer: String,
        to_layer: String,
    },

    /// A layer failed or timed out
    LayerFailed {
        layer: String,
        operation: String,
        error: String,
    },

    /// Bulk invalidation finished
    Invalidated {
        target: InvalidationTarget,
        removed: u64,
    },

    /// Every layer cleared
    Cleared { layers: usize },

    /// A warm-up run finished
    Warmed {
        strategy: Option<String>,
        loaded: usize,
        failed: usize,
    },
}

/// What a bulk invalidation selected on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InvalidationTarget {
    Key(String),
    Tag(String),
    Pattern(String),
}

impl std::fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationTarget::Key(k) => write!(f, "key:{}", k),
            InvalidationTarget::Tag(t) => write!(f, "tag:{}", t),
            InvalidationTarget::Pattern(p) => write!(f, "pattern:{}", p),
        }
    }
}

impl CacheEvent {
    /// Create a Hit event
    pub fn hit(key: &str, layer: &str) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            layer: layer.to_string(),
        }
    }

    /// Create a Miss event
    pub fn miss(key: &str) -> Self {
        CacheEvent::Miss { key: key.to_string() }
    }

    /// Create a Promote event
    pub fn promote(key: &str, from_layer: &str, to_layer: &str) -> Self {
        CacheEvent::Promote {
            key: key.to_string(),
            from_layer: from_layer.to_string(),
            to_layer: to_layer.to_string(),
        }
    }

    /// Create a LayerFailed event
    pub fn layer_failed(layer: &str, operation: &str, error: impl std::fmt::Display) -> Self {
        CacheEvent::LayerFailed {
            layer: layer.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Set { key, .. } => Some(key),
            CacheEvent::Hit { key, .. } => Some(key),
            CacheEvent::Miss { key } => Some(key),
            CacheEvent::Delete { key, .. } => Some(key),
            CacheEvent::Promote { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Get the layer associated with this event (if any)
    pub fn layer(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { layer, .. } => Some(layer),
            CacheEvent::Promote { to_layer, .. } => Some(to_layer),
            CacheEvent::LayerFailed { layer, .. } => Some(layer),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, CacheEvent::LayerFailed { .. })
    }
}
