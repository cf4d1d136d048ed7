//! Error types for the layered cache
//!
//! Provides structured error types for the cache manager, the storage
//! backends, the value codecs and configuration loading.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the cache engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Manager Errors
    // =========================================================================
    /// The requested operation could not be attempted at all
    #[error("Cache {operation} failed: {message}{}", .context.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Cache {
        operation: String,
        message: String,
        context: Option<String>,
    },

    #[error("Unknown warming strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Layer {layer} timed out during {operation} after {timeout:?}")]
    Timeout {
        layer: String,
        operation: String,
        timeout: Duration,
    },

    // =========================================================================
    // Distributed Backend Errors
    // =========================================================================
    #[error("Distributed cache not connected (operation: {operation})")]
    NotConnected { operation: String },

    #[error("Distributed cache {operation} failed{}: {message}", .node.as_deref().map(|n| format!(" on {}", n)).unwrap_or_default())]
    Distributed {
        operation: String,
        node: Option<String>,
        message: String,
    },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a manager-level failure
    pub fn cache(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Cache {
            operation: operation.into(),
            message: message.into(),
            context: None,
        }
    }

    /// Build a distributed backend failure
    pub fn distributed(
        operation: impl Into<String>,
        node: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Distributed {
            operation: operation.into(),
            node: node.map(str::to_string),
            message: message.into(),
        }
    }

    /// Check if this error is transient (the same call may succeed later)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::Distributed { .. } => true,
            Error::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidPattern { .. }
                | Error::UnknownStrategy { .. }
                | Error::Serialization(_)
                | Error::JsonParse(_)
                | Error::YamlParse(_)
        )
    }

    /// Check if this error reports a missing backend connection
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::NotConnected { .. } | Error::Distributed { .. })
    }
}

/// Result type alias for the cache engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::cache("set", "value is not representable");
        assert_eq!(err.to_string(), "Cache set failed: value is not representable");

        let err = Error::Cache {
            operation: "set".into(),
            message: "bad".into(),
            context: Some("key=a".into()),
        };
        assert_eq!(err.to_string(), "Cache set failed: bad (key=a)");

        let err = Error::distributed("get", Some("redis://node-1"), "refused");
        assert_eq!(
            err.to_string(),
            "Distributed cache get failed on redis://node-1: refused"
        );
    }

    #[test]
    fn test_error_classification() {
        let not_connected = Error::NotConnected {
            operation: "get".into(),
        };
        assert!(not_connected.is_connectivity());
        assert!(!not_connected.is_transient());
        assert!(not_connected.is_retryable());

        let timeout = Error::Timeout {
            layer: "redis".into(),
            operation: "set".into(),
            timeout: Duration::from_millis(50),
        };
        assert!(timeout.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
        assert!(!config_err.is_connectivity());
    }
}
