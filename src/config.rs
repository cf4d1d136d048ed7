//! Engine Configuration
//!
//! File-level configuration (YAML or JSON) describing the manager settings
//! and the layer stack, and the builder that turns it into a running
//! [`Engine`].
//!
//! ```yaml
//! manager:
//!   default_ttl_ms: 600000
//!   layer_timeout_ms: 250
//! layers:
//!   - name: local
//!     priority: 100
//!     backend:
//!       type: memory
//!       max_size: 10000
//!       eviction_policy: lfu
//!   - name: shared
//!     priority: 10
//!     backend:
//!       type: distributed
//!       nodes: ["redis://10.0.0.1:6379", "redis://10.0.0.2:6379"]
//!       serializer: { kind: compressed, algorithm: zstd }
//! ```

use crate::cache::analytics::PrometheusAnalytics;
use crate::cache::manager::{CacheLayer, CacheManager, CacheManagerConfig};
use crate::cache::storage::distributed::{InMemoryConnector, KvConnector, RedisConnector};
use crate::cache::storage::{
    DistributedStorage, DistributedStorageConfig, EvictionPolicy, MemoryStorage, MemoryStorageConfig,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Endpoint scheme served by the process-local key-value store
pub const IN_MEMORY_SCHEME: &str = "memory://";

// =============================================================================
// Configuration Types
// =============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub manager: CacheManagerConfig,
    /// Layer stack; order is irrelevant, priority decides
    pub layers: Vec<LayerConfig>,
    /// Prometheus namespace; `None` disables the exporter
    pub metrics_namespace: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manager: CacheManagerConfig::default(),
            layers: vec![LayerConfig {
                name: "local".to_string(),
                priority: 100,
                optional: false,
                backend: BackendConfig::Memory(MemoryLayerConfig::default()),
            }],
            metrics_namespace: Some("layered_cache".to_string()),
        }
    }
}

/// One layer of the stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    /// Register the layer even if it cannot connect at startup
    #[serde(default)]
    pub optional: bool,
    pub backend: BackendConfig,
}

/// Backend selection for a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory(MemoryLayerConfig),
    Distributed(DistributedStorageConfig),
}

/// Serializable subset of [`MemoryStorageConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLayerConfig {
    pub max_size: Option<usize>,
    pub max_memory: Option<u64>,
    pub eviction_policy: EvictionPolicy,
}

impl From<&MemoryLayerConfig> for MemoryStorageConfig {
    fn from(config: &MemoryLayerConfig) -> Self {
        MemoryStorageConfig {
            max_size: config.max_size,
            max_memory: config.max_memory,
            eviction_policy: config.eviction_policy,
            on_evict: None,
        }
    }
}

// =============================================================================
// Loading & Validation
// =============================================================================

impl EngineConfig {
    /// Load from a file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => Self::from_yaml_str(&content)?,
        };
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the layer stack for mistakes that would only surface later
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(Error::Configuration("layer name must not be empty".into()));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate layer name '{}'",
                    layer.name
                )));
            }

            match &layer.backend {
                BackendConfig::Memory(memory) => {
                    if memory.max_size == Some(0) || memory.max_memory == Some(0) {
                        return Err(Error::Configuration(format!(
                            "layer '{}': memory bounds must be positive",
                            layer.name
                        )));
                    }
                }
                BackendConfig::Distributed(distributed) => {
                    if distributed.nodes.is_empty() {
                        return Err(Error::Configuration(format!(
                            "layer '{}': at least one node is required",
                            layer.name
                        )));
                    }
                    let local = distributed
                        .nodes
                        .iter()
                        .filter(|n| n.starts_with(IN_MEMORY_SCHEME))
                        .count();
                    if local != 0 && local != distributed.nodes.len() {
                        return Err(Error::Configuration(format!(
                            "layer '{}': cannot mix {} nodes with remote nodes",
                            layer.name, IN_MEMORY_SCHEME
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate, construct every layer and connect distributed backends
    pub async fn build(&self) -> Result<Engine> {
        self.validate()?;

        let metrics = match &self.metrics_namespace {
            Some(namespace) => Some(Arc::new(PrometheusAnalytics::new(namespace)?)),
            None => None,
        };
        let mut manager = CacheManager::new(self.manager.clone());
        if let Some(metrics) = &metrics {
            manager = manager.with_analytics(metrics.clone());
        }

        let mut distributed = Vec::new();
        for layer in &self.layers {
            let storage: crate::cache::storage::CacheStorageRef = match &layer.backend {
                BackendConfig::Memory(memory) => {
                    Arc::new(MemoryStorage::with_config(memory.into()))
                }
                BackendConfig::Distributed(config) => {
                    let backend = Arc::new(DistributedStorage::with_connector(
                        config.clone(),
                        connector_for(config),
                    ));
                    match backend.connect().await {
                        Ok(()) => {}
                        Err(e) if layer.optional => {
                            warn!(layer = %layer.name, error = %e, "Optional layer unavailable at startup");
                        }
                        Err(e) => return Err(e),
                    }
                    distributed.push(backend.clone());
                    backend
                }
            };
            manager.add_layer(CacheLayer::shared(layer.name.clone(), storage, layer.priority))?;
        }

        info!(layers = self.layers.len(), "Cache engine built");
        Ok(Engine {
            manager,
            metrics,
            distributed,
        })
    }
}

fn connector_for(config: &DistributedStorageConfig) -> Arc<dyn KvConnector> {
    if config.nodes.iter().all(|n| n.starts_with(IN_MEMORY_SCHEME)) {
        Arc::new(InMemoryConnector::new())
    } else {
        Arc::new(RedisConnector::default())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A built manager plus the handles needed to export metrics and shut down
pub struct Engine {
    pub manager: CacheManager,
    pub metrics: Option<Arc<PrometheusAnalytics>>,
    distributed: Vec<Arc<DistributedStorage>>,
}

impl Engine {
    /// Disconnect every distributed backend
    pub async fn shutdown(&self) -> Result<()> {
        for backend in &self.distributed {
            backend.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::SetOptions;
    use crate::cache::serializer::SerializerKind;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::io::Write;

    const STACK: &str = r#"
manager:
  layer_timeout_ms: 250
layers:
  - name: local
    priority: 100
    backend:
      type: memory
      max_size: 2
      eviction_policy: lfu
  - name: shared
    priority: 10
    backend:
      type: distributed
      nodes: ["memory://a", "memory://b"]
      key_prefix: "app:"
      serializer: { kind: msgpack }
metrics_namespace: test_cache
"#;

    #[test]
    fn test_parse_yaml() {
        let config = EngineConfig::from_yaml_str(STACK).unwrap();
        assert_eq!(config.manager.layer_timeout_ms, 250);
        assert_eq!(config.manager.default_ttl_ms, 3_600_000);
        assert_eq!(config.layers.len(), 2);
        assert_eq!(
            config.layers[0].backend,
            BackendConfig::Memory(MemoryLayerConfig {
                max_size: Some(2),
                max_memory: None,
                eviction_policy: EvictionPolicy::Lfu,
            })
        );
        let BackendConfig::Distributed(shared) = &config.layers[1].backend else {
            panic!("expected a distributed layer");
        };
        assert_eq!(shared.key_prefix, "app:");
        assert_eq!(shared.serializer, SerializerKind::Msgpack);
        assert_eq!(shared.operation_timeout_ms, 2_000);
    }

    #[test]
    fn test_validate_rejects_bad_stacks() {
        let mut config = EngineConfig::from_yaml_str(STACK).unwrap();
        config.layers[1].name = "local".into();
        assert_matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("duplicate"));

        let mut config = EngineConfig::from_yaml_str(STACK).unwrap();
        config.layers[0].name = " ".into();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = EngineConfig::from_yaml_str(STACK).unwrap();
        config.layers[1].backend = BackendConfig::Distributed(DistributedStorageConfig::cluster(Vec::<String>::new()));
        assert_matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("node"));

        let mut config = EngineConfig::from_yaml_str(STACK).unwrap();
        config.layers[1].backend = BackendConfig::Distributed(DistributedStorageConfig::cluster([
            "memory://a",
            "redis://127.0.0.1:6379",
        ]));
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file_yaml_and_json() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        yaml.write_all(STACK.as_bytes()).unwrap();
        let from_yaml = EngineConfig::from_file(yaml.path()).unwrap();

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json_file
            .write_all(serde_json::to_string(&from_yaml).unwrap().as_bytes())
            .unwrap();
        let from_json = EngineConfig::from_file(json_file.path()).unwrap();
        assert_eq!(from_yaml, from_json);

        let mut broken = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        broken.write_all(b"layers: {not: [a list").unwrap();
        assert_matches!(EngineConfig::from_file(broken.path()), Err(Error::YamlParse(_)));
        assert_matches!(EngineConfig::from_file("/nonexistent/cache.yaml"), Err(Error::Io(_)));
    }

    #[tokio::test]
    async fn test_build_engine() {
        let engine = EngineConfig::from_yaml_str(STACK).unwrap().build().await.unwrap();
        assert_eq!(engine.manager.layer_names(), vec!["local", "shared"]);

        engine
            .manager
            .set("k", json!({"v": 1}), SetOptions::default().tags(["t"]), None)
            .await
            .unwrap();
        assert_eq!(engine.manager.get("k", None).await.unwrap().unwrap().value, json!({"v": 1}));
        assert_eq!(engine.manager.invalidate_by_tag("t").await.unwrap(), 2);

        let health = engine.manager.health_check().await;
        assert!(health.values().all(|healthy| *healthy));

        let rendered = engine.metrics.as_ref().unwrap().render().unwrap();
        assert!(rendered.contains("test_cache_operations_total"));

        engine.shutdown().await.unwrap();
        assert_eq!(engine.manager.health_check().await.get("shared"), Some(&false));
    }

    #[tokio::test]
    async fn test_unreachable_layer() {
        let mut config = EngineConfig::default();
        config.layers.push(LayerConfig {
            name: "remote".into(),
            priority: 1,
            optional: false,
            backend: BackendConfig::Distributed(DistributedStorageConfig::single("not a url")),
        });
        let err = config.build().await.err().unwrap();
        assert!(err.is_connectivity());

        config.layers[1].optional = true;
        let engine = config.build().await.unwrap();
        engine.manager.set("k", json!(1), SetOptions::default(), None).await.unwrap();
        assert!(engine.manager.get("k", None).await.unwrap().is_some());
        assert_eq!(engine.manager.health_check().await.get("remote"), Some(&false));
    }
}
