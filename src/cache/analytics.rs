//! Analytics Sink
//!
//! Port through which the cache manager reports operations, per-layer events
//! and memory usage to an external collector. [`PrometheusAnalytics`] is the
//! bundled adapter; [`NoopAnalytics`] discards everything.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Report Types
// =============================================================================

/// Lookup or write outcome reported per manager operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Hit,
    Miss,
    Set,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Hit => "hit",
            OperationKind::Miss => "miss",
            OperationKind::Set => "set",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened inside one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerEvent {
    Hit,
    Miss,
    Set,
    SetFailed,
    Error,
    Timeout,
    Promotion,
}

impl LayerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerEvent::Hit => "hit",
            LayerEvent::Miss => "miss",
            LayerEvent::Set => "set",
            LayerEvent::SetFailed => "set_failed",
            LayerEvent::Error => "error",
            LayerEvent::Timeout => "timeout",
            LayerEvent::Promotion => "promotion",
        }
    }
}

/// Context attached to a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationAttributes {
    pub key: String,
    pub namespace: Option<String>,
    /// Layer that answered a hit
    pub layer: Option<String>,
    pub size_bytes: Option<u64>,
}

impl OperationAttributes {
    pub fn for_key(key: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        }
    }
}

// =============================================================================
// Sink Trait
// =============================================================================

/// Receiver of cache analytics
///
/// Calls are made inline on the request path, so implementations must not
/// block.
pub trait AnalyticsSink: Send + Sync {
    /// One manager-level get or set
    fn record_operation(&self, kind: OperationKind, latency: Duration, attrs: &OperationAttributes);

    /// One event inside a layer
    fn record_layer_metrics(&self, layer: &str, event: LayerEvent, attrs: &OperationAttributes);

    /// Totals computed by a stats pass
    fn update_memory_usage(&self, total_bytes: u64, total_keys: u64);
}

/// Sink that discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn record_operation(&self, _: OperationKind, _: Duration, _: &OperationAttributes) {}

    fn record_layer_metrics(&self, _: &str, _: LayerEvent, _: &OperationAttributes) {}

    fn update_memory_usage(&self, _: u64, _: u64) {}
}

// =============================================================================
// Prometheus Adapter
// =============================================================================

/// Exports analytics as Prometheus metrics on a private registry
pub struct PrometheusAnalytics {
    registry: Registry,
    operations: IntCounterVec,
    latency: HistogramVec,
    layer_events: IntCounterVec,
    memory_bytes: IntGauge,
    keys: IntGauge,
}

impl PrometheusAnalytics {
    /// Register the cache metric families under `namespace`
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Cache operations by outcome").namespace(namespace),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let latency = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Latency of cache operations")
                .namespace(namespace)
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let layer_events = IntCounterVec::new(
            Opts::new("layer_events_total", "Events inside each cache layer").namespace(namespace),
            &["layer", "event"],
        )
        .map_err(metrics_error)?;
        let memory_bytes = IntGauge::with_opts(
            Opts::new("memory_bytes", "Approximate bytes held by in-process layers").namespace(namespace),
        )
        .map_err(metrics_error)?;
        let keys = IntGauge::with_opts(
            Opts::new("keys", "Keys held across all layers").namespace(namespace),
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(operations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(latency.clone())).map_err(metrics_error)?;
        registry.register(Box::new(layer_events.clone())).map_err(metrics_error)?;
        registry.register(Box::new(memory_bytes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(keys.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            latency,
            layer_events,
            memory_bytes,
            keys,
        })
    }

    /// Underlying registry, for mounting on an exporter
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric family in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics are not UTF-8: {}", e)))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry error: {}", e))
}

fn clamp_gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl AnalyticsSink for PrometheusAnalytics {
    fn record_operation(&self, kind: OperationKind, latency: Duration, _attrs: &OperationAttributes) {
        self.operations.with_label_values(&[kind.as_str()]).inc();
        self.latency
            .with_label_values(&[kind.as_str()])
            .observe(latency.as_secs_f64());
    }

    fn record_layer_metrics(&self, layer: &str, event: LayerEvent, _attrs: &OperationAttributes) {
        self.layer_events
            .with_label_values(&[layer, event.as_str()])
            .inc();
    }

    fn update_memory_usage(&self, total_bytes: u64, total_keys: u64) {
        self.memory_bytes.set(clamp_gauge(total_bytes));
        self.keys.set(clamp_gauge(total_keys));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_counts_operations() {
        let analytics = PrometheusAnalytics::new("layered_cache").unwrap();
        let attrs = OperationAttributes::for_key("k", None);

        analytics.record_operation(OperationKind::Hit, Duration::from_micros(40), &attrs);
        analytics.record_operation(OperationKind::Hit, Duration::from_micros(60), &attrs);
        analytics.record_operation(OperationKind::Miss, Duration::from_micros(90), &attrs);
        analytics.record_layer_metrics("l1", LayerEvent::Promotion, &attrs);
        analytics.update_memory_usage(4096, 12);

        assert_eq!(analytics.operations.with_label_values(&["hit"]).get(), 2);
        assert_eq!(analytics.operations.with_label_values(&["miss"]).get(), 1);
        assert_eq!(analytics.memory_bytes.get(), 4096);

        let text = analytics.render().unwrap();
        assert!(text.contains("layered_cache_operations_total{kind=\"hit\"} 2"));
        assert!(text.contains("layered_cache_layer_events_total"));
        assert_eq!(
            analytics.layer_events.with_label_values(&["l1", "promotion"]).get(),
            1
        );
        assert!(text.contains("layered_cache_keys 12"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = PrometheusAnalytics::new("a").unwrap();
        let second = PrometheusAnalytics::new("a").unwrap();
        first.update_memory_usage(1, 1);
        assert_eq!(second.keys.get(), 0);
    }
}
