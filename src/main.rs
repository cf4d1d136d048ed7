//! Layered Cache CLI
//!
//! Builds a cache engine from a configuration file and runs one operation
//! against it. Results are printed to stdout as JSON; logs go to stderr.
//!
//! ```text
//! layered-cache --config cache.yaml set user:1 '{"name":"alice"}' --tag users
//! layered-cache --config cache.yaml get user:1
//! layered-cache --config cache.yaml invalidate-tag users
//! layered-cache --config cache.yaml stats
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use layered_cache::{EngineConfig, SetOptions, WarmEntry};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Layered Cache - multi-level cache engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML, or JSON with a .json extension)
    #[arg(long, env = "CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a key
    Get {
        key: String,
        #[arg(long, short)]
        namespace: Option<String>,
    },
    /// Write a key; VALUE is parsed as JSON, falling back to a plain string
    Set {
        key: String,
        value: String,
        #[arg(long, short)]
        namespace: Option<String>,
        /// Entry lifetime in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
        /// Invalidation tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Delete a key from every layer
    Delete {
        key: String,
        #[arg(long, short)]
        namespace: Option<String>,
    },
    /// Delete every entry carrying a tag
    InvalidateTag { tag: String },
    /// Delete keys matching a glob, or a regex written as /regex/
    InvalidatePattern { pattern: String },
    /// Load entries from a JSON file into every layer
    Warm { file: PathBuf },
    /// Drop expired entries
    Cleanup,
    /// Print cache statistics
    Stats,
    /// Print layer health
    Health,
    /// Print Prometheus metrics gathered during this run
    Metrics,
}

/// Entry format accepted by `warm`
#[derive(Debug, Deserialize)]
struct WarmFileEntry {
    key: String,
    value: Value,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    ttl_ms: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<WarmFileEntry> for WarmEntry {
    fn from(file: WarmFileEntry) -> Self {
        let mut options = SetOptions::default().tags(file.tags);
        options.ttl = file.ttl_ms.map(Duration::from_millis);
        let entry = WarmEntry::new(file.key, file.value).with_options(options);
        match file.namespace {
            Some(namespace) => entry.in_namespace(namespace),
            None => entry,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    info!(version = layered_cache::VERSION, layers = config.layers.len(), "Starting layered cache");

    let engine = config.build().await.context("failed to build cache engine")?;
    let manager = &engine.manager;

    let output = match args.command {
        Command::Get { key, namespace } => {
            let entry = manager.get(&key, namespace.as_deref()).await?;
            Some(serde_json::to_value(entry)?)
        }
        Command::Set {
            key,
            value,
            namespace,
            ttl_ms,
            tags,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let mut options = SetOptions::default().tags(tags);
            options.ttl = ttl_ms.map(Duration::from_millis);
            manager.set(&key, value, options, namespace.as_deref()).await?;
            Some(json!({ "stored": key }))
        }
        Command::Delete { key, namespace } => {
            let removed = manager.delete(&key, namespace.as_deref()).await?;
            Some(json!({ "removed": removed }))
        }
        Command::InvalidateTag { tag } => {
            let removed = manager.invalidate_by_tag(&tag).await?;
            Some(json!({ "removed": removed }))
        }
        Command::InvalidatePattern { pattern } => {
            let removed = manager.invalidate_by_pattern(&pattern).await?;
            Some(json!({ "removed": removed }))
        }
        Command::Warm { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entries: Vec<WarmFileEntry> = serde_json::from_str(&content)
                .with_context(|| format!("{} is not a JSON list of entries", file.display()))?;
            let report = manager
                .warm_cache(entries.into_iter().map(WarmEntry::from).collect())
                .await;
            Some(serde_json::to_value(report)?)
        }
        Command::Cleanup => {
            let removed = manager.cleanup().await?;
            Some(json!({ "removed": removed }))
        }
        Command::Stats => Some(serde_json::to_value(manager.get_stats().await)?),
        Command::Health => Some(serde_json::to_value(manager.health_check().await)?),
        Command::Metrics => {
            let metrics = engine
                .metrics
                .as_ref()
                .context("metrics are disabled (metrics_namespace is unset)")?;
            print!("{}", metrics.render()?);
            None
        }
    };

    if let Some(output) = output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    engine.shutdown().await?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "redis=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
