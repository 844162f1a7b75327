//! Tally indexer binary.
//!
//! Opens the RocksDB ledger, wraps it in an indexer and serves the HTTP API
//! until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tally_node_lib::{router, Indexer, NodeConfig, RocksStore};
use tracing::info;

/// Tally UTXO ledger indexer.
#[derive(Parser, Debug)]
#[command(
    name = "tally-node",
    version,
    about = "UTXO ledger indexer with RocksDB storage and an HTTP API"
)]
struct Args {
    /// Optional TOML config file, applied before TALLY_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for ledger storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// HTTP server bind address
    #[arg(long)]
    http_bind: Option<String>,

    /// HTTP server port
    #[arg(long)]
    http_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum number of blocks a single rollback may remove
    #[arg(long)]
    max_rollback_depth: Option<u64>,
}

impl Args {
    /// Load layered config, then apply CLI overrides.
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(bind) = self.http_bind {
            config.http_bind = bind;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(depth) = self.max_rollback_depth {
            config.max_rollback_depth = depth;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&config.log_level, &config.log_format);

    info!("Tally Indexer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        data_dir = %config.data_dir.display(),
        http_addr = %config.http_addr(),
        max_rollback_depth = config.max_rollback_depth,
        "starting"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {}", config.data_dir.display()))?;

    let store = RocksStore::open(config.db_path())
        .with_context(|| format!("failed to open ledger at {}", config.db_path().display()))?;
    let indexer = Arc::new(
        Indexer::new(Arc::new(store)).with_max_rollback_depth(config.max_rollback_depth),
    );

    let height = indexer.current_height()?;
    info!(height, "ledger opened");

    let listener = tokio::net::TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr()))?;
    info!("HTTP server listening on http://{}", config.http_addr());

    axum::serve(listener, router(Arc::clone(&indexer)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    indexer.store().flush()?;
    info!("Tally indexer shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down..."),
        Err(e) => tracing::error!("failed to listen for Ctrl+C: {e}"),
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
