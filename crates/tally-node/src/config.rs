//! Node configuration for the Tally indexer.
//!
//! [`NodeConfig`] carries defaults for the data directory, HTTP binding,
//! logging and rollback policy. [`NodeConfig::load`] layers an optional TOML
//! file and `TALLY_*` environment variables over the defaults; command-line
//! flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tally_core::constants::{DEFAULT_HTTP_PORT, MAX_ROLLBACK_DEPTH};

/// Prefix for environment overrides, e.g. `TALLY_HTTP_PORT=8080`.
pub const ENV_PREFIX: &str = "TALLY";

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the HTTP server to bind to.
    pub http_bind: String,
    /// Port for the HTTP server.
    pub http_port: u16,
    /// Log level filter string (e.g. "info", "debug", "tally_node_lib=trace").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    /// Deepest rollback a single request may perform.
    pub max_rollback_depth: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");

        Self {
            data_dir,
            http_bind: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            max_rollback_depth: MAX_ROLLBACK_DEPTH,
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `path` (if any), then `TALLY_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// Socket address string for the HTTP server.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }
}
