//! # tally-node-lib: RocksDB storage, orchestration, HTTP API.
//!
//! Composes the Tally ledger core into a running indexer:
//! - [`storage::RocksStore`]: persistent ledger state backed by RocksDB
//! - [`indexer::Indexer`]: schema gate, validation and apply under one tip lock
//! - [`api`]: axum HTTP routes
//! - [`config::NodeConfig`]: layered node configuration

pub mod api;
pub mod config;
pub mod indexer;
pub mod storage;

pub use api::router;
pub use config::NodeConfig;
pub use indexer::{BlockReceipt, Indexer};
pub use storage::RocksStore;
