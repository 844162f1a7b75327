//! # tally-core
//! Foundation types, validation rules and the store interface for the
//! Tally ledger indexer.
//!
//! - [`schema`]: structural gate for untrusted JSON and query parameters
//! - [`validation`]: block rules evaluated against a [`store::LedgerStore`]
//! - [`store`]: the store trait and an in-memory implementation

pub mod constants;
pub mod error;
pub mod schema;
pub mod store;
pub mod types;
pub mod validation;
