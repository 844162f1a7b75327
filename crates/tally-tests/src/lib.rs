//! Integration test suite for Tally.
//!
//! Runs the ledger scenarios, adversarial submissions and rollback
//! properties against both the in-memory and the RocksDB store.

pub mod helpers;
