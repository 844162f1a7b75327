//! Protocol constants for the Tally ledger.

/// Height of the first block. The chain is empty at height 0.
pub const GENESIS_HEIGHT: u64 = 1;

/// Maximum number of blocks a single rollback may remove.
pub const MAX_ROLLBACK_DEPTH: u64 = 2000;

/// Default port for the HTTP API.
pub const DEFAULT_HTTP_PORT: u16 = 3000;
