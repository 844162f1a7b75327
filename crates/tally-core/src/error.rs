//! Error types for the Tally ledger.
use thiserror::Error;

/// Malformed block shape. The reason names the offending field and index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SchemaError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid block height: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("Invalid block id: expected {expected}, got {got}")] InvalidBlockId { expected: String, got: String },
    #[error("Duplicate transaction id: {0}")] DuplicateTransaction(String),
    #[error("Referenced output not found: {outpoint} (in transaction {tx_id})")] OutputNotFound { tx_id: String, outpoint: String },
    #[error("Output already spent: {outpoint} (in transaction {tx_id})")] OutputAlreadySpent { tx_id: String, outpoint: String },
    #[error("Input sum {inputs} does not equal output sum {outputs} in transaction {tx_id}")] ValueMismatch { tx_id: String, inputs: u64, outputs: u64 },
    #[error("Value overflow in transaction {0}")] ValueOverflow(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("address must be a non-empty string")] EmptyAddress,
    #[error("height must be a non-negative integer, got {0:?}")] InvalidHeight(String),
    #[error("index must be a non-negative integer, got {0:?}")] InvalidIndex(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RollbackError {
    #[error("cannot roll back to a future height: target {target}, current {current}")] FutureHeight { target: u64, current: u64 },
    #[error("Cannot rollback more than {max} blocks (requested {depth})")] TooDeep { depth: u64, max: u64 },
}

/// Consistency refusals raised by a store while applying or rolling back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate transaction: {0}")] DuplicateTransaction(String),
    #[error("missing output: {0}")] MissingOutput(String),
    #[error("output already spent: {0}")] OutputAlreadySpent(String),
    #[error("block not found at height {0}")] BlockNotFound(u64),
    #[error("corrupt record: {0}")] CorruptRecord(String),
    #[error("balance overflow for {0}")] BalanceOverflow(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)] Schema(#[from] SchemaError),
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Argument(#[from] ArgumentError),
    #[error(transparent)] Rollback(#[from] RollbackError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error("persistence: {0}")] Persistence(String),
}

impl LedgerError {
    /// Whether the caller can fix this by resubmitting different input.
    ///
    /// Store refusals about heights, duplicates and spends are caller errors
    /// (typically a lost race for the next height). Missing blocks, corrupt
    /// records and backend failures are not.
    pub fn is_client_error(&self) -> bool {
        match self {
            LedgerError::Schema(_)
            | LedgerError::Validation(_)
            | LedgerError::Argument(_)
            | LedgerError::Rollback(_) => true,
            LedgerError::ChainState(e) => matches!(
                e,
                ChainStateError::HeightMismatch { .. }
                    | ChainStateError::DuplicateTransaction(_)
                    | ChainStateError::MissingOutput(_)
                    | ChainStateError::OutputAlreadySpent(_)
            ),
            LedgerError::Persistence(_) => false,
        }
    }
}
