//! Block processing orchestration.
//!
//! The [`Indexer`] wires the schema gate, the block validator and a
//! [`LedgerStore`] into the operations the HTTP layer exposes. It owns the
//! single "advance the tip" critical section: validation and apply (or a
//! rollback) run under one lock, so a block is never validated against a tip
//! that moves before it is written.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tally_core::constants::MAX_ROLLBACK_DEPTH;
use tally_core::error::{LedgerError, RollbackError};
use tally_core::schema;
use tally_core::store::{LedgerStore, RollbackResult};
use tally_core::types::{Block, OutputRef, StoredOutput};
use tally_core::validation;

/// Outcome of a successfully indexed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReceipt {
    pub height: u64,
    pub block_id: String,
    pub outputs_created: usize,
    pub outputs_spent: usize,
    /// Value created by exempt genesis transactions.
    pub minted: u64,
}

/// Ledger indexer over a shared store.
pub struct Indexer<S> {
    store: Arc<S>,
    tip_lock: Mutex<()>,
    max_rollback_depth: u64,
}

impl<S: LedgerStore> Indexer<S> {
    /// Create an indexer with the default rollback depth limit.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            tip_lock: Mutex::new(()),
            max_rollback_depth: MAX_ROLLBACK_DEPTH,
        }
    }

    /// Override the maximum number of blocks a single rollback may remove.
    pub fn with_max_rollback_depth(mut self, depth: u64) -> Self {
        self.max_rollback_depth = depth;
        self
    }

    pub fn max_rollback_depth(&self) -> u64 {
        self.max_rollback_depth
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gate, validate and apply an untrusted JSON block.
    pub fn process_block(&self, raw: &Value) -> Result<BlockReceipt, LedgerError> {
        let block = schema::validate_block(raw).map_err(|e| {
            debug!(reason = %e, "rejected malformed block");
            LedgerError::from(e)
        })?;
        self.submit_block(&block)
    }

    /// Validate and apply an already-typed block.
    pub fn submit_block(&self, block: &Block) -> Result<BlockReceipt, LedgerError> {
        let _tip = self.tip_lock.lock();

        let summary = validation::validate_block(block, self.store.as_ref())
            .inspect_err(|e| log_rejection(block.height, e))?;

        let applied = self
            .store
            .apply_block(block)
            .inspect_err(|e| log_rejection(block.height, e))?;

        info!(
            height = applied.height,
            block_id = %block.id,
            txs = block.transactions.len(),
            outputs_created = applied.outputs_created,
            outputs_spent = applied.outputs_spent,
            "applied block"
        );

        Ok(BlockReceipt {
            height: applied.height,
            block_id: block.id.clone(),
            outputs_created: applied.outputs_created,
            outputs_spent: applied.outputs_spent,
            minted: summary.minted,
        })
    }

    /// Balance of `address` derived from its unspent outputs.
    pub fn get_balance(&self, address: &str) -> Result<u64, LedgerError> {
        let address = schema::validate_address(address)?;
        self.store.get_balance(address)
    }

    /// Roll the tip back to `target`, at most `max_rollback_depth` blocks.
    pub fn rollback_to_height(&self, target: u64) -> Result<RollbackResult, LedgerError> {
        let _tip = self.tip_lock.lock();

        let current = self.store.current_height()?;
        if target > current {
            debug!(target, current, "rejected rollback to future height");
            return Err(RollbackError::FutureHeight { target, current }.into());
        }

        let depth = current - target;
        if depth > self.max_rollback_depth {
            debug!(depth, max = self.max_rollback_depth, "rejected rollback");
            return Err(RollbackError::TooDeep {
                depth,
                max: self.max_rollback_depth,
            }
            .into());
        }

        let result = self.store.rollback(target).inspect_err(|e| {
            warn!(target, error = %e, "rollback failed");
        })?;

        info!(
            from = current,
            to = result.height,
            blocks_removed = result.blocks_removed,
            outputs_restored = result.outputs_restored,
            "rolled back"
        );

        Ok(result)
    }

    pub fn current_height(&self) -> Result<u64, LedgerError> {
        self.store.current_height()
    }

    pub fn get_output(&self, output: &OutputRef) -> Result<Option<StoredOutput>, LedgerError> {
        self.store.get_output(output)
    }

    pub fn get_block(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        self.store.get_block(height)
    }

    /// Unspent outputs owned by `address`.
    pub fn unspent_outputs(&self, address: &str) -> Result<Vec<(OutputRef, StoredOutput)>, LedgerError> {
        let address = schema::validate_address(address)?;
        self.store.unspent_outputs(address)
    }
}

fn log_rejection(height: u64, err: &LedgerError) {
    if err.is_client_error() {
        debug!(height, reason = %err, "rejected block");
    } else {
        warn!(height, error = %err, "failed to apply block");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::error::{ArgumentError, ChainStateError, SchemaError, ValidationError};
    use tally_core::store::MemoryStore;
    use tally_core::types::{Output, Transaction};

    fn indexer() -> Indexer<MemoryStore> {
        Indexer::new(Arc::new(MemoryStore::new()))
    }

    fn tx(id: &str, inputs: Vec<OutputRef>, outputs: Vec<(&str, u64)>) -> Transaction {
        Transaction {
            id: id.to_string(),
            inputs,
            outputs: outputs
                .into_iter()
                .map(|(address, value)| Output {
                    address: address.to_string(),
                    value,
                })
                .collect(),
        }
    }

    fn funded() -> Indexer<MemoryStore> {
        let idx = indexer();
        idx.submit_block(&Block::new(1, vec![tx("g", vec![], vec![("addr1", 100)])]))
            .unwrap();
        idx
    }

    #[test]
    fn process_block_from_json() {
        let idx = indexer();
        let block = Block::new(1, vec![tx("g", vec![], vec![("addr1", 100)])]);
        let raw = serde_json::to_value(&block).unwrap();

        let receipt = idx.process_block(&raw).unwrap();
        assert_eq!(receipt, BlockReceipt {
            height: 1,
            block_id: block.id.clone(),
            outputs_created: 1,
            outputs_spent: 0,
            minted: 100,
        });
        assert_eq!(idx.get_balance("addr1").unwrap(), 100);
    }

    #[test]
    fn malformed_json_is_schema_error() {
        let idx = indexer();
        let err = idx.process_block(&json!({"id": "x", "height": 0, "transactions": []})).unwrap_err();
        assert_eq!(
            err,
            SchemaError("Block height must be a positive integer".into()).into()
        );
        assert_eq!(idx.current_height().unwrap(), 0);
    }

    #[test]
    fn validation_runs_before_apply() {
        let idx = funded();
        let bad = Block::new(2, vec![tx("t1", vec![OutputRef::new("g", 0)], vec![("addr2", 99)])]);
        let err = idx.submit_block(&bad).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::ValueMismatch { .. })));
        assert_eq!(idx.current_height().unwrap(), 1);
        assert_eq!(idx.get_balance("addr1").unwrap(), 100);
    }

    #[test]
    fn resubmitting_applied_block_is_rejected() {
        let idx = indexer();
        let block = Block::new(1, vec![tx("g", vec![], vec![("addr1", 100)])]);
        idx.submit_block(&block).unwrap();
        let err = idx.submit_block(&block).unwrap_err();
        assert_eq!(err, ValidationError::HeightMismatch { expected: 2, got: 1 }.into());
        assert_eq!(idx.get_balance("addr1").unwrap(), 100);
    }

    #[test]
    fn empty_address_is_argument_error() {
        let idx = funded();
        assert_eq!(idx.get_balance("").unwrap_err(), ArgumentError::EmptyAddress.into());
        assert_eq!(idx.unspent_outputs("").unwrap_err(), ArgumentError::EmptyAddress.into());
        assert_eq!(idx.get_balance("nobody").unwrap(), 0);
    }

    #[test]
    fn rollback_to_future_height_rejected() {
        let idx = funded();
        let err = idx.rollback_to_height(5).unwrap_err();
        assert_eq!(err, RollbackError::FutureHeight { target: 5, current: 1 }.into());
        assert!(err.to_string().contains("cannot roll back to a future height"));
    }

    #[test]
    fn rollback_to_current_height_is_noop() {
        let idx = funded();
        let result = idx.rollback_to_height(1).unwrap();
        assert_eq!(result.height, 1);
        assert_eq!(result.blocks_removed, 0);
        assert_eq!(idx.get_balance("addr1").unwrap(), 100);
    }

    #[test]
    fn rollback_depth_limit() {
        let idx = funded().with_max_rollback_depth(2);
        for h in 2..=4 {
            idx.submit_block(&Block::new(h, vec![])).unwrap();
        }

        let err = idx.rollback_to_height(1).unwrap_err();
        assert_eq!(err, RollbackError::TooDeep { depth: 3, max: 2 }.into());
        assert_eq!(idx.current_height().unwrap(), 4);

        assert_eq!(idx.rollback_to_height(2).unwrap().blocks_removed, 2);
        assert_eq!(idx.current_height().unwrap(), 2);
    }

    #[test]
    fn default_depth_limit_is_2000() {
        let idx = funded();
        assert_eq!(idx.max_rollback_depth(), 2000);
        for h in 2..=2002 {
            idx.submit_block(&Block::new(h, vec![])).unwrap();
        }
        let err = idx.rollback_to_height(1).unwrap_err();
        assert!(err.to_string().starts_with("Cannot rollback more than 2000 blocks"));
        assert_eq!(idx.current_height().unwrap(), 2002);

        idx.rollback_to_height(2).unwrap();
        assert_eq!(idx.current_height().unwrap(), 2);
    }

    #[test]
    fn concurrent_submissions_for_one_height_have_one_winner() {
        let idx = funded();
        let blocks: Vec<Block> = (0..8)
            .map(|i| {
                let to = format!("addr-{i}");
                Block::new(2, vec![tx(
                    &format!("spend-{i}"),
                    vec![OutputRef::new("g", 0)],
                    vec![(to.as_str(), 100)],
                )])
            })
            .collect();

        let results: Vec<Result<BlockReceipt, LedgerError>> = std::thread::scope(|s| {
            let handles: Vec<_> = blocks
                .iter()
                .map(|block| s.spawn(|| idx.submit_block(block)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(err.is_client_error(), "loser got server error: {err:?}");
        }
        assert_eq!(idx.current_height().unwrap(), 2);

        let total: u64 = (0..8)
            .map(|i| idx.get_balance(&format!("addr-{i}")).unwrap())
            .sum();
        assert_eq!(total, 100);
        assert_eq!(idx.get_balance("addr1").unwrap(), 0);
    }

    #[test]
    fn store_refusal_surfaces_as_chain_state_error() {
        let store = Arc::new(MemoryStore::new());
        let idx = Indexer::new(Arc::clone(&store));
        idx.submit_block(&Block::new(1, vec![tx("g", vec![], vec![("addr1", 100)])]))
            .unwrap();

        // Direct store write behind the indexer's back.
        let err = store
            .apply_block(&Block::new(3, vec![]))
            .unwrap_err();
        assert_eq!(err, ChainStateError::HeightMismatch { expected: 2, got: 3 }.into());
        assert!(err.is_client_error());
    }
}
