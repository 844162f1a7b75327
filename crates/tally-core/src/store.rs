//! Ledger store interface and in-memory implementation.
//!
//! Provides the [`LedgerStore`] trait for block persistence, output
//! bookkeeping and rollback. The [`MemoryStore`] is suitable for testing;
//! the production node uses RocksDB (tally-node).
//!
//! Blocks passed to [`LedgerStore::apply_block`] should already be
//! validated. Stores still refuse anything that would break their own
//! invariants (height gaps, reused transaction ids, missing or spent
//! inputs), so a lost race between two writers cannot corrupt state.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{ChainStateError, LedgerError};
use crate::types::{Block, OutputRef, StoredOutput};

/// Result of applying a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyBlockResult {
    /// Height of the applied block, now the tip.
    pub height: u64,
    /// Number of outputs created by the block's transactions.
    pub outputs_created: usize,
    /// Number of previously unspent outputs the block spent.
    pub outputs_spent: usize,
}

/// Result of rolling the tip back.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    /// Tip height after the rollback.
    pub height: u64,
    /// Number of blocks deleted.
    pub blocks_removed: usize,
    /// Number of outputs deleted (created above the target height).
    pub outputs_removed: usize,
    /// Number of surviving outputs that became unspent again.
    pub outputs_restored: usize,
}

/// Persistent ledger state.
///
/// All methods take `&self`: implementations serialize their own writes and
/// serve reads from a consistent view, so one handle can be shared across
/// threads behind an `Arc`.
pub trait LedgerStore: Send + Sync {
    /// Persist a block at `tip + 1`, creating its outputs and marking the
    /// outputs it spends. All-or-nothing.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::HeightMismatch`] if the block is not the next height
    /// - [`ChainStateError::DuplicateTransaction`] if a transaction id is reused
    /// - [`ChainStateError::MissingOutput`] / [`ChainStateError::OutputAlreadySpent`]
    ///   if an input cannot be spent
    /// - [`LedgerError::Persistence`] on backend failure, with nothing written
    fn apply_block(&self, block: &Block) -> Result<ApplyBlockResult, LedgerError>;

    /// Delete every block above `target`, unspending what they spent.
    ///
    /// A `target` at or above the tip is a no-op. Depth limits are the
    /// caller's policy, not the store's.
    fn rollback(&self, target: u64) -> Result<RollbackResult, LedgerError>;

    /// Highest stored block height, or 0 for an empty ledger.
    fn current_height(&self) -> Result<u64, LedgerError>;

    /// Look up an output by reference, spent or not.
    fn get_output(&self, output: &OutputRef) -> Result<Option<StoredOutput>, LedgerError>;

    /// Get the block at `height`. Returns `None` above the tip.
    fn get_block(&self, height: u64) -> Result<Option<Block>, LedgerError>;

    /// Whether a transaction with this id has been applied.
    fn contains_transaction(&self, tx_id: &str) -> Result<bool, LedgerError>;

    /// All unspent outputs owned by `address`, read from one consistent view.
    fn unspent_outputs(&self, address: &str) -> Result<Vec<(OutputRef, StoredOutput)>, LedgerError>;

    /// Sum of the unspent outputs owned by `address`; 0 if there are none.
    ///
    /// Always derived from the output set, never cached.
    fn get_balance(&self, address: &str) -> Result<u64, LedgerError> {
        self.unspent_outputs(address)?
            .iter()
            .try_fold(0u64, |acc, (_, out)| acc.checked_add(out.value))
            .ok_or_else(|| ChainStateError::BalanceOverflow(address.to_string()).into())
    }
}

#[derive(Default)]
struct MemoryState {
    /// Height → block.
    blocks: BTreeMap<u64, Block>,
    /// Transaction id → height of its block.
    transactions: HashMap<String, u64>,
    /// Every output ever created and not rolled back.
    outputs: HashMap<OutputRef, StoredOutput>,
}

impl MemoryState {
    fn tip(&self) -> u64 {
        self.blocks.keys().next_back().copied().unwrap_or(0)
    }
}

/// In-memory ledger store for testing.
///
/// Keeps everything in maps behind a read-write lock. `apply_block` checks
/// every precondition before touching the maps, so a refused block leaves
/// no trace.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outputs held, spent or unspent.
    pub fn output_count(&self) -> usize {
        self.state.read().outputs.len()
    }
}

impl LedgerStore for MemoryStore {
    fn apply_block(&self, block: &Block) -> Result<ApplyBlockResult, LedgerError> {
        let mut state = self.state.write();

        let expected = state.tip() + 1;
        if block.height != expected {
            return Err(ChainStateError::HeightMismatch {
                expected,
                got: block.height,
            }
            .into());
        }

        // Check phase: nothing below this block mutates until all checks pass.
        let mut new_ids = HashSet::new();
        let mut spends = HashSet::new();
        for tx in &block.transactions {
            if state.transactions.contains_key(&tx.id) || !new_ids.insert(tx.id.as_str()) {
                return Err(ChainStateError::DuplicateTransaction(tx.id.clone()).into());
            }
            for input in &tx.inputs {
                let stored = state
                    .outputs
                    .get(input)
                    .ok_or_else(|| ChainStateError::MissingOutput(input.to_string()))?;
                if stored.spent || !spends.insert(input) {
                    return Err(ChainStateError::OutputAlreadySpent(input.to_string()).into());
                }
            }
        }

        // Write phase.
        let mut outputs_created = 0;
        let mut outputs_spent = 0;
        for tx in &block.transactions {
            for input in &tx.inputs {
                if let Some(stored) = state.outputs.get_mut(input) {
                    stored.spent = true;
                    stored.spending_tx_id = Some(tx.id.clone());
                    outputs_spent += 1;
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                state
                    .outputs
                    .insert(tx.output_ref(index as u64), StoredOutput::unspent(output, block.height));
                outputs_created += 1;
            }
            state.transactions.insert(tx.id.clone(), block.height);
        }
        state.blocks.insert(block.height, block.clone());

        Ok(ApplyBlockResult {
            height: block.height,
            outputs_created,
            outputs_spent,
        })
    }

    fn rollback(&self, target: u64) -> Result<RollbackResult, LedgerError> {
        let mut state = self.state.write();
        let tip = state.tip();
        if target >= tip {
            return Ok(RollbackResult {
                height: tip,
                ..RollbackResult::default()
            });
        }

        // Collect first so a missing block aborts before anything changes.
        let doomed: Vec<Block> = ((target + 1)..=tip)
            .rev()
            .map(|h| {
                state
                    .blocks
                    .get(&h)
                    .cloned()
                    .ok_or(ChainStateError::BlockNotFound(h))
            })
            .collect::<Result<_, _>>()?;

        // Every spend being undone must still be recorded against its spender.
        for block in &doomed {
            for tx in &block.transactions {
                for input in &tx.inputs {
                    let stored = state.outputs.get(input).ok_or_else(|| {
                        ChainStateError::CorruptRecord(format!(
                            "output {input} spent by {} is missing",
                            tx.id
                        ))
                    })?;
                    if stored.produced_at_height <= target
                        && stored.spending_tx_id.as_deref() != Some(tx.id.as_str())
                    {
                        return Err(ChainStateError::CorruptRecord(format!(
                            "output {input} not spent by {}",
                            tx.id
                        ))
                        .into());
                    }
                }
            }
        }

        let mut result = RollbackResult {
            height: target,
            ..RollbackResult::default()
        };

        for block in &doomed {
            for tx in block.transactions.iter().rev() {
                for index in 0..tx.outputs.len() {
                    if state.outputs.remove(&tx.output_ref(index as u64)).is_some() {
                        result.outputs_removed += 1;
                    }
                }
                for input in &tx.inputs {
                    // Outputs created above the target go with their block.
                    if let Some(stored) = state.outputs.get_mut(input) {
                        if stored.produced_at_height <= target {
                            stored.spent = false;
                            stored.spending_tx_id = None;
                            result.outputs_restored += 1;
                        }
                    }
                }
                state.transactions.remove(&tx.id);
            }
            state.blocks.remove(&block.height);
            result.blocks_removed += 1;
        }

        Ok(result)
    }

    fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(self.state.read().tip())
    }

    fn get_output(&self, output: &OutputRef) -> Result<Option<StoredOutput>, LedgerError> {
        Ok(self.state.read().outputs.get(output).cloned())
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        Ok(self.state.read().blocks.get(&height).cloned())
    }

    fn contains_transaction(&self, tx_id: &str) -> Result<bool, LedgerError> {
        Ok(self.state.read().transactions.contains_key(tx_id))
    }

    fn unspent_outputs(&self, address: &str) -> Result<Vec<(OutputRef, StoredOutput)>, LedgerError> {
        let state = self.state.read();
        let mut utxos: Vec<(OutputRef, StoredOutput)> = state
            .outputs
            .iter()
            .filter(|(_, out)| !out.spent && out.address == address)
            .map(|(r, out)| (r.clone(), out.clone()))
            .collect();
        utxos.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(utxos)
    }
}
