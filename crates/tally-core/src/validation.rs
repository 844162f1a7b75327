//! Block validation against the current ledger state.
//!
//! [`validate_block`] is read-only: it consults the store for the tip height,
//! known transaction ids and referenced outputs, but never writes. Acceptance
//! is provisional until the store's `apply_block` commits.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. height is exactly `tip + 1`
//! 2. block id matches the recomputed content address
//! 3. transaction ids are unique within the block and across the ledger
//! 4. per transaction, in declared order: inputs exist and are unspent,
//!    outputs sum without overflow, and inputs equal outputs
//!
//! Zero-input transactions in the genesis block are exempt from the last
//! rule and mint their output sum. Everywhere else a zero-input transaction
//! must create nothing.

use std::collections::HashSet;

use crate::constants::GENESIS_HEIGHT;
use crate::error::{LedgerError, ValidationError};
use crate::store::LedgerStore;
use crate::types::{Block, OutputRef, Transaction};

/// Summary of a block that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatedBlock {
    /// Number of outputs the block will mark spent.
    pub inputs_spent: usize,
    /// Number of outputs the block will create.
    pub outputs_created: usize,
    /// Value introduced by exempt genesis transactions.
    pub minted: u64,
}

/// Whether `tx` may create value without matching inputs.
pub fn is_exempt_from_conservation(block_height: u64, tx: &Transaction) -> bool {
    block_height == GENESIS_HEIGHT && tx.is_minting()
}

/// Validate a block against the store's current state.
pub fn validate_block<S>(block: &Block, store: &S) -> Result<ValidatedBlock, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    // --- Height ---

    let current = store.current_height()?;
    let expected_height = current + 1;
    if block.height != expected_height {
        return Err(ValidationError::HeightMismatch {
            expected: expected_height,
            got: block.height,
        }
        .into());
    }

    // --- Identity ---

    let expected_id = block.expected_id();
    if block.id != expected_id {
        return Err(ValidationError::InvalidBlockId {
            expected: expected_id,
            got: block.id.clone(),
        }
        .into());
    }

    // --- Transaction id uniqueness ---

    let mut seen_ids = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        if !seen_ids.insert(tx.id.as_str()) || store.contains_transaction(&tx.id)? {
            return Err(ValidationError::DuplicateTransaction(tx.id.clone()).into());
        }
    }

    // --- Per-transaction rules ---

    // Outputs consumed earlier in this pass count as spent for later inputs.
    let mut consumed: HashSet<&OutputRef> = HashSet::new();
    let mut summary = ValidatedBlock::default();

    for tx in &block.transactions {
        let mut input_sum: u64 = 0;
        for input in &tx.inputs {
            let stored = store.get_output(input)?.ok_or_else(|| ValidationError::OutputNotFound {
                tx_id: tx.id.clone(),
                outpoint: input.to_string(),
            })?;
            if stored.spent || !consumed.insert(input) {
                return Err(ValidationError::OutputAlreadySpent {
                    tx_id: tx.id.clone(),
                    outpoint: input.to_string(),
                }
                .into());
            }
            input_sum = input_sum
                .checked_add(stored.value)
                .ok_or_else(|| ValidationError::ValueOverflow(tx.id.clone()))?;
        }

        let output_sum = tx
            .output_sum()
            .ok_or_else(|| ValidationError::ValueOverflow(tx.id.clone()))?;

        if is_exempt_from_conservation(block.height, tx) {
            summary.minted = summary
                .minted
                .checked_add(output_sum)
                .ok_or_else(|| ValidationError::ValueOverflow(tx.id.clone()))?;
        } else if input_sum != output_sum {
            return Err(ValidationError::ValueMismatch {
                tx_id: tx.id.clone(),
                inputs: input_sum,
                outputs: output_sum,
            }
            .into());
        }

        summary.inputs_spent += tx.inputs.len();
        summary.outputs_created += tx.outputs.len();
    }

    Ok(summary)
}
