//! Shared test helpers for integration tests.

use std::collections::BTreeMap;

use tally_core::store::LedgerStore;
use tally_core::types::{Block, Output, OutputRef, StoredOutput, Transaction};
use tally_node_lib::RocksStore;
use tempfile::TempDir;

/// Create a transaction paying `(address, value)` pairs.
pub fn make_tx(id: &str, inputs: Vec<OutputRef>, outputs: &[(&str, u64)]) -> Transaction {
    Transaction {
        id: id.to_string(),
        inputs,
        outputs: outputs
            .iter()
            .map(|(address, value)| Output {
                address: address.to_string(),
                value: *value,
            })
            .collect(),
    }
}

/// Genesis block minting `value` to `address` in transaction `g`.
pub fn make_genesis(address: &str, value: u64) -> Block {
    Block::new(1, vec![make_tx("g", vec![], &[(address, value)])])
}

/// Open a RocksStore in a fresh temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub fn temp_rocks() -> (RocksStore, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RocksStore::open(dir.path().join("ledger")).expect("open rocks store");
    (store, dir)
}

/// Everything observable about a ledger, for equality checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerView {
    pub height: u64,
    pub blocks: Vec<Block>,
    pub outputs: BTreeMap<OutputRef, Option<StoredOutput>>,
    pub balances: BTreeMap<String, u64>,
}

/// Capture the store's state as seen through `refs` and `addresses`.
pub fn capture<S: LedgerStore + ?Sized>(
    store: &S,
    refs: &[OutputRef],
    addresses: &[String],
) -> LedgerView {
    let height = store.current_height().expect("height");
    let blocks = (1..=height)
        .map(|h| store.get_block(h).expect("get_block").expect("block present"))
        .collect();
    let outputs = refs
        .iter()
        .map(|r| (r.clone(), store.get_output(r).expect("get_output")))
        .collect();
    let balances = addresses
        .iter()
        .map(|a| (a.clone(), store.get_balance(a).expect("balance")))
        .collect();
    LedgerView {
        height,
        blocks,
        outputs,
        balances,
    }
}

/// Deterministic generator of valid chains.
///
/// Each block spends previously created outputs and splits each one in two.
/// Outputs created in a block only become spendable from the next block.
pub struct ChainGen {
    height: u64,
    addresses: Vec<String>,
    unspent: Vec<(OutputRef, u64)>,
    created: Vec<OutputRef>,
}

impl ChainGen {
    /// Start a chain whose genesis pays `fanout` outputs of `value` each.
    pub fn new(address_count: usize, fanout: usize, value: u64) -> (Self, Block) {
        let addresses: Vec<String> = (0..address_count.max(1))
            .map(|i| format!("addr{i}"))
            .collect();
        let outputs: Vec<(&str, u64)> = (0..fanout)
            .map(|i| (addresses[i % addresses.len()].as_str(), value))
            .collect();
        let genesis = Block::new(1, vec![make_tx("g", vec![], &outputs)]);

        let created: Vec<OutputRef> = (0..fanout as u64).map(|i| OutputRef::new("g", i)).collect();
        let unspent = created.iter().map(|r| (r.clone(), value)).collect();

        let generator = Self {
            height: 1,
            addresses,
            unspent,
            created,
        };
        (generator, genesis)
    }

    /// Build the next block. Each `(pick, split)` spends one unspent output.
    pub fn next_block(&mut self, picks: &[(usize, u64)]) -> Block {
        self.height += 1;
        let n = self.addresses.len();
        let mut txs = Vec::with_capacity(picks.len());
        let mut fresh = Vec::new();

        for (j, &(pick, split)) in picks.iter().enumerate() {
            if self.unspent.is_empty() {
                break;
            }
            let (input, value) = self.unspent.swap_remove(pick % self.unspent.len());
            let first = split % (value + 1);
            let id = format!("h{}-t{}", self.height, j);
            let a = self.addresses[(pick + j) % n].clone();
            let b = self.addresses[(split as usize) % n].clone();
            txs.push(make_tx(&id, vec![input], &[(a.as_str(), first), (b.as_str(), value - first)]));

            for (index, v) in [(0, first), (1, value - first)] {
                let r = OutputRef::new(id.as_str(), index);
                self.created.push(r.clone());
                fresh.push((r, v));
            }
        }

        self.unspent.extend(fresh);
        Block::new(self.height, txs)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Every output reference any generated block created.
    pub fn created(&self) -> &[OutputRef] {
        &self.created
    }
}
