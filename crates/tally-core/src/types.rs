//! Core ledger types: outputs, transactions, blocks.
//!
//! Wire encoding is JSON with camelCase field names; storage encoding is
//! bincode with the standard config. All values are u64.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Reference to a specific output of a previous transaction.
///
/// This is also the shape of a transaction input on the wire.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct OutputRef {
    /// Id of the transaction that produced the output.
    pub tx_id: String,
    /// Position of the output within that transaction.
    pub index: u64,
}

impl OutputRef {
    pub fn new(tx_id: impl Into<String>, index: u64) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// A transaction output, paying `value` to `address`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Output {
    pub address: String,
    pub value: u64,
}

/// A transaction moving value from spent outputs to new outputs.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Caller-assigned id, unique across the ledger.
    pub id: String,
    /// Outputs consumed by this transaction.
    pub inputs: Vec<OutputRef>,
    /// Outputs created by this transaction.
    pub outputs: Vec<Output>,
}

impl Transaction {
    /// Whether this transaction creates value without spending anything.
    pub fn is_minting(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn output_sum(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Reference to this transaction's output at `index`.
    pub fn output_ref(&self, index: u64) -> OutputRef {
        OutputRef::new(self.id.clone(), index)
    }
}

/// A block of transactions at a given height.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Content address: see [`block_id`].
    pub id: String,
    /// 1-based chain position.
    pub height: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block, deriving its id from the height and transaction ids.
    pub fn new(height: u64, transactions: Vec<Transaction>) -> Self {
        let id = block_id(height, transactions.iter().map(|tx| tx.id.as_str()));
        Self {
            id,
            height,
            transactions,
        }
    }

    /// Recompute the id this block should carry.
    pub fn expected_id(&self) -> String {
        block_id(self.height, self.transactions.iter().map(|tx| tx.id.as_str()))
    }
}

/// Deterministic block id.
///
/// Lowercase hex SHA-256 over the decimal height followed by the transaction
/// ids sorted lexicographically, with no separators.
pub fn block_id<'a>(height: u64, tx_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = tx_ids.into_iter().collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(height.to_string().as_bytes());
    for id in ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// An output as persisted by a store, with its spend state.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct StoredOutput {
    pub address: String,
    pub value: u64,
    pub spent: bool,
    /// Id of the transaction that spent this output, if any.
    pub spending_tx_id: Option<String>,
    /// Height of the block that created this output.
    pub produced_at_height: u64,
}

impl StoredOutput {
    /// A freshly created, unspent output.
    pub fn unspent(output: &Output, height: u64) -> Self {
        Self {
            address: output.address.clone(),
            value: output.value,
            spent: false,
            spending_tx_id: None,
            produced_at_height: height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn block_id_is_order_independent() {
        let a = Block::new(5, vec![tx("b"), tx("a"), tx("c")]);
        let b = Block::new(5, vec![tx("c"), tx("a"), tx("b")]);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn block_id_depends_on_height() {
        let a = Block::new(1, vec![tx("a")]);
        let b = Block::new(2, vec![tx("a")]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn block_id_matches_sha256_of_concatenation() {
        let expected = hex::encode(Sha256::digest(b"7abc"));
        assert_eq!(block_id(7, ["c", "ab"]), expected);
    }

    #[test]
    fn block_id_is_lowercase_hex() {
        let id = block_id(1, []);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn expected_id_roundtrip() {
        let block = Block::new(3, vec![tx("x"), tx("y")]);
        assert_eq!(block.expected_id(), block.id);
    }

    #[test]
    fn output_sum_detects_overflow() {
        let mut t = tx("t");
        t.outputs = vec![
            Output { address: "a".into(), value: u64::MAX },
            Output { address: "b".into(), value: 1 },
        ];
        assert_eq!(t.output_sum(), None);
    }

    #[test]
    fn output_ref_wire_format_is_camel_case() {
        let json = serde_json::to_value(OutputRef::new("t1", 2)).unwrap();
        assert_eq!(json, serde_json::json!({"txId": "t1", "index": 2}));
    }

    #[test]
    fn stored_output_wire_format() {
        let out = StoredOutput::unspent(&Output { address: "a".into(), value: 9 }, 4);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["producedAtHeight"], 4);
        assert_eq!(json["spendingTxId"], serde_json::Value::Null);
        assert_eq!(json["spent"], false);
    }

    #[test]
    fn bincode_roundtrip_block() {
        let block = Block::new(1, vec![Transaction {
            id: "g".into(),
            inputs: vec![OutputRef::new("p", 0)],
            outputs: vec![Output { address: "a".into(), value: 1 }],
        }]);
        let bytes = bincode::encode_to_vec(&block, bincode::config::standard()).unwrap();
        let (decoded, _): (Block, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, block);
    }
}
