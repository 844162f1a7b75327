//! Structural gate for untrusted input.
//!
//! [`validate_block`] checks the shape of a JSON value and converts it into a
//! typed [`Block`]. It never touches a store and stops at the first
//! violation. [`validate_address`], [`parse_height`] and [`parse_index`] do
//! the same for path parameters.
//!
//! JSON does not distinguish `1` from `1.0`, so integral floats are accepted
//! wherever an integer is expected.

use serde_json::{Map, Value};

use crate::error::{ArgumentError, SchemaError};
use crate::types::{Block, Output, OutputRef, Transaction};

/// Validate the shape of an untrusted block and convert it.
pub fn validate_block(value: &Value) -> Result<Block, SchemaError> {
    let obj = value
        .as_object()
        .ok_or_else(|| reject("Block must be an object"))?;

    let id = non_empty_str(obj, "id").ok_or_else(|| reject("Block id must be a non-empty string"))?;

    let height = obj
        .get("height")
        .and_then(whole_number)
        .filter(|h| *h >= 1)
        .ok_or_else(|| reject("Block height must be a positive integer"))?;

    let raw_txs = obj
        .get("transactions")
        .and_then(Value::as_array)
        .ok_or_else(|| reject("Block transactions must be an array"))?;

    let transactions = raw_txs
        .iter()
        .enumerate()
        .map(|(i, tx)| transaction(i, tx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Block {
        id: id.to_string(),
        height,
        transactions,
    })
}

/// Reject empty addresses.
pub fn validate_address(raw: &str) -> Result<&str, ArgumentError> {
    if raw.is_empty() {
        return Err(ArgumentError::EmptyAddress);
    }
    Ok(raw)
}

/// Parse a base-10, non-negative height.
///
/// Signs, whitespace and fractions are rejected, so "+3", " 3" and "3.0"
/// are all invalid.
pub fn parse_height(raw: &str) -> Result<u64, ArgumentError> {
    decimal(raw).ok_or_else(|| ArgumentError::InvalidHeight(raw.to_string()))
}

/// Parse an output index with the same rules as [`parse_height`].
pub fn parse_index(raw: &str) -> Result<u64, ArgumentError> {
    decimal(raw).ok_or_else(|| ArgumentError::InvalidIndex(raw.to_string()))
}

fn decimal(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// A non-negative integer, written either as `3` or `3.0`.
fn whole_number(value: &Value) -> Option<u64> {
    // 2^64; anything at or above it does not fit.
    const LIMIT: f64 = 18_446_744_073_709_551_616.0;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < LIMIT)
            .map(|f| f as u64)
    })
}

fn transaction(i: usize, value: &Value) -> Result<Transaction, SchemaError> {
    let obj = value
        .as_object()
        .ok_or_else(|| reject(format!("Transaction {i} must be an object")))?;

    let id = non_empty_str(obj, "id")
        .ok_or_else(|| reject(format!("Transaction {i}: id must be a non-empty string")))?;

    let raw_inputs = obj
        .get("inputs")
        .and_then(Value::as_array)
        .ok_or_else(|| reject(format!("Transaction {i}: inputs must be an array")))?;

    let raw_outputs = obj
        .get("outputs")
        .and_then(Value::as_array)
        .ok_or_else(|| reject(format!("Transaction {i}: outputs must be an array")))?;

    let mut inputs = Vec::with_capacity(raw_inputs.len());
    for (j, input) in raw_inputs.iter().enumerate() {
        let input = input
            .as_object()
            .ok_or_else(|| reject(format!("Transaction {i}: Input {j} must be an object")))?;
        let tx_id = non_empty_str(input, "txId").ok_or_else(|| {
            reject(format!("Transaction {i}: Input {j} txId must be a non-empty string"))
        })?;
        let index = input.get("index").and_then(whole_number).ok_or_else(|| {
            reject(format!("Transaction {i}: Input {j} index must be a non-negative integer"))
        })?;
        inputs.push(OutputRef::new(tx_id, index));
    }

    let mut outputs = Vec::with_capacity(raw_outputs.len());
    for (k, output) in raw_outputs.iter().enumerate() {
        let output = output
            .as_object()
            .ok_or_else(|| reject(format!("Transaction {i}: Output {k} must be an object")))?;
        let address = non_empty_str(output, "address").ok_or_else(|| {
            reject(format!("Transaction {i}: Output {k} address must be a non-empty string"))
        })?;
        let value = output.get("value").and_then(whole_number).ok_or_else(|| {
            reject(format!("Transaction {i}: Output {k} value must be a non-negative number"))
        })?;
        outputs.push(Output {
            address: address.to_string(),
            value,
        });
    }

    Ok(Transaction {
        id: id.to_string(),
        inputs,
        outputs,
    })
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn reject(reason: impl Into<String>) -> SchemaError {
    SchemaError(reason.into())
}
