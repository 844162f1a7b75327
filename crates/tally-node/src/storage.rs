//! RocksDB-backed persistent ledger storage.
//!
//! Implements [`LedgerStore`] using RocksDB column families for blocks,
//! the transaction index, outputs, the address index, and metadata. Every
//! mutation is one atomic [`WriteBatch`]; multi-key reads go through a
//! snapshot so they never observe half of a batch.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use tally_core::error::{ChainStateError, LedgerError};
use tally_core::store::{ApplyBlockResult, LedgerStore, RollbackResult};
use tally_core::types::{Block, OutputRef, StoredOutput};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_OUTPUTS: &str = "outputs";
const CF_ADDRESS_INDEX: &str = "address_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_TRANSACTIONS,
    CF_OUTPUTS,
    CF_ADDRESS_INDEX,
    CF_METADATA,
];

// --- Metadata keys ---

const META_TIP_HEIGHT: &[u8] = b"tip_height";

fn storage_err(e: impl Display) -> LedgerError {
    LedgerError::Persistence(e.to_string())
}

/// RocksDB-backed persistent ledger storage.
///
/// Layout:
/// - `blocks`: height (BE) → bincode [`Block`]
/// - `transactions`: tx id → height (LE)
/// - `outputs`: bincode [`OutputRef`] → bincode [`StoredOutput`]
/// - `address_index`: len(address) (BE u32) || address || bincode [`OutputRef`] → empty,
///   for unspent outputs only
/// - `metadata`: tip height
///
/// Writers are serialized by an internal lock; readers never take it.
pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush().map_err(storage_err)
    }

    /// Whether no blocks have been applied.
    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.current_height()? == 0)
    }

    // --- Internal helpers ---

    /// Get a u64 from the metadata column family.
    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, LedgerError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(&cf, key).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ChainStateError::CorruptRecord("invalid metadata value length".into()))?;
                Ok(u64::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, LedgerError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Persistence(format!("missing column family: {name}")))
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, LedgerError> {
        bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
    }

    fn decode_output(bytes: &[u8]) -> Result<StoredOutput, LedgerError> {
        let (output, _): (StoredOutput, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ChainStateError::CorruptRecord(format!("output: {e}")))?;
        Ok(output)
    }

    fn decode_output_ref(bytes: &[u8]) -> Result<OutputRef, LedgerError> {
        let (output_ref, _): (OutputRef, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ChainStateError::CorruptRecord(format!("output ref: {e}")))?;
        Ok(output_ref)
    }

    fn decode_block(bytes: &[u8]) -> Result<Block, LedgerError> {
        let (block, _): (Block, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ChainStateError::CorruptRecord(format!("block: {e}")))?;
        Ok(block)
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    /// Length-prefixed address, so no address is a prefix of another.
    fn address_prefix(address: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(4 + address.len());
        prefix.extend_from_slice(&(address.len() as u32).to_be_bytes());
        prefix.extend_from_slice(address.as_bytes());
        prefix
    }

    /// Encode an address index key: address prefix || encoded output ref.
    fn address_index_key(address: &str, output_key: &[u8]) -> Vec<u8> {
        let mut key = Self::address_prefix(address);
        key.extend_from_slice(output_key);
        key
    }
}

impl LedgerStore for RocksStore {
    fn apply_block(&self, block: &Block) -> Result<ApplyBlockResult, LedgerError> {
        let _guard = self.write_lock.lock();

        // Validate height consistency.
        let tip = self.current_height()?;
        if block.height != tip + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: tip + 1,
                got: block.height,
            }
            .into());
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_outputs = self.cf_handle(CF_OUTPUTS)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        // Build an atomic WriteBatch. Any error before `write` discards it.
        let mut batch = WriteBatch::default();
        let mut new_ids = HashSet::with_capacity(block.transactions.len());
        let mut spends = HashSet::new();
        let mut outputs_created = 0;
        let mut outputs_spent = 0;

        for tx in &block.transactions {
            if !new_ids.insert(tx.id.as_str()) || self.contains_transaction(&tx.id)? {
                return Err(ChainStateError::DuplicateTransaction(tx.id.clone()).into());
            }

            // Mark spent inputs.
            for input in &tx.inputs {
                let mut stored = self
                    .get_output(input)?
                    .ok_or_else(|| ChainStateError::MissingOutput(input.to_string()))?;
                if stored.spent || !spends.insert(input) {
                    return Err(ChainStateError::OutputAlreadySpent(input.to_string()).into());
                }
                stored.spent = true;
                stored.spending_tx_id = Some(tx.id.clone());
                let input_key = Self::encode(input)?;
                batch.put_cf(cf_outputs, &input_key, Self::encode(&stored)?);
                batch.delete_cf(cf_addr_index, Self::address_index_key(&stored.address, &input_key));
                outputs_spent += 1;
            }

            // Create outputs and their address index entries.
            for (index, output) in tx.outputs.iter().enumerate() {
                let key = Self::encode(&tx.output_ref(index as u64))?;
                let stored = StoredOutput::unspent(output, block.height);
                batch.put_cf(cf_outputs, &key, Self::encode(&stored)?);
                batch.put_cf(cf_addr_index, Self::address_index_key(&output.address, &key), []);
                outputs_created += 1;
            }

            batch.put_cf(cf_txs, tx.id.as_bytes(), block.height.to_le_bytes());
        }

        batch.put_cf(cf_blocks, Self::height_key(block.height), Self::encode(block)?);
        batch.put_cf(cf_meta, META_TIP_HEIGHT, block.height.to_le_bytes());

        // Write atomically.
        self.db.write(batch).map_err(storage_err)?;

        tracing::debug!(
            height = block.height,
            outputs_created,
            outputs_spent,
            "stored block"
        );

        Ok(ApplyBlockResult {
            height: block.height,
            outputs_created,
            outputs_spent,
        })
    }

    fn rollback(&self, target: u64) -> Result<RollbackResult, LedgerError> {
        let _guard = self.write_lock.lock();

        let tip = self.current_height()?;
        if target >= tip {
            return Ok(RollbackResult {
                height: tip,
                ..RollbackResult::default()
            });
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_outputs = self.cf_handle(CF_OUTPUTS)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        let mut result = RollbackResult {
            height: target,
            ..RollbackResult::default()
        };

        // Newest first, so every spend is undone before its output's creator.
        for height in ((target + 1)..=tip).rev() {
            let block = self
                .get_block(height)?
                .ok_or(ChainStateError::BlockNotFound(height))?;

            for tx in block.transactions.iter().rev() {
                // Remove outputs created by this transaction.
                for (index, output) in tx.outputs.iter().enumerate() {
                    let key = Self::encode(&tx.output_ref(index as u64))?;
                    batch.delete_cf(cf_addr_index, Self::address_index_key(&output.address, &key));
                    batch.delete_cf(cf_outputs, &key);
                    result.outputs_removed += 1;
                }

                // Unspend surviving outputs this transaction consumed.
                for input in &tx.inputs {
                    let mut stored = self.get_output(input)?.ok_or_else(|| {
                        ChainStateError::CorruptRecord(format!(
                            "output {input} spent by {} is missing",
                            tx.id
                        ))
                    })?;
                    if stored.produced_at_height > target {
                        // Deleted when its creating block is reached.
                        continue;
                    }
                    if stored.spending_tx_id.as_deref() != Some(tx.id.as_str()) {
                        return Err(ChainStateError::CorruptRecord(format!(
                            "output {input} not spent by {}",
                            tx.id
                        ))
                        .into());
                    }
                    stored.spent = false;
                    stored.spending_tx_id = None;
                    let input_key = Self::encode(input)?;
                    batch.put_cf(cf_outputs, &input_key, Self::encode(&stored)?);
                    batch.put_cf(cf_addr_index, Self::address_index_key(&stored.address, &input_key), []);
                    result.outputs_restored += 1;
                }

                batch.delete_cf(cf_txs, tx.id.as_bytes());
            }

            batch.delete_cf(cf_blocks, Self::height_key(height));
            result.blocks_removed += 1;
        }

        batch.put_cf(cf_meta, META_TIP_HEIGHT, target.to_le_bytes());

        // Write atomically.
        self.db.write(batch).map_err(storage_err)?;

        tracing::debug!(
            from = tip,
            to = target,
            outputs_removed = result.outputs_removed,
            outputs_restored = result.outputs_restored,
            "rolled back blocks"
        );

        Ok(result)
    }

    fn current_height(&self) -> Result<u64, LedgerError> {
        self.get_meta_u64(META_TIP_HEIGHT)
    }

    fn get_output(&self, output: &OutputRef) -> Result<Option<StoredOutput>, LedgerError> {
        let cf = self.cf_handle(CF_OUTPUTS)?;
        let key = Self::encode(output)?;
        match self.db.get_cf(&cf, &key).map_err(storage_err)? {
            Some(data) => Ok(Some(Self::decode_output(&data)?)),
            None => Ok(None),
        }
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(storage_err)?
        {
            Some(data) => Ok(Some(Self::decode_block(&data)?)),
            None => Ok(None),
        }
    }

    fn contains_transaction(&self, tx_id: &str) -> Result<bool, LedgerError> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db
            .get_cf(&cf, tx_id.as_bytes())
            .map(|v| v.is_some())
            .map_err(storage_err)
    }

    fn unspent_outputs(&self, address: &str) -> Result<Vec<(OutputRef, StoredOutput)>, LedgerError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_outputs = self.cf_handle(CF_OUTPUTS)?;
        let prefix = Self::address_prefix(address);

        // One snapshot for the index scan and every output lookup.
        let snapshot = self.db.snapshot();
        let iter = snapshot.iterator_cf(&cf_addr, IteratorMode::From(&prefix, Direction::Forward));

        let mut result = Vec::new();
        for item in iter {
            let (key_bytes, _) = item.map_err(storage_err)?;
            if !key_bytes.starts_with(&prefix) {
                break;
            }

            let output_key = &key_bytes[prefix.len()..];
            let data = snapshot
                .get_cf(&cf_outputs, output_key)
                .map_err(storage_err)?
                .ok_or_else(|| {
                    ChainStateError::CorruptRecord(format!("address index entry without output for {address}"))
                })?;
            let stored = Self::decode_output(&data)?;
            if stored.spent {
                return Err(ChainStateError::CorruptRecord(format!(
                    "address index lists spent output for {address}"
                ))
                .into());
            }
            result.push((Self::decode_output_ref(output_key)?, stored));
        }

        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }
}
