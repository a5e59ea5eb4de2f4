//! The fraction store built upon sled.
//!
//! Fraction vectors for unspent outputs live in the `pegfractions` tree,
//! keyed by the 320-bit outpoint key, in their packed wire form. They are
//! written when the owning output is created, never mutated, and erased only
//! on rollback or through the explicit pruning hook. All writes from a
//! single block validation are grouped into one [`PegBatch`] that commits
//! atomically.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::transparent::FractionKey;
use bitpeg_chain::{Fractions, Network, PegDeserialize, PegSerialize};

use crate::{Config, StorageError};

const PEG_READY_KEY: &[u8] = b"blockindex_peg_ready";

/// How many migrated block indexes go into one commit.
const MIGRATE_COMMIT_EVERY: usize = 10_000;

/// The persistent peg state.
pub struct PegStore {
    fractions: sled::Tree,
    block_index: sled::Tree,
    meta: sled::Tree,
    db: sled::Db,
}

/// A group of fraction writes that commits atomically with one block.
#[derive(Default)]
pub struct PegBatch {
    inner: sled::Batch,
}

impl PegBatch {
    pub fn write(&mut self, key: &FractionKey, fractions: &Fractions) {
        let packed = fractions
            .peg_serialize_to_vec()
            .expect("fractions always pack into a Vec");
        self.inner.insert(key.as_bytes(), packed);
    }

    pub fn erase(&mut self, key: &FractionKey) {
        self.inner.remove(key.as_bytes());
    }
}

impl PegStore {
    pub fn new(config: &Config, network: Network) -> Result<Self, StorageError> {
        let db = config.sled_config(network).open()?;
        Ok(PegStore {
            fractions: db.open_tree(b"pegfractions")?,
            block_index: db.open_tree(b"blockindex")?,
            meta: db.open_tree(b"meta")?,
            db,
        })
    }

    /// Read the packed fractions stored for `key`, if any.
    pub fn read(&self, key: &FractionKey) -> Result<Option<Fractions>, StorageError> {
        match self.fractions.get(key.as_bytes())? {
            Some(bytes) => {
                let fractions = Fractions::peg_deserialize(&bytes[..])?;
                Ok(Some(fractions))
            }
            None => Ok(None),
        }
    }

    /// Write a single fraction record outside any block batch. The withdraw
    /// planner uses this to persist change fractions between drafts.
    pub fn write(&self, key: &FractionKey, fractions: &Fractions) -> Result<(), StorageError> {
        let packed = fractions
            .peg_serialize_to_vec()
            .expect("fractions always pack into a Vec");
        self.fractions.insert(key.as_bytes(), packed)?;
        Ok(())
    }

    pub fn erase(&self, key: &FractionKey) -> Result<bool, StorageError> {
        Ok(self.fractions.remove(key.as_bytes())?.is_some())
    }

    /// Atomically commit one block's fraction writes.
    ///
    /// The commit is retried once on a transient database error before the
    /// failure is surfaced.
    pub fn commit(&self, batch: PegBatch) -> Result<(), StorageError> {
        let PegBatch { inner } = batch;
        match self.fractions.apply_batch(inner.clone()) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(%first, "fraction batch commit failed, retrying once");
                self.fractions.apply_batch(inner)?;
                Ok(())
            }
        }
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Whether the stored block indexes have been upgraded for peg tracking.
    pub fn is_peg_ready(&self) -> Result<bool, StorageError> {
        Ok(self
            .meta
            .get(PEG_READY_KEY)?
            .map_or(false, |v| v.as_ref() == &[1u8][..]))
    }

    /// Mark every stored block index at or above `peg_start_height` as
    /// peg-ready, then set the peg-ready flag.
    ///
    /// Long-running: commits every 10 000 indexes and checks the cooperative
    /// `interrupt` flag between commits. `progress` receives a message per
    /// commit for the loading UI.
    pub fn mark_indexes_peg_ready(
        &self,
        peg_start_height: u32,
        interrupt: &AtomicBool,
        mut progress: impl FnMut(&str),
    ) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        let mut count = 0usize;

        for entry in self.block_index.iter() {
            let (key, value) = entry?;
            if key.len() != 4 {
                continue;
            }
            let mut height_bytes = [0u8; 4];
            height_bytes.copy_from_slice(&key);
            let height = u32::from_be_bytes(height_bytes);

            let mut record = value.to_vec();
            let ready = height >= peg_start_height;
            if record.is_empty() {
                record.push(ready as u8);
            } else {
                record[0] = ready as u8;
            }
            batch.insert(key.to_vec(), record);

            count += 1;
            if count % MIGRATE_COMMIT_EVERY == 0 {
                if interrupt.load(Ordering::Relaxed) {
                    return Err(StorageError::Interrupted);
                }
                progress(&format!(" update indexes for peg: {}", count));
                self.block_index
                    .apply_batch(std::mem::take(&mut batch))?;
            }
        }

        self.block_index.apply_batch(batch)?;
        self.meta.insert(PEG_READY_KEY, &[1u8][..])?;
        debug!(count, "block indexes marked peg-ready");
        Ok(())
    }

    /// Record a block-index row; the node's index layer owns the record
    /// layout beyond the leading peg-ready byte.
    pub fn write_block_index(&self, height: u32, record: &[u8]) -> Result<(), StorageError> {
        self.block_index
            .insert(height.to_be_bytes().to_vec(), record)?;
        Ok(())
    }

    /// Deliberate pruning hook: erase the fraction records a fully matured
    /// block made unreachable (its spent inputs, and its vote outputs which
    /// are never spent). Never invoked implicitly.
    pub fn prune_spent_fractions(
        &self,
        transactions: &[Transaction],
        vote_addresses: &[&str],
        network: Network,
    ) -> Result<usize, StorageError> {
        let mut erased = 0usize;
        for tx in transactions {
            for input in &tx.inputs {
                if let Some(outpoint) = input.outpoint() {
                    if self.erase(&outpoint.fraction_key())? {
                        erased += 1;
                    }
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let key = output.lock_script.pool_key(network);
                if vote_addresses.iter().any(|addr| **addr == key) {
                    let outpoint = bitpeg_chain::transparent::OutPoint {
                        hash: tx.hash(),
                        index: index as u32,
                    };
                    if self.erase(&outpoint.fraction_key())? {
                        erased += 1;
                    }
                }
            }
        }
        trace!(erased, "pruned fraction records");
        Ok(erased)
    }
}
