//! Persistence for the peg system: the fraction store keyed by outpoint, the
//! in-flight mempool overlay, and the one-shot block-index migration that
//! marks stored indexes peg-ready.

mod config;
mod mempool;
mod peg_store;

pub use config::Config;
pub use mempool::MempoolFractions;
pub use peg_store::{PegBatch, PegStore};

use thiserror::Error;

/// A storage-layer failure. Batch commits are retried once before one of
/// these surfaces.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("stored fractions are corrupt: {0}")]
    Corrupt(#[from] bitpeg_chain::SerializationError),
    #[error("interrupted")]
    Interrupted,
}
