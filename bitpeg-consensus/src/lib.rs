//! The peg consensus engine: per-transaction fraction propagation, per-block
//! vote tallies, and the supply-index advance at interval boundaries.
//!
//! All computations here are pure CPU-bound state transformations; the
//! caller owns locking and persistence.

pub mod block_index;
pub mod engine;
pub mod error;
pub mod votes;

pub use block_index::{BlockIndex, BlockIndexArena, ChainState};
pub use engine::{
    calculate_staking_fractions, calculate_standard_fractions, StakeInputs, TxFractions,
};
pub use error::PegError;
pub use votes::{calculate_peg_votes, PegVoteKind};

use std::collections::{BTreeSet, HashMap};

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::transparent::{OutPoint, Output};
use bitpeg_chain::{Fractions, PegParams};

/// Anything that can resolve the fraction vector of an unspent output.
pub trait FractionSource {
    fn fractions(&self, outpoint: &OutPoint) -> Option<Fractions>;
}

impl FractionSource for bitpeg_state::PegStore {
    fn fractions(&self, outpoint: &OutPoint) -> Option<Fractions> {
        self.read(&outpoint.fraction_key()).ok().flatten()
    }
}

impl FractionSource for bitpeg_state::MempoolFractions {
    fn fractions(&self, outpoint: &OutPoint) -> Option<Fractions> {
        self.lookup(outpoint)
    }
}

impl FractionSource for HashMap<OutPoint, Fractions> {
    fn fractions(&self, outpoint: &OutPoint) -> Option<Fractions> {
        self.get(outpoint).cloned()
    }
}

/// Explicit handle for everything the peg computations read from the
/// environment. Tests construct their own instead of touching process-wide
/// state.
#[derive(Clone, Debug)]
pub struct PegContext {
    pub params: PegParams,

    /// Demo-mode whitelist. When set, transactions spending only
    /// non-whitelisted addresses are skipped by the engine rather than
    /// tracked.
    pub whitelist: Option<BTreeSet<String>>,
}

impl PegContext {
    pub fn new(params: PegParams) -> Self {
        PegContext {
            params,
            whitelist: None,
        }
    }

    /// In demo mode, at least one spent output must belong to a whitelisted
    /// address; a coinbase spends none, so it is never whitelisted there.
    pub fn is_whitelisted(
        &self,
        tx: &Transaction,
        prev_outs: &HashMap<OutPoint, Output>,
    ) -> bool {
        let whitelist = match &self.whitelist {
            None => return true,
            Some(whitelist) => whitelist,
        };

        if tx.is_coinbase() {
            return false;
        }
        for input in &tx.inputs {
            let outpoint = match input.outpoint() {
                Some(outpoint) => outpoint,
                None => continue,
            };
            let prev = match prev_outs.get(&outpoint) {
                Some(prev) => prev,
                None => continue,
            };
            if whitelist.contains(&prev.lock_script.pool_key(self.params.network)) {
                return true;
            }
        }
        false
    }
}
