//! In-flight fraction vectors for outputs that are not yet in a block.
//!
//! The withdraw planner consults this map as a read-through overlay on the
//! [`PegStore`](crate::PegStore): a draft withdrawal can spend the change of
//! an earlier draft before either is mined.

use std::collections::HashMap;
use std::sync::Mutex;

use bitpeg_chain::transparent::OutPoint;
use bitpeg_chain::Fractions;

#[derive(Default)]
pub struct MempoolFractions {
    inner: Mutex<HashMap<OutPoint, Fractions>>,
}

impl MempoolFractions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, outpoint: OutPoint, fractions: Fractions) {
        self.inner
            .lock()
            .expect("mempool fraction lock poisoned")
            .insert(outpoint, fractions);
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<Fractions> {
        self.inner
            .lock()
            .expect("mempool fraction lock poisoned")
            .get(outpoint)
            .cloned()
    }

    /// Drop entries confirmed by a mined block.
    pub fn remove(&self, outpoint: &OutPoint) -> Option<Fractions> {
        self.inner
            .lock()
            .expect("mempool fraction lock poisoned")
            .remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("mempool fraction lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
