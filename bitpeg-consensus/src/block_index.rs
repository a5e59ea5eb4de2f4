//! The block-index arena and the supply-index advance.
//!
//! Chain links are arena indexes into a vector, never owning references, so
//! the graph is cycle-free by construction and the "walk back two or three
//! intervals" queries are index arithmetic plus a bounds check.

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::PEG_MAX_SUPPLY_INDEX;

use crate::error::PegError;
use crate::votes::{block_vote, PegVoteKind};
use crate::{FractionSource, PegContext};

/// Per-block peg state tracked by the index.
#[derive(Clone, Debug)]
pub struct BlockIndex {
    pub height: u32,
    /// Arena position of the parent block, `None` for genesis.
    pub prev: Option<usize>,
    pub peg_supply_index: usize,
    pub is_proof_of_stake: bool,
    pub votes_inflate: i64,
    pub votes_deflate: i64,
    pub votes_nochange: i64,
}

impl BlockIndex {
    pub fn new(height: u32, prev: Option<usize>, is_proof_of_stake: bool) -> Self {
        BlockIndex {
            height,
            prev,
            peg_supply_index: 0,
            is_proof_of_stake,
            votes_inflate: 0,
            votes_deflate: 0,
            votes_nochange: 0,
        }
    }

    fn votes(&self) -> (i64, i64, i64) {
        (self.votes_inflate, self.votes_deflate, self.votes_nochange)
    }
}

/// All block indexes, stored flat; the canonical chain threads through
/// `prev` links.
#[derive(Default)]
pub struct BlockIndexArena {
    entries: Vec<BlockIndex>,
}

/// One interval's cumulative votes and the previous interval's, from which
/// the next supply index follows.
///
/// Deflate or inflate must dominate both other counters to move the index at
/// all; beating the previous interval's counters two- and three-fold adds
/// the second and third step.
pub fn compute_next_peg_supply_index(
    base: usize,
    use_votes: (i64, i64, i64),
    prev_votes: (i64, i64, i64),
) -> usize {
    let (inflate, deflate, nochange) = use_votes;
    let (inflate_prev, deflate_prev, nochange_prev) = prev_votes;

    let mut next = base as i64;

    if deflate > inflate && deflate > nochange {
        next += 1;
        if deflate > 2 * inflate_prev && deflate > 2 * nochange_prev {
            next += 1;
        }
        if deflate > 3 * inflate_prev && deflate > 3 * nochange_prev {
            next += 1;
        }
    }
    if inflate > deflate && inflate > nochange {
        next -= 1;
        if inflate > 2 * deflate_prev && inflate > 2 * nochange_prev {
            next -= 1;
        }
        if inflate > 3 * deflate_prev && inflate > 3 * nochange_prev {
            next -= 1;
        }
    }

    next.max(0).min(PEG_MAX_SUPPLY_INDEX as i64) as usize
}

impl BlockIndexArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an index, returning its arena position.
    pub fn push(&mut self, index: BlockIndex) -> usize {
        self.entries.push(index);
        self.entries.len() - 1
    }

    pub fn get(&self, at: usize) -> Option<&BlockIndex> {
        self.entries.get(at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk `prev` links from `at` until the height is at or below `limit`.
    fn back_to_height(&self, at: usize, limit: i64) -> &BlockIndex {
        let mut current = &self.entries[at];
        while current.height as i64 > limit {
            match current.prev {
                Some(prev) => current = &self.entries[prev],
                None => break,
            }
        }
        current
    }

    /// Set a freshly attached block's supply index from its parent.
    pub fn calculate_block_peg_index(&mut self, at: usize, ctx: &PegContext) {
        let supply = match self.entries[at].prev {
            None => 0,
            Some(prev) => self.next_block_peg_supply_index(prev, ctx),
        };
        self.entries[at].peg_supply_index = supply;
    }

    /// The supply index the block after `at` will carry.
    ///
    /// Unchanged between boundaries; at an interval boundary the two most
    /// recent completed intervals' votes decide the move.
    pub fn next_block_peg_supply_index(&self, at: usize, ctx: &PegContext) -> usize {
        let block = &self.entries[at];
        let next_height = block.height as i64 + 1;
        let interval = ctx.params.peg_interval(next_height as u32) as i64;

        if next_height < ctx.params.peg_start_height as i64 {
            return 0;
        }
        if next_height % interval != 0 {
            return block.peg_supply_index;
        }

        // Votes sum at interval end, so go one block before the boundary:
        // back two intervals for the deciding votes, three for the
        // comparison interval.
        let use_votes = self.back_to_height(at, next_height - interval * 2 - 1);
        let prev_votes = self.back_to_height(at, next_height - interval * 3 - 1);

        compute_next_peg_supply_index(
            block.peg_supply_index,
            use_votes.votes(),
            prev_votes.votes(),
        )
    }

    /// The supply index in force after the current interval completes.
    pub fn next_interval_peg_supply_index(&self, at: usize, ctx: &PegContext) -> usize {
        let block = &self.entries[at];
        if (block.height as i64) < ctx.params.peg_start_height as i64 {
            return 0;
        }

        let interval = ctx.params.peg_interval(block.height) as i64;
        let interval_start = (block.height as i64 / interval) * interval;

        let use_votes = self.back_to_height(at, interval_start - interval - 1);
        let prev_votes = self.back_to_height(at, interval_start - interval * 2 - 1);

        compute_next_peg_supply_index(
            block.peg_supply_index,
            use_votes.votes(),
            prev_votes.votes(),
        )
    }

    /// The supply index in force after the next interval completes.
    pub fn next_next_interval_peg_supply_index(&self, at: usize, ctx: &PegContext) -> usize {
        let block = &self.entries[at];
        if (block.height as i64) < ctx.params.peg_start_height as i64 {
            return 0;
        }

        let interval = ctx.params.peg_interval(block.height) as i64;
        let interval_start = (block.height as i64 / interval) * interval;

        let use_votes = self.back_to_height(at, interval_start - 1);
        let prev_votes = self.back_to_height(at, interval_start - interval - 1);

        compute_next_peg_supply_index(
            self.next_interval_peg_supply_index(at, ctx),
            use_votes.votes(),
            prev_votes.votes(),
        )
    }

    /// Accumulate a block's vote into its index.
    ///
    /// Counters reset at each interval boundary and otherwise carry over
    /// from the parent; proof-of-work blocks and pre-activation heights
    /// carry none.
    pub fn calculate_block_peg_votes(
        &mut self,
        at: usize,
        stake_tx: Option<&Transaction>,
        fractions_source: &dyn FractionSource,
        ctx: &PegContext,
    ) -> Result<(), PegError> {
        let block = &self.entries[at];
        let height = block.height;
        let interval = ctx.params.peg_interval(height);

        if !block.is_proof_of_stake || (height as i64) < ctx.params.peg_start_height as i64 {
            let block = &mut self.entries[at];
            block.votes_inflate = 0;
            block.votes_deflate = 0;
            block.votes_nochange = 0;
            return Ok(());
        }

        let inherited = if height % interval == 0 {
            (0, 0, 0)
        } else {
            match block.prev {
                Some(prev) => self.entries[prev].votes(),
                None => (0, 0, 0),
            }
        };

        let supply = block.peg_supply_index;
        let vote = match stake_tx {
            Some(stake_tx) => block_vote(stake_tx, supply, fractions_source, ctx)?,
            None => None,
        };

        let block = &mut self.entries[at];
        let (inflate, deflate, nochange) = inherited;
        block.votes_inflate = inflate;
        block.votes_deflate = deflate;
        block.votes_nochange = nochange;

        match vote {
            Some((PegVoteKind::Inflate, weight)) => block.votes_inflate += weight,
            Some((PegVoteKind::Deflate, weight)) => block.votes_deflate += weight,
            Some((PegVoteKind::Nochange, weight)) => block.votes_nochange += weight,
            None => {}
        }

        Ok(())
    }
}

/// The shared chain state: one reader/writer lock over the index arena.
/// Validators take it exclusively for attach/advance; RPC readers share it.
/// No peg computation holds it longer than one transaction's validation.
#[derive(Default)]
pub struct ChainState {
    arena: std::sync::RwLock<BlockIndexArena>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, BlockIndexArena> {
        self.arena.read().expect("chain lock poisoned")
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, BlockIndexArena> {
        self.arena.write().expect("chain lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitpeg_chain::PegParams;

    fn test_ctx() -> PegContext {
        let mut params = PegParams::mainnet();
        params.peg_start_height = 0;
        PegContext::new(params)
    }

    #[test]
    fn deflate_dominant_advances_three_steps() {
        let next = compute_next_peg_supply_index(500, (0, 10, 2), (1, 0, 1));
        assert_eq!(next, 503);
    }

    #[test]
    fn inflate_dominant_retreats() {
        let next = compute_next_peg_supply_index(500, (10, 0, 2), (0, 1, 1));
        assert_eq!(next, 497);
    }

    #[test]
    fn equal_counters_hold_the_index() {
        let next = compute_next_peg_supply_index(500, (5, 5, 5), (1, 1, 1));
        assert_eq!(next, 500);
    }

    #[test]
    fn advance_clamps_to_bounds() {
        assert_eq!(compute_next_peg_supply_index(0, (10, 0, 0), (0, 0, 0)), 0);
        assert_eq!(
            compute_next_peg_supply_index(PEG_MAX_SUPPLY_INDEX, (0, 10, 0), (0, 0, 0)),
            PEG_MAX_SUPPLY_INDEX
        );
    }

    #[test]
    fn supply_holds_between_boundaries() {
        let ctx = test_ctx();
        let mut arena = BlockIndexArena::new();

        let mut prev = None;
        for height in 0..5u32 {
            let at = arena.push(BlockIndex::new(height, prev, true));
            arena.calculate_block_peg_index(at, &ctx);
            prev = Some(at);
        }

        for at in 0..arena.len() {
            assert_eq!(arena.get(at).expect("pushed").peg_supply_index, 0);
        }
    }

    #[test]
    fn boundary_applies_interval_votes() {
        let ctx = test_ctx();
        let interval = ctx.params.peg_interval(0);
        let mut arena = BlockIndexArena::new();

        // Build four intervals of chain. Interval 1 votes deflate heavily;
        // the one before is quiet. Interval totals sum at each interval's
        // last block, and a boundary at height h reads the totals of the
        // interval that ended at h - 2*interval - 1.
        let mut prev: Option<usize> = None;
        for height in 0..(interval * 4) {
            let at = arena.push(BlockIndex::new(height, prev, true));
            arena.calculate_block_peg_index(at, &ctx);

            // Accumulate votes by hand: interval 1 deflates.
            let inherited = if height % interval == 0 {
                (0, 0, 0)
            } else {
                prev.map(|p| arena.get(p).expect("prev").votes())
                    .unwrap_or((0, 0, 0))
            };
            {
                let in_deflating_interval =
                    height >= interval && height < interval * 2;
                let entry = &mut arena.entries[at];
                entry.votes_inflate = inherited.0;
                entry.votes_deflate =
                    inherited.1 + if in_deflating_interval { 1 } else { 0 };
                entry.votes_nochange = inherited.2;
            }
            prev = Some(at);
        }

        let tip = arena.len() - 1;
        // The tip is the last block of interval 3; the boundary after it
        // reads interval 1's deflate total against interval 0's quiet.
        let next = arena.next_block_peg_supply_index(tip, &ctx);
        assert_eq!(next, 3);
    }
}
