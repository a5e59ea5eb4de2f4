//! The peg computation error union.
//!
//! Every failure of the per-transaction engine carries the position of the
//! offending input or output. A failing transaction keeps none of its
//! speculative output fractions; the block validator rejects the block.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PegError {
    /// PI02
    #[error("PI02: referred output of input {input} is out of range or not found")]
    InputNotFound { input: usize },

    /// PI03
    #[error("PI03: no input fractions found for input {input}")]
    InputFractionsMissing { input: usize },

    /// PI04
    #[error("PI04: input {input} fraction total mismatches its value")]
    InputTotalMismatch { input: usize },

    /// PI05
    #[error("PI05: frozen input {input} used before time expired")]
    FrozenInputSpent { input: usize },

    /// PI06
    #[error("PI06: voluntary frozen input {input} used before time expired")]
    VFrozenInputSpent { input: usize },

    /// PI07
    #[error("PI07: freeze notary of input {input}: target is not an output index")]
    NotaryBadTarget { input: usize },

    /// PI08
    #[error("PI08: freeze notary of input {input} refers to its own position")]
    NotarySelfReference { input: usize },

    /// PI10
    #[error("PI10: freeze notary of input {input}: not enough input liquidity")]
    NotaryLiquidityShort { input: usize },

    /// P09
    #[error("P09: wrong referring output {output} for fair withdraw from escrow")]
    FairWithdrawBadPair { output: usize },

    /// P12
    #[error("P12: no liquidity left for frozen output {output}")]
    LiquidityShortFrozen { output: usize },

    /// P13
    #[error("P13: no liquidity left for reserve output {output}")]
    LiquidityShortReserve { output: usize },

    /// P14
    #[error("P14: no liquidity left for burn or notary output {output}")]
    LiquidityShortNotary { output: usize },

    /// P15
    #[error("P15: no liquidity left for output {output}")]
    LiquidityShort { output: usize },

    /// P16
    #[error("P16: total mismatch on output {output}")]
    OutputTotalMismatch { output: usize },

    /// P17
    #[error("P17: total mismatch on fee fractions")]
    FeeTotalMismatch,

    /// Staking: input count
    #[error("coin-stake must have exactly one input, found {found}")]
    StakeInputCount { found: usize },

    /// Staking: output count
    #[error("coin-stake must have at most eight outputs, found {found}")]
    StakeOutputCount { found: usize },

    /// Staking PI05
    #[error("PI05: not enough funds returned to the staking input address")]
    StakeReturnShort,

    /// PO01
    #[error("PO01: not enough coins for stake output {output}")]
    StakeOutputShort { output: usize },

    /// PO02
    #[error("PO02: no stake funds returned to the input address")]
    StakeOutputMissing,

    /// PO03
    #[error("PO03: no reward coins left for output {output}")]
    RewardShort { output: usize },

    /// PO04
    #[error("PO04: total mismatch on stake output {output}")]
    StakeOutputTotalMismatch { output: usize },

    /// Vote tally could not resolve the staked input's fractions.
    #[error("no stored fractions for the staked input")]
    VoteFractionsMissing,
}
