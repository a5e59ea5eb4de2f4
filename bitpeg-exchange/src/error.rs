use thiserror::Error;

use bitpeg_chain::SerializationError;
use bitpeg_consensus::PegError;
use bitpeg_state::StorageError;

/// Errors of the exchange-facing peg operations. All are recoverable by the
/// caller; insufficiency variants carry the numerical gap for display.
#[derive(Error, Debug)]
pub enum PegOpsError {
    #[error("can not unpack '{tag}' pegdata: {source}")]
    Unpack {
        tag: &'static str,
        source: SerializationError,
    },

    #[error("can not unpack peglevel")]
    LevelInvalid,

    #[error("'{tag}' has cycle {have}, peglevel has {want}")]
    CycleMismatch {
        tag: &'static str,
        have: u32,
        want: u32,
    },

    #[error("outdated '{tag}' of cycle {cycle}, current {current}")]
    Outdated {
        tag: &'static str,
        cycle: u32,
        current: u32,
    },

    #[error("balance of cycle {balance_cycle} does not precede cycle-prev {prev_cycle}")]
    NotSequential {
        prev_cycle: u32,
        balance_cycle: u32,
    },

    #[error("not enough liquid {have} to move or withdraw {need}")]
    NotEnoughLiquid { have: i64, need: i64 },

    #[error("not enough reserve {have} to move or withdraw {need}")]
    NotEnoughReserve { have: i64, need: i64 },

    #[error("not enough amount {have} to move {need}")]
    NotEnoughCoins { have: i64, need: i64 },

    #[error("not enough liquid {have} on 'pool' to balance {need}")]
    PoolShort { have: i64, need: i64 },

    #[error("balance mismatch: {0}")]
    BalanceMismatch(&'static str),

    #[error("mismatch in and out values {in_total} vs {out_total}")]
    ValueConservation { in_total: i64, out_total: i64 },

    #[error("negative detected in '{0}'")]
    NegativeResult(&'static str),

    #[error("mismatch pegshift parts ({positive} vs {negative})")]
    PegShiftUnbalanced { positive: i64, negative: i64 },

    #[error("invalid address")]
    BadAddress,

    #[error("not enough liquid or coins are too fragmented to withdraw {need}")]
    CoinsTooFragmented { need: i64 },

    #[error("no withdraw fractions")]
    NoWithdrawFractions,

    #[error("fail on signing input {input}")]
    SignFailed { input: usize },

    #[error("mismatch requested and amount with fee ({requested} vs {amount})")]
    RequestedMismatch { requested: i64, amount: i64 },

    #[error("mismatch processed and amount with fee ({processed} vs {amount})")]
    ProcessedMismatch { processed: i64, amount: i64 },

    #[error("fail on calculations of tx fractions: {0}")]
    Engine(#[from] PegError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}
