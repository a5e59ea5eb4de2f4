//! Exchange-side peg bookkeeping: the peg-level / peg-pool / balance
//! protocol, and the coin-selection withdrawal planner.
//!
//! Callers hold balances as opaque base64 pegdata blobs and round-trip them
//! through these operations; no operation here partially mutates persistent
//! state. The only writes are the withdraw planner persisting draft change
//! fractions so consecutive drafts can chain before block inclusion.

mod error;
mod pegops;
mod withdraw;

pub use error::PegOpsError;
pub use pegops::{
    get_peg_level, get_peg_level_info, move_coins, move_liquid, move_reserve, pack_peg_balance,
    pack_peg_data, remove_coins, unpack_balance, Balance, PegLevelUpdate,
    update_peg_balances,
};
pub use withdraw::{
    prepare_liquid_withdraw, prepare_reserve_withdraw, ChainView, CoinSource, InputSigner,
    WalletCoin, WithdrawReceipt, WithdrawRequest,
};
