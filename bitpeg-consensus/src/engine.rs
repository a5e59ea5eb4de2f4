//! Per-transaction fraction propagation.
//!
//! Given the fraction vectors of a transaction's inputs and the network
//! supply index, derive a fraction vector for each output plus the fee
//! vector, honouring reserve/liquid semantics and notary-driven freezing.
//!
//! The pool model: each input's reserve part stays in a per-address pool
//! (freezing is address-local), while all liquid parts merge into one common
//! pool. Outputs then draw from these pools in `vout` order; address pools
//! iterate in ascending base58 order so the computation is deterministic
//! across implementations.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::transparent::{OutPoint, Output};
use bitpeg_chain::{Fractions, NotaryMarks};

use crate::error::PegError;
use crate::PegContext;

mod stake;


pub use stake::{calculate_staking_fractions, StakeInputs};

/// The result of a successful per-transaction peg computation.
#[derive(Clone, Debug)]
pub struct TxFractions {
    /// One fraction vector per `vout`, in order.
    pub outputs: Vec<Fractions>,
    /// Whatever the outputs did not consume; the block's fee pool.
    pub fee: Fractions,
}

/// A pending freeze instruction parsed from a notary output.
struct FrozenTxOut {
    value: i64,
    address: String,
    marks: NotaryMarks,
    fractions: Fractions,
    fair_pair: Option<(usize, usize)>,
}

impl Default for FrozenTxOut {
    fn default() -> Self {
        FrozenTxOut {
            value: 0,
            address: String::new(),
            marks: NotaryMarks::empty(),
            fractions: Fractions::zero_std(),
            fair_pair: None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum NotaryKind {
    Freeze,
    VFreeze,
    Lock,
}

fn notary_kind(payload: &str) -> Option<NotaryKind> {
    if payload.starts_with("**F**") {
        Some(NotaryKind::Freeze)
    } else if payload.starts_with("**V**") {
        Some(NotaryKind::VFreeze)
    } else if payload.starts_with("**L**") {
        Some(NotaryKind::Lock)
    } else {
        None
    }
}

/// Leading-integer parse of a freeze notary target, tolerant of trailing
/// bytes the way the original chain was.
fn parse_notary_target(arg: &str) -> Option<i64> {
    let digits: String = arg
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Compute fraction vectors for a standard (non-stake) transaction.
///
/// Returns `Ok(None)` when the transaction is skipped by the demo-mode
/// whitelist. On any error all speculative output fractions are discarded.
pub fn calculate_standard_fractions(
    tx: &Transaction,
    supply: usize,
    now: u32,
    prev_outs: &HashMap<OutPoint, Output>,
    input_fractions: &HashMap<OutPoint, Fractions>,
    ctx: &PegContext,
) -> Result<Option<TxFractions>, PegError> {
    let network = ctx.params.network;
    let n_vout = tx.outputs.len();

    if !ctx.is_whitelisted(tx, prev_outs) {
        return Ok(None);
    }

    let mut value_in: i64 = 0;
    let mut liquidity_total: i64 = 0;

    let mut pool_reserves: BTreeMap<String, Fractions> = BTreeMap::new();
    let mut pool_liquidity: BTreeMap<String, Fractions> = BTreeMap::new();
    let mut pool_frozen: BTreeMap<usize, FrozenTxOut> = BTreeMap::new();
    let mut freeze_all = false;

    let spends: Vec<(usize, OutPoint)> = if tx.is_coinbase() {
        Vec::new()
    } else {
        tx.inputs
            .iter()
            .enumerate()
            .filter_map(|(i, input)| input.outpoint().map(|outpoint| (i, outpoint)))
            .collect()
    };

    for &(i, outpoint) in &spends {
        let prev = prev_outs
            .get(&outpoint)
            .ok_or(PegError::InputNotFound { input: i })?;
        value_in += prev.value;
        let address = prev.lock_script.pool_key(network);

        let fr_inp = input_fractions
            .get(&outpoint)
            .ok_or(PegError::InputFractionsMissing { input: i })?
            .std();
        if fr_inp.total() != prev.value {
            return Err(PegError::InputTotalMismatch { input: i });
        }

        if fr_inp.marks.contains(NotaryMarks::NOTARY_F) && fr_inp.lock_time > tx.time {
            return Err(PegError::FrozenInputSpent { input: i });
        }
        if fr_inp.marks.contains(NotaryMarks::NOTARY_V) && fr_inp.lock_time > tx.time {
            return Err(PegError::VFrozenInputSpent { input: i });
        }

        let reserve_part = fr_inp.low_part(supply);
        let mut reserve_in = reserve_part.total();
        *pool_reserves
            .entry(address.clone())
            .or_insert_with(Fractions::zero_std) += &reserve_part;

        let liquid_part = fr_inp.high_part(supply);
        let mut liquidity_in = liquid_part.total();
        *pool_liquidity
            .entry(address.clone())
            .or_insert_with(Fractions::zero_std) += &liquid_part;

        // A notary on the same position as the input may instruct a freeze;
        // funds for a non-shared freeze are deducted from the pools here.
        if i < n_vout {
            let payload = tx.outputs[i].lock_script.notary_payload();
            let kind = payload.as_deref().and_then(notary_kind);
            if let (Some(payload), Some(kind)) = (payload.as_deref(), kind) {
                let mark = match kind {
                    NotaryKind::Freeze => NotaryMarks::NOTARY_F,
                    NotaryKind::VFreeze => NotaryMarks::NOTARY_V,
                    NotaryKind::Lock => NotaryMarks::NOTARY_L,
                };

                let mut shared_freeze = false;
                let target_list = &payload[5..];
                let args: Vec<&str> = target_list.split(':').collect();
                let mut frozen_indexes: Vec<usize> = Vec::new();

                for arg in &args {
                    let target = parse_notary_target(arg)
                        .filter(|t| *t >= 0 && (*t as usize) < n_vout)
                        .ok_or(PegError::NotaryBadTarget { input: i })?
                        as usize;
                    if target == i {
                        return Err(PegError::NotarySelfReference { input: i });
                    }

                    let entry = pool_frozen.entry(target).or_default();
                    entry.value = tx.outputs[target].value;
                    entry.address = address.clone();
                    entry.marks |= mark;
                    entry.fair_pair = None;
                    frozen_indexes.push(target);
                }

                if args.len() > 1 {
                    freeze_all = true;
                    shared_freeze = true;
                }
                if frozen_indexes.len() == 2 {
                    let mut first = frozen_indexes[0];
                    let mut second = frozen_indexes[1];
                    if first > second {
                        std::mem::swap(&mut first, &mut second);
                    }
                    if let Some(entry) = pool_frozen.get_mut(&first) {
                        entry.fair_pair = Some((first, second));
                    }
                }

                if frozen_indexes.len() == 1 {
                    let target = frozen_indexes[0];
                    let frozen_value = tx.outputs[target].value;

                    match kind {
                        NotaryKind::Freeze if reserve_in < frozen_value => {
                            freeze_all = true;
                            shared_freeze = true;
                        }
                        NotaryKind::VFreeze if liquidity_in < frozen_value => {
                            freeze_all = true;
                            shared_freeze = true;
                        }
                        NotaryKind::Lock if liquidity_in < frozen_value => {
                            return Err(PegError::NotaryLiquidityShort { input: i });
                        }
                        _ => {}
                    }

                    if !shared_freeze {
                        let mut frozen_out = Fractions::zero_std();
                        match kind {
                            NotaryKind::Freeze => {
                                pool_reserves
                                    .get_mut(&address)
                                    .expect("reserve pool exists for every input address")
                                    .move_ratio_part_to(frozen_value, &mut frozen_out);
                                reserve_in -= frozen_value;
                            }
                            NotaryKind::VFreeze | NotaryKind::Lock => {
                                pool_liquidity
                                    .get_mut(&address)
                                    .expect("liquidity pool exists for every input address")
                                    .move_ratio_part_to(frozen_value, &mut frozen_out);
                                liquidity_in -= frozen_value;
                            }
                        }
                        let entry = pool_frozen
                            .get_mut(&target)
                            .expect("frozen entry was just inserted");
                        entry.fractions += &frozen_out;
                        entry.marks |= mark;
                    }
                }
            }
        }

        liquidity_total += liquidity_in;
    }

    // The liquid parts merge into one common pool; reserves stay
    // address-local.
    let mut common_liquidity = Fractions::zero_std();
    for fractions in pool_liquidity.values() {
        common_liquidity += fractions;
    }
    let mut common_left = liquidity_total;

    let mut value_out: i64 = 0;
    let mut output_fractions: Vec<Fractions> = Vec::with_capacity(n_vout);

    for (j, out) in tx.outputs.iter().enumerate() {
        let value = out.value;
        value_out += value;

        let mut fr_out = Fractions::zero_std();
        let is_notary = out.lock_script.is_notary();
        let address = out.lock_script.pool_key(network);

        let frozen_here = pool_frozen.contains_key(&j);

        if freeze_all && frozen_here {
            let (marks, frozen_total, frozen_address, fair_pair) = {
                let entry = &pool_frozen[&j];
                (
                    entry.marks,
                    entry.fractions.total(),
                    entry.address.clone(),
                    entry.fair_pair,
                )
            };

            if frozen_total > 0 {
                fr_out = pool_frozen[&j].fractions.clone();
                fr_out.marks |= marks;
                stamp_freeze_lock(&mut fr_out, now, ctx);
            } else if marks.contains(NotaryMarks::NOTARY_V) {
                fr_out.marks |= NotaryMarks::NOTARY_V;
                fr_out.lock_time = now + ctx.params.peg_v_frozen_time;
                common_liquidity.move_ratio_part_to(value, &mut fr_out);
                common_left -= value;
            } else if marks.contains(NotaryMarks::NOTARY_F) {
                fr_out.marks |= NotaryMarks::NOTARY_F;
                fr_out.lock_time = now + ctx.params.peg_frozen_time;

                // Source address first, then the other reserves in order.
                let mut addresses = vec![frozen_address.clone()];
                for key in pool_reserves.keys() {
                    if *key != frozen_address {
                        addresses.push(key.clone());
                    }
                }

                let mut value_left = value;
                let mut to_take_reserves = value_left;

                if fair_pair.map(|(first, _)| first) == Some(j) && pool_frozen.len() == 2 {
                    let (first, second) =
                        fair_pair.expect("pair presence was just checked");
                    if first >= n_vout || second >= n_vout {
                        return Err(PegError::FairWithdrawBadPair { output: j });
                    }
                    // A fair withdraw from escrow: take proportionally less
                    // for the first output so the paired output keeps its
                    // fair share of this address's reserve.
                    let value1 = pool_frozen[&first].value;
                    let value2 = pool_frozen[&second].value;
                    if let Some(fr_reserve) = pool_reserves.get(&frozen_address) {
                        let reserve = fr_reserve.total();
                        if reserve <= value1 + value2 && value1 + value2 > 0 {
                            let scaled1 =
                                bitpeg_chain::fraction::ratio_of(reserve, value1, value1 + value2);
                            let scaled2 =
                                bitpeg_chain::fraction::ratio_of(reserve, value2, value1 + value2);
                            let remain = reserve - scaled1 - scaled2;
                            to_take_reserves = scaled1 + remain;
                        }
                    }
                }

                for key in &addresses {
                    let fr_reserve = match pool_reserves.get_mut(key) {
                        Some(fr_reserve) => fr_reserve,
                        None => continue,
                    };
                    let reserve = fr_reserve.total();
                    if reserve == 0 {
                        continue;
                    }
                    let to_take = to_take_reserves.min(reserve);
                    fr_reserve.move_ratio_part_to(to_take, &mut fr_out);
                    value_left -= to_take;
                    to_take_reserves -= to_take;
                    if to_take_reserves == 0 {
                        break;
                    }
                }

                if value_left > 0 {
                    if value_left > common_left {
                        return Err(PegError::LiquidityShortFrozen { output: j });
                    }
                    common_liquidity.move_ratio_part_to(value_left, &mut fr_out);
                    common_left -= value_left;
                }
            }
            // A strict-lock mark with a shared freeze draws nothing here;
            // the totals check below rejects the transaction.
        } else if !frozen_here {
            if pool_reserves.contains_key(&address) {
                // Back to an input address: its own reserve first.
                let mut value_left = value;
                let fr_reserve = pool_reserves
                    .get_mut(&address)
                    .expect("address presence was just checked");
                let reserve = fr_reserve.total();
                if reserve > 0 {
                    let to_take = value_left.min(reserve);
                    fr_reserve.move_ratio_part_to(to_take, &mut fr_out);
                    value_left -= to_take;
                }
                if value_left > 0 {
                    if value_left > common_left {
                        return Err(PegError::LiquidityShortReserve { output: j });
                    }
                    common_liquidity.move_ratio_part_to(value_left, &mut fr_out);
                    common_left -= value_left;
                }
            } else if address == ctx.params.burn_address || is_notary {
                // Burns and notary markers consume reserves first so burned
                // value leaves the reserve side.
                let addresses: Vec<String> = pool_reserves.keys().cloned().collect();
                let mut value_left = value;
                for key in &addresses {
                    let fr_reserve = pool_reserves
                        .get_mut(key)
                        .expect("iterating existing keys");
                    let reserve = fr_reserve.total();
                    if reserve == 0 {
                        continue;
                    }
                    let to_take = value_left.min(reserve);
                    fr_reserve.move_ratio_part_to(to_take, &mut fr_out);
                    value_left -= to_take;
                    if value_left == 0 {
                        break;
                    }
                }
                if value_left > 0 {
                    if value_left > common_left {
                        return Err(PegError::LiquidityShortNotary { output: j });
                    }
                    common_liquidity.move_ratio_part_to(value_left, &mut fr_out);
                    common_left -= value_left;
                }
            } else {
                // A fresh payee: liquidity moves out.
                if value > common_left {
                    return Err(PegError::LiquidityShort { output: j });
                }
                common_liquidity.move_ratio_part_to(value, &mut fr_out);
                common_left -= value;
            }
        } else {
            // Frozen with funds already deducted at the spending input.
            let entry = &pool_frozen[&j];
            fr_out = entry.fractions.clone();
            fr_out.marks |= entry.marks;
            stamp_freeze_lock(&mut fr_out, now, ctx);
        }

        output_fractions.push(fr_out);
    }

    for (j, fractions) in output_fractions.iter().enumerate() {
        if fractions.total() != tx.outputs[j].value || !fractions.is_positive() {
            return Err(PegError::OutputTotalMismatch { output: j });
        }
    }

    // What the outputs did not consume is the fee: the rest of the common
    // liquidity plus every leftover reserve.
    let fee = value_in - value_out;
    let mut fee_fractions = Fractions::zero_std();
    fee_fractions += &common_liquidity;
    for fractions in pool_reserves.values() {
        fee_fractions += fractions;
    }
    if fee != fee_fractions.total() || !fee_fractions.is_positive() {
        return Err(PegError::FeeTotalMismatch);
    }

    trace!(
        tx = %tx.hash(),
        outputs = n_vout,
        fee,
        "standard peg fractions computed"
    );

    Ok(Some(TxFractions {
        outputs: output_fractions,
        fee: fee_fractions,
    }))
}

fn stamp_freeze_lock(fractions: &mut Fractions, now: u32, ctx: &PegContext) {
    if fractions.marks.contains(NotaryMarks::NOTARY_F) {
        fractions.lock_time = now + ctx.params.peg_frozen_time;
    } else if fractions.marks.contains(NotaryMarks::NOTARY_V) {
        fractions.lock_time = now + ctx.params.peg_v_frozen_time;
    }
}
