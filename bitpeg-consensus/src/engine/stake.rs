//! The coin-stake variant of the fraction computation.
//!
//! A coin-stake spends exactly one input and returns it, plus the minted
//! reward, to the staker. The stake output keeps the input's fractions (and
//! its freeze marks); everything else is paid out of the reward pool, which
//! is the minted amount plus the block's fee fractions.

use std::collections::HashMap;

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::transparent::{OutPoint, Output};
use bitpeg_chain::{Fractions, NotaryMarks};

use crate::error::PegError;
use crate::PegContext;

/// The stake transaction's resolved environment.
pub struct StakeInputs<'a> {
    pub prev_outs: &'a HashMap<OutPoint, Output>,
    pub input_fractions: &'a HashMap<OutPoint, Fractions>,
    /// Fee fractions accumulated over the block's standard transactions.
    pub fees_fractions: &'a Fractions,
    /// The minted stake reward, excluding fees.
    pub reward_without_fees: i64,
}

/// Compute fraction vectors for a coin-stake transaction.
///
/// Below the legacy fork height the pre-fork variant applies; it is kept
/// isolated so it can be deleted once the affected heights are pruned.
pub fn calculate_staking_fractions(
    tx: &Transaction,
    block_height: u32,
    inputs: &StakeInputs<'_>,
    ctx: &PegContext,
) -> Result<Option<Vec<Fractions>>, PegError> {
    if block_height < ctx.params.legacy_stake_fork_height {
        return calculate_staking_fractions_legacy(tx, inputs, ctx);
    }
    calculate_staking_fractions_v2(tx, inputs, ctx)
}

fn resolve_stake_input(
    tx: &Transaction,
    inputs: &StakeInputs<'_>,
    ctx: &PegContext,
) -> Result<(i64, String, Fractions), PegError> {
    let outpoint = tx.inputs[0]
        .outpoint()
        .ok_or(PegError::InputNotFound { input: 0 })?;
    let prev = inputs
        .prev_outs
        .get(&outpoint)
        .ok_or(PegError::InputNotFound { input: 0 })?;

    let address = prev.lock_script.pool_key(ctx.params.network);

    let fr_stake = inputs
        .input_fractions
        .get(&outpoint)
        .ok_or(PegError::InputFractionsMissing { input: 0 })?
        .std();
    if fr_stake.total() != prev.value {
        return Err(PegError::InputTotalMismatch { input: 0 });
    }

    Ok((prev.value, address, fr_stake))
}

fn calculate_staking_fractions_v2(
    tx: &Transaction,
    inputs: &StakeInputs<'_>,
    ctx: &PegContext,
) -> Result<Option<Vec<Fractions>>, PegError> {
    let n_vout = tx.outputs.len();

    if !ctx.is_whitelisted(tx, inputs.prev_outs) {
        return Ok(None);
    }

    if tx.inputs.len() != 1 {
        return Err(PegError::StakeInputCount {
            found: tx.inputs.len(),
        });
    }
    if n_vout > 8 {
        return Err(PegError::StakeOutputCount { found: n_vout });
    }

    let (stake_value, input_address, fr_stake) = resolve_stake_input(tx, inputs, ctx)?;

    // The staker must get at least the staked value back.
    let mut value_return = 0i64;
    for out in &tx.outputs {
        if out.lock_script.pool_key(ctx.params.network) == input_address {
            value_return += out.value;
        }
    }
    if value_return < stake_value {
        return Err(PegError::StakeReturnShort);
    }

    let mut fr_reward = Fractions::std_of(inputs.reward_without_fees);
    fr_reward += inputs.fees_fractions;
    let mut reward_left = fr_reward.total();

    let mut output_fractions: Vec<Fractions> = (0..n_vout)
        .map(|_| Fractions::zero_std())
        .collect();

    // The first output at the input address covering the staked value is the
    // stake output; it takes the whole input plus reward for any excess, and
    // inherits the input's freeze marks.
    let mut stake_out: Option<usize> = None;
    for (i, out) in tx.outputs.iter().enumerate() {
        let value = out.value;
        let address = out.lock_script.pool_key(ctx.params.network);

        if value >= stake_value && input_address == address {
            if value > stake_value + reward_left {
                return Err(PegError::StakeOutputShort { output: i });
            }

            let from_reward = value - stake_value;

            let fr_out = &mut output_fractions[i];
            *fr_out = fr_stake.clone();

            if from_reward > 0 {
                reward_left -= from_reward;
                fr_reward.move_ratio_part_to(from_reward, fr_out);
            }

            if fr_stake.marks.contains(NotaryMarks::NOTARY_F) {
                fr_out.marks |= NotaryMarks::NOTARY_F;
                fr_out.lock_time = fr_stake.lock_time;
            } else if fr_stake.marks.contains(NotaryMarks::NOTARY_V) {
                fr_out.marks |= NotaryMarks::NOTARY_V;
                fr_out.lock_time = fr_stake.lock_time;
            }

            stake_out = Some(i);
            break;
        }
    }

    let stake_out = stake_out.ok_or(PegError::StakeOutputMissing)?;

    // Remaining outputs draw from the reward pool in order.
    for (i, out) in tx.outputs.iter().enumerate() {
        if i == stake_out {
            continue;
        }
        let value = out.value;
        if value > reward_left {
            return Err(PegError::RewardShort { output: i });
        }
        fr_reward.move_ratio_part_to(value, &mut output_fractions[i]);
        reward_left -= value;
    }

    for (i, fractions) in output_fractions.iter().enumerate() {
        if fractions.total() != tx.outputs[i].value || !fractions.is_positive() {
            return Err(PegError::StakeOutputTotalMismatch { output: i });
        }
    }

    Ok(Some(output_fractions))
}

/// The pre-fork computation: no minimum-value match for the stake output and
/// no output-count cap. Byte-compatible with blocks below the fork height
/// only; do not extend.
fn calculate_staking_fractions_legacy(
    tx: &Transaction,
    inputs: &StakeInputs<'_>,
    ctx: &PegContext,
) -> Result<Option<Vec<Fractions>>, PegError> {
    let n_vout = tx.outputs.len();

    if !ctx.is_whitelisted(tx, inputs.prev_outs) {
        return Ok(None);
    }

    if tx.inputs.len() != 1 {
        return Err(PegError::StakeInputCount {
            found: tx.inputs.len(),
        });
    }

    let (_, input_address, fr_stake) = resolve_stake_input(tx, inputs, ctx)?;

    let mut fr_reward = Fractions::std_of(inputs.reward_without_fees);
    fr_reward += inputs.fees_fractions;
    let mut reward_left = fr_reward.total();

    let mut output_fractions: Vec<Fractions> = (0..n_vout)
        .map(|_| Fractions::zero_std())
        .collect();

    // First output back at the input address takes the stake; the rest of
    // its value and all other outputs come from the reward.
    let mut stake_remaining = fr_stake.clone();
    let mut stake_taken = false;
    for (i, out) in tx.outputs.iter().enumerate() {
        let value = out.value;
        let address = out.lock_script.pool_key(ctx.params.network);
        let fr_out = &mut output_fractions[i];

        if !stake_taken && address == input_address {
            let stake_value = stake_remaining.total();
            let from_stake = value.min(stake_value);
            stake_remaining.move_ratio_part_to(from_stake, fr_out);
            let from_reward = value - from_stake;
            if from_reward > reward_left {
                return Err(PegError::RewardShort { output: i });
            }
            fr_reward.move_ratio_part_to(from_reward, fr_out);
            reward_left -= from_reward;
            stake_taken = true;
        } else {
            if value > reward_left + stake_remaining.total() {
                return Err(PegError::RewardShort { output: i });
            }
            let shortfall = fr_reward.move_ratio_part_to(value, fr_out);
            reward_left -= value - shortfall;
            if shortfall > 0 {
                stake_remaining.move_ratio_part_to(shortfall, fr_out);
            }
        }
    }

    if !stake_taken {
        return Err(PegError::StakeOutputMissing);
    }

    for (i, fractions) in output_fractions.iter().enumerate() {
        if fractions.total() != tx.outputs[i].value || !fractions.is_positive() {
            return Err(PegError::StakeOutputTotalMismatch { output: i });
        }
    }

    Ok(Some(output_fractions))
}
