//! The peg-level / peg-pool / balance protocol.
//!
//! Balances travel as base64 pegdata blobs: packed fractions, the peg level
//! they were computed at, and the reserve/liquid scalar pair. Each cycle the
//! exchange derives a fresh level and pegpool with [`get_peg_level`] and
//! rolls every balance forward with [`update_peg_balances`]; coins, liquid
//! and reserve move between balances of the same level.

use tracing::debug;

use bitpeg_chain::fraction::ratio_of;
use bitpeg_chain::{Fractions, PegDeserialize, PegLevel, PegSerialize, PEG_SIZE};

use crate::error::PegOpsError;

/// A decoded balance blob.
#[derive(Clone, Debug)]
pub struct Balance {
    pub fractions: Fractions,
    pub level: PegLevel,
    pub reserve: i64,
    pub liquid: i64,
}

pub fn pack_peg_data(fractions: &Fractions, level: &PegLevel) -> String {
    let reserve = fractions.low_level(level);
    let liquid = fractions.high_level(level);
    pack_peg_balance(fractions, level, reserve, liquid)
}

pub fn pack_peg_balance(
    fractions: &Fractions,
    level: &PegLevel,
    reserve: i64,
    liquid: i64,
) -> String {
    let mut out = Vec::new();
    fractions
        .peg_serialize(&mut out)
        .expect("writing to a Vec never fails");
    level
        .peg_serialize(&mut out)
        .expect("writing to a Vec never fails");
    reserve
        .peg_serialize(&mut out)
        .expect("writing to a Vec never fails");
    liquid
        .peg_serialize(&mut out)
        .expect("writing to a Vec never fails");
    base64::encode(&out)
}

fn unpack_fractions(blob: &str, tag: &'static str) -> Result<Fractions, PegOpsError> {
    if blob.is_empty() {
        return Ok(Fractions::value(0));
    }
    let bytes =
        base64::decode(blob).map_err(|_| PegOpsError::Unpack {
            tag,
            source: bitpeg_chain::SerializationError::Parse("not base64"),
        })?;
    Fractions::peg_deserialize(&bytes[..]).map_err(|source| PegOpsError::Unpack { tag, source })
}

/// Tolerant balance decode: a missing level leaves the zero level, missing
/// scalars are reconstructed from the fractions and the level.
pub fn unpack_balance(blob: &str, tag: &'static str) -> Result<Balance, PegOpsError> {
    if blob.is_empty() {
        return Ok(Balance {
            fractions: Fractions::value(0),
            level: PegLevel::default(),
            reserve: 0,
            liquid: 0,
        });
    }

    let bytes = base64::decode(blob).map_err(|_| PegOpsError::Unpack {
        tag,
        source: bitpeg_chain::SerializationError::Parse("not base64"),
    })?;
    let mut cursor = &bytes[..];

    let fractions =
        Fractions::peg_deserialize(&mut cursor).map_err(|source| PegOpsError::Unpack { tag, source })?;

    let mut level = PegLevel::default();
    let mut reserve = 0i64;
    let mut liquid = 0i64;
    match PegLevel::peg_deserialize(&mut cursor) {
        Ok(decoded) => {
            level = decoded;
            match i64::peg_deserialize(&mut cursor) {
                Ok(first) => {
                    reserve = first;
                    liquid = i64::peg_deserialize(&mut cursor)
                        .map_err(|source| PegOpsError::Unpack { tag, source })?;
                }
                Err(_) => {
                    reserve = fractions.low_level(&level);
                    liquid = fractions.high_level(&level);
                }
            }
        }
        Err(_) => {}
    }

    Ok(Balance {
        fractions,
        level,
        reserve,
        liquid,
    })
}

/// An empty blob inside a move means "the zero balance at the operation's
/// level", so fresh destinations pass the level equality checks.
fn unpack_balance_at(
    blob: &str,
    tag: &'static str,
    level: &PegLevel,
) -> Result<Balance, PegOpsError> {
    if blob.is_empty() {
        return Ok(Balance {
            fractions: Fractions::value(0),
            level: *level,
            reserve: 0,
            liquid: 0,
        });
    }
    unpack_balance(blob, tag)
}

/// The fields of a level hex, for RPC display.
pub fn get_peg_level_info(level_hex: &str) -> Result<PegLevel, PegOpsError> {
    let level = PegLevel::from_hex(level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }
    Ok(level)
}

/// The level hex and pegpool blob for a new exchange cycle.
///
/// `broadcast_ahead` is the interval offset withdrawals are scheduled at
/// (the chain broadcasts them a few intervals after drafting); the original
/// chain always used three.
#[allow(clippy::too_many_arguments)]
pub fn get_peg_level(
    exchange_blob: &str,
    pegshift_blob: &str,
    cycle_now: u32,
    cycle_prev: u32,
    peg_now: u16,
    peg_next: u16,
    peg_next_next: u16,
    broadcast_ahead: u16,
) -> Result<(String, String), PegOpsError> {
    let fr_exchange = unpack_fractions(exchange_blob, "exchange")?.std();
    let fr_pegshift = unpack_fractions(pegshift_blob, "pegshift")?.std();

    let level = PegLevel::with_shift(
        cycle_now,
        cycle_prev,
        peg_now + broadcast_ahead,
        peg_next + broadcast_ahead,
        peg_next_next + broadcast_ahead,
        &fr_exchange,
        &fr_pegshift,
    );

    let supply_effective = level.supply_effective();
    let fr_pool = fr_exchange.high_part(supply_effective);

    let pool_value = fr_pool.total();
    let pool_reserve = level.shift_last_part;
    let pool_liquid = pool_value - pool_reserve;

    debug!(
        cycle = cycle_now,
        supply = level.supply,
        shift = level.shift,
        pool = pool_value,
        "derived exchange peg level"
    );

    Ok((
        level.to_hex(),
        pack_peg_balance(&fr_pool, &level, pool_reserve, pool_liquid),
    ))
}

/// The result of rolling a balance into a new cycle.
#[derive(Debug)]
pub struct PegLevelUpdate {
    pub balance: String,
    pub pegpool: String,
}

/// Roll `balance` forward into the cycle of `level_hex`, drawing its liquid
/// from `pegpool`.
///
/// The reserve part of the new balance is whatever the old balance held
/// below the new boundary; the liquid part is normed to the pool, with the
/// partial boundary bucket handled first.
pub fn update_peg_balances(
    balance_blob: &str,
    pegpool_blob: &str,
    level_hex: &str,
) -> Result<PegLevelUpdate, PegOpsError> {
    let level_new = PegLevel::from_hex(level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level_new.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }

    let pool = unpack_balance(pegpool_blob, "pegpool")?;
    let balance = unpack_balance(balance_blob, "balance")?;

    let mut fr_pool = pool.fractions.std();
    let fr_balance = balance.fractions.std();
    let mut pool_reserve = pool.reserve;

    if pool.level.cycle != level_new.cycle {
        return Err(PegOpsError::CycleMismatch {
            tag: "pegpool",
            have: pool.level.cycle,
            want: level_new.cycle,
        });
    }

    if balance.level.cycle == level_new.cycle {
        // already up-to-date
        return Ok(PegLevelUpdate {
            balance: balance_blob.to_string(),
            pegpool: pegpool_blob.to_string(),
        });
    }
    if balance.level.cycle > level_new.cycle {
        return Err(PegOpsError::Outdated {
            tag: "balance",
            cycle: balance.level.cycle,
            current: level_new.cycle,
        });
    }
    if balance.level.cycle != 0 && balance.level.cycle != level_new.cycle_prev {
        return Err(PegOpsError::NotSequential {
            prev_cycle: level_new.cycle_prev,
            balance_cycle: balance.level.cycle,
        });
    }

    let value = fr_balance.total();

    // The old balance's low part becomes the new reserve.
    let mut fr_reserve = fr_balance.low_part_level(&level_new);
    let mut reserve = fr_reserve.total();
    let mut fr_liquid = Fractions::zero_std();

    // The partial boundary bucket is settled first: its reserve comes from
    // the pool's reserved slice, its liquid proportionally to the pool.
    let last_idx = level_new.supply_effective();
    if last_idx < PEG_SIZE && level_new.has_partial() {
        let last_total = fr_pool[last_idx];
        let last_reserve = fr_reserve[last_idx];
        let take_reserve = last_reserve.min(last_total).min(pool_reserve);

        pool_reserve -= take_reserve;
        fr_pool[last_idx] -= take_reserve;

        if last_reserve > take_reserve {
            // the uncovered part of the bucket stays liquid
            let diff = last_reserve - take_reserve;
            fr_reserve[last_idx] -= diff;
            reserve -= diff;
        }

        let last_total = fr_pool[last_idx];
        pool_reserve = pool_reserve.min(last_total);

        let last_liquid = last_total - pool_reserve;
        let liquid = value - reserve;
        let liquid_pool = fr_pool.total() - pool_reserve;
        let take_liquid = ratio_of(last_liquid, liquid, liquid_pool).min(last_total);

        fr_liquid[last_idx] += take_liquid;
        fr_pool[last_idx] -= take_liquid;
    }

    // The remaining liquid is normed to the pool.
    let liquid = value - reserve;
    let mut liquid_todo = value - reserve - fr_liquid.total();
    let liquid_pool = fr_pool.total() - pool_reserve;
    if liquid_todo > liquid_pool {
        return Err(PegOpsError::PoolShort {
            have: liquid_pool,
            need: liquid_todo,
        });
    }

    let mut hold_last_part = 0i64;
    if pool_reserve > 0 && last_idx < PEG_SIZE {
        hold_last_part = fr_pool[last_idx];
        fr_pool[last_idx] = 0;
    }

    liquid_todo = fr_pool.move_ratio_part_to(liquid_todo, &mut fr_liquid);

    if liquid_todo > 0 && liquid_todo <= hold_last_part {
        fr_liquid[last_idx] += liquid_todo;
        hold_last_part -= liquid_todo;
        liquid_todo = 0;
    }

    if hold_last_part > 0 {
        fr_pool[last_idx] = hold_last_part;
    }

    if liquid_todo > 0 {
        return Err(PegOpsError::PoolShort {
            have: 0,
            need: liquid_todo,
        });
    }

    let fr_balance_new = &fr_reserve + &fr_liquid;
    if value != fr_balance_new.total() {
        return Err(PegOpsError::BalanceMismatch("total changed across update"));
    }

    let pool_liquid = fr_pool.total() - pool_reserve;

    Ok(PegLevelUpdate {
        balance: pack_peg_balance(&fr_balance_new, &level_new, reserve, liquid),
        pegpool: pack_peg_balance(&fr_pool, &level_new, pool_reserve, pool_liquid),
    })
}

/// Move whole coins (a proportional slice of the full vector) between
/// balances.
pub fn move_coins(
    amount: i64,
    src_blob: &str,
    dst_blob: &str,
    level_hex: &str,
    cross_cycles: bool,
) -> Result<(String, String), PegOpsError> {
    let level = PegLevel::from_hex(level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }

    let src = unpack_balance_at(src_blob, "src", &level)?;
    if !cross_cycles && level != src.level {
        return Err(PegOpsError::Outdated {
            tag: "src",
            cycle: src.level.cycle,
            current: level.cycle,
        });
    }

    let src_value = src.fractions.total();
    if src_value < amount {
        return Err(PegOpsError::NotEnoughCoins {
            have: src_value,
            need: amount,
        });
    }

    let dst = unpack_balance_at(dst_blob, "dst", &level)?;
    if level != dst.level {
        return Err(PegOpsError::Outdated {
            tag: "dst",
            cycle: dst.level.cycle,
            current: level.cycle,
        });
    }

    let mut fr_src = src.fractions.std();
    let mut fr_dst = dst.fractions.std();
    let in_total = fr_src.total() + fr_dst.total();

    let fr_move = fr_src.ratio_part(amount);
    fr_src -= &fr_move;
    fr_dst += &fr_move;

    let out_total = fr_src.total() + fr_dst.total();
    if in_total != out_total {
        return Err(PegOpsError::ValueConservation {
            in_total,
            out_total,
        });
    }

    Ok((
        pack_peg_data(&fr_src, &level),
        pack_peg_data(&fr_dst, &level),
    ))
}

/// Move liquid value between balances of the same level.
pub fn move_liquid(
    amount: i64,
    src_blob: &str,
    dst_blob: &str,
    level_hex: &str,
) -> Result<(String, String), PegOpsError> {
    let level = PegLevel::from_hex(level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }

    let src = unpack_balance_at(src_blob, "src", &level)?;
    if level != src.level {
        return Err(PegOpsError::Outdated {
            tag: "src",
            cycle: src.level.cycle,
            current: level.cycle,
        });
    }
    if src.liquid < amount {
        return Err(PegOpsError::NotEnoughLiquid {
            have: src.liquid,
            need: amount,
        });
    }

    let dst = unpack_balance_at(dst_blob, "dst", &level)?;
    if level != dst.level {
        return Err(PegOpsError::Outdated {
            tag: "dst",
            cycle: dst.level.cycle,
            current: level.cycle,
        });
    }

    let mut fr_src = src.fractions.std();
    let mut fr_dst = dst.fractions.std();
    let in_total = fr_src.total() + fr_dst.total();

    let partial = level.has_partial();
    let mut supply_effective = level.supply_effective();
    if partial {
        supply_effective = (supply_effective + 1).min(PEG_SIZE);
    }

    let mut fr_liquid = fr_src.high_part(supply_effective);

    if partial {
        let partial_liquid = src.liquid - fr_liquid.total();
        if partial_liquid < 0 {
            return Err(PegOpsError::BalanceMismatch("partial liquid is negative"));
        }
        fr_liquid[supply_effective - 1] = partial_liquid;
    }

    if fr_liquid.total() < amount {
        return Err(PegOpsError::NotEnoughLiquid {
            have: fr_liquid.total(),
            need: amount,
        });
    }

    let fr_move = fr_liquid.ratio_part(amount);
    fr_src -= &fr_move;
    fr_dst += &fr_move;

    let src_liquid = src.liquid - amount;
    let dst_liquid = dst.liquid + amount;

    let out_total = fr_src.total() + fr_dst.total();
    if in_total != out_total {
        return Err(PegOpsError::ValueConservation {
            in_total,
            out_total,
        });
    }
    if !fr_src.is_positive() {
        return Err(PegOpsError::NegativeResult("src"));
    }

    Ok((
        pack_peg_balance(&fr_src, &level, src.reserve, src_liquid),
        pack_peg_balance(&fr_dst, &level, dst.reserve, dst_liquid),
    ))
}

/// Move reserve value between balances of the same level.
pub fn move_reserve(
    amount: i64,
    src_blob: &str,
    dst_blob: &str,
    level_hex: &str,
) -> Result<(String, String), PegOpsError> {
    let level = PegLevel::from_hex(level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }

    let src = unpack_balance_at(src_blob, "src", &level)?;
    if level != src.level {
        return Err(PegOpsError::Outdated {
            tag: "src",
            cycle: src.level.cycle,
            current: level.cycle,
        });
    }
    if src.reserve < amount {
        return Err(PegOpsError::NotEnoughReserve {
            have: src.reserve,
            need: amount,
        });
    }

    let dst = unpack_balance_at(dst_blob, "dst", &level)?;
    if level != dst.level {
        return Err(PegOpsError::Outdated {
            tag: "dst",
            cycle: dst.level.cycle,
            current: level.cycle,
        });
    }

    let mut fr_src = src.fractions.std();
    let mut fr_dst = dst.fractions.std();
    let in_total = fr_src.total() + fr_dst.total();

    let supply_effective = level.supply_effective();
    let mut fr_reserve = fr_src.low_part(supply_effective);

    if level.has_partial() && supply_effective < PEG_SIZE {
        let partial_reserve = src.reserve - fr_reserve.total();
        if partial_reserve < 0 {
            return Err(PegOpsError::BalanceMismatch("partial reserve is negative"));
        }
        fr_reserve[supply_effective] = partial_reserve;
    }

    let fr_move = fr_reserve.ratio_part(amount);
    fr_src -= &fr_move;
    fr_dst += &fr_move;

    let src_reserve = src.reserve - amount;
    let dst_reserve = dst.reserve + amount;

    let out_total = fr_src.total() + fr_dst.total();
    if in_total != out_total {
        return Err(PegOpsError::ValueConservation {
            in_total,
            out_total,
        });
    }
    if !fr_src.is_positive() {
        return Err(PegOpsError::NegativeResult("src"));
    }

    Ok((
        pack_peg_balance(&fr_src, &level, src_reserve, src.liquid),
        pack_peg_balance(&fr_dst, &level, dst_reserve, dst.liquid),
    ))
}

/// Bucket-wise subtraction of one balance from another, scalars included.
pub fn remove_coins(arg1_blob: &str, arg2_blob: &str) -> Result<String, PegOpsError> {
    let arg1 = unpack_balance(arg1_blob, "arg1")?;
    let arg2 = unpack_balance(arg2_blob, "arg2")?;

    let mut fr = arg1.fractions.std();
    fr -= &arg2.fractions.std();

    Ok(pack_peg_balance(
        &fr,
        &arg1.level,
        arg1.reserve - arg2.reserve,
        arg1.liquid - arg2.liquid,
    ))
}

#[cfg(test)]
mod tests;
