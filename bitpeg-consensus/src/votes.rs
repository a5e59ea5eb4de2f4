//! Peg vote weighting and per-block vote accumulation.
//!
//! Each proof-of-stake block carries one vote, taken from its second
//! transaction (the coin-stake): the staked input's reserve/liquid split
//! determines the weight, and the first payee matching one of the designated
//! inflate/deflate/nochange addresses determines the kind.

use bitpeg_chain::transaction::Transaction;
use bitpeg_chain::{Fractions, PEG_MAX_SUPPLY_INDEX};

use crate::error::PegError;
use crate::{FractionSource, PegContext};

/// The three choices a block producer can vote for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PegVoteKind {
    Inflate,
    Deflate,
    Nochange,
}

/// Weight of a block's vote, from the staked output's split at `supply`.
///
/// Liquidity is discounted as the supply index rises, so late-cycle liquid
/// stakes do not dominate; the multiplier rises in steps of 120 index
/// points. Products run through 128-bit intermediates when they would
/// overflow.
pub fn calculate_peg_votes(fractions: &Fractions, supply: usize) -> i64 {
    let reserve_weight = fractions.low(supply);
    let mut liquid_weight = fractions.high(supply);

    let discount = match liquid_weight.checked_mul(supply as i64) {
        Some(product) => product / PEG_MAX_SUPPLY_INDEX as i64,
        None => {
            ((liquid_weight as i128 * supply as i128) / PEG_MAX_SUPPLY_INDEX as i128) as i64
        }
    };
    liquid_weight -= discount;

    let multiplier = supply as i64 / 120 + 1;
    let liquid = liquid_weight as i128;
    let reserve = reserve_weight as i128;

    if liquid > reserve * 4 {
        4 * multiplier
    } else if liquid > reserve * 3 {
        3 * multiplier
    } else if liquid > reserve * 2 {
        2 * multiplier
    } else {
        1
    }
}

/// The vote a coin-stake transaction casts, if any: the kind from the first
/// matching payee, weighted by the staked input's fractions at `supply`.
pub fn block_vote(
    stake_tx: &Transaction,
    supply: usize,
    fractions_source: &dyn FractionSource,
    ctx: &PegContext,
) -> Result<Option<(PegVoteKind, i64)>, PegError> {
    let mut weight = 1i64;

    if !stake_tx.is_coinbase() {
        for input in &stake_tx.inputs {
            let outpoint = match input.outpoint() {
                Some(outpoint) => outpoint,
                None => continue,
            };
            let fractions = fractions_source
                .fractions(&outpoint)
                .ok_or(PegError::VoteFractionsMissing)?;
            weight = calculate_peg_votes(&fractions, supply);
            break;
        }
    }

    for out in &stake_tx.outputs {
        let address = out.lock_script.pool_key(ctx.params.network);
        let kind = if address == ctx.params.peg_inflate_addr {
            Some(PegVoteKind::Inflate)
        } else if address == ctx.params.peg_deflate_addr {
            Some(PegVoteKind::Deflate)
        } else if address == ctx.params.peg_nochange_addr {
            Some(PegVoteKind::Nochange)
        } else {
            None
        };

        // only one vote to count
        if let Some(kind) = kind {
            return Ok(Some((kind, weight)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitpeg_chain::PegParams;

    #[test]
    fn weight_formula_discounts_liquidity() {
        // supply 600: effective liquid 600 - 600*600/1198 = 300, which is
        // above 2x but not above 3x the reserve of 100.
        let mut fractions = Fractions::zero_std();
        for i in 0..100 {
            fractions[i] = 1;
        }
        for i in 600..1200 {
            fractions[i] = 1;
        }
        assert_eq!(fractions.low(600), 100);
        assert_eq!(fractions.high(600), 600);
        assert_eq!(calculate_peg_votes(&fractions, 600), 2 * (600 / 120 + 1));
    }

    #[test]
    fn weight_is_one_for_reserve_heavy_stakes() {
        let mut fractions = Fractions::zero_std();
        for i in 0..500 {
            fractions[i] = 10;
        }
        assert_eq!(calculate_peg_votes(&fractions, 600), 1);
    }

    #[test]
    fn weight_survives_huge_stakes() {
        // Large enough that liquid * supply overflows 64 bits.
        let mut fractions = Fractions::zero_std();
        fractions[1199] = i64::MAX / 2;
        let weight = calculate_peg_votes(&fractions, 600);
        let multiplier = 600 / 120 + 1;
        assert_eq!(weight, 4 * multiplier);
    }

    #[test]
    fn vote_kind_matches_first_designated_payee() {
        use bitpeg_chain::transaction::Transaction;
        use bitpeg_chain::transparent::{Input, Output, Script};

        let params = PegParams::mainnet();
        let ctx = crate::PegContext::new(params.clone());

        let inflate_script = {
            let address: bitpeg_chain::transparent::Address =
                params.peg_inflate_addr.parse().expect("params address");
            address.to_script()
        };

        let tx = Transaction::new(
            1,
            0,
            vec![Input::Coinbase {
                data: vec![],
                sequence: 0,
            }],
            vec![
                Output {
                    value: 0,
                    lock_script: Script(vec![]),
                },
                Output {
                    value: 1,
                    lock_script: inflate_script,
                },
            ],
            0,
        );

        let empty: std::collections::HashMap<
            bitpeg_chain::transparent::OutPoint,
            Fractions,
        > = std::collections::HashMap::new();
        let vote = block_vote(&tx, 0, &empty, &ctx).expect("vote computes");
        assert_eq!(vote, Some((PegVoteKind::Inflate, 1)));
    }
}
