//! The coin-selection withdrawal planner.
//!
//! A withdrawal drafts a transaction whose payee output carries the
//! requested amount's fractions while disturbing the exchange's fraction
//! shape as little as possible: candidate coins are ranked by distortion
//! against the requested shape and taken greedily. Reserve withdrawals
//! additionally emit one freeze notary per input so the paid reserve ends up
//! time-locked on chain.
//!
//! The planner is not reentrant; the `consumed_inputs` / `provided_outputs`
//! strings are an optimistic-concurrency token the caller must round-trip
//! between drafts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;

use tracing::debug;

use bitpeg_chain::transaction::{self, Transaction};
use bitpeg_chain::transparent::{Address, FractionKey, Input, OutPoint, Output, Script};
use bitpeg_chain::{
    Fractions, PegDeserialize, PegLevel, PegSerialize, SerializationError,
    PEG_MAKETX_FREEZE_VALUE,
};
use bitpeg_consensus::{calculate_standard_fractions, PegContext};
use bitpeg_state::{MempoolFractions, PegStore};

use crate::error::PegOpsError;
use crate::pegops::{pack_peg_data, unpack_balance, Balance};

/// The planner's flat draft fee, in base units.
pub const WITHDRAW_FEE: i64 = 1_000_000;

/// An unspent output the wallet offers for selection.
#[derive(Clone, Debug)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub value: i64,
    pub lock_script: Script,
}

/// The wallet collaborator: enumerate spendable outputs.
pub trait CoinSource {
    fn available_coins(&self) -> Vec<WalletCoin>;
}

/// The signing collaborator: authorize one input of the draft.
pub trait InputSigner {
    fn sign_input(&self, tx: &mut Transaction, index: usize, prev_script: &Script) -> bool;
}

/// Everything the planner reads from the node, gathered under the chain
/// lock by the caller.
pub struct ChainView<'a> {
    pub store: &'a PegStore,
    pub mempool: &'a MempoolFractions,
    pub coins: &'a dyn CoinSource,
    pub signer: &'a dyn InputSigner,
    pub ctx: &'a PegContext,
    pub best_height: u32,
    pub best_time: u32,
    pub supply_now: usize,
    pub supply_next: usize,
    pub supply_next_next: usize,
    /// The flat draft fee; [`WITHDRAW_FEE`] on the production path.
    pub fee: i64,
}

/// A withdrawal request, all balance parameters as round-tripped blobs.
pub struct WithdrawRequest {
    pub balance: String,
    pub exchange: String,
    pub pegshift: String,
    pub amount_with_fee: i64,
    pub address: String,
    pub level_hex: String,
    pub consumed_inputs: String,
    pub provided_outputs: String,
}

/// The draft transaction plus every updated round-trip string.
pub struct WithdrawReceipt {
    pub txhash: String,
    pub rawtx: String,
    pub consumed_inputs: String,
    pub provided_outputs: String,
    pub created_on_peg: usize,
    pub broadcast_on_peg: usize,
    pub balance: String,
    pub processed: String,
    pub exchange: String,
    pub pegshift: String,
    /// Change outpoints as `txhash:index` with their values.
    pub changes: Vec<(String, i64)>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PegSide {
    Liquid,
    Reserve,
}

/// A candidate coin as round-tripped through the provided-outputs string;
/// records from other cycles are ignored on parse.
#[derive(Clone, Debug)]
struct CoinToUse {
    txhash: transaction::Hash,
    index: u64,
    value: i64,
    lock_script: Script,
    cycle: u32,
}

impl CoinToUse {
    fn outpoint(&self) -> OutPoint {
        OutPoint {
            hash: self.txhash,
            index: self.index as u32,
        }
    }

    fn fraction_key(&self) -> FractionKey {
        self.outpoint().fraction_key()
    }
}

impl PegSerialize for CoinToUse {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.txhash.0.peg_serialize(&mut writer)?;
        self.index.peg_serialize(&mut writer)?;
        self.value.peg_serialize(&mut writer)?;
        self.lock_script.peg_serialize(&mut writer)?;
        self.cycle.peg_serialize(&mut writer)?;
        Ok(())
    }
}

impl PegDeserialize for CoinToUse {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CoinToUse {
            txhash: transaction::Hash(<[u8; 32]>::peg_deserialize(&mut reader)?),
            index: u64::peg_deserialize(&mut reader)?,
            value: i64::peg_deserialize(&mut reader)?,
            lock_script: Script::peg_deserialize(&mut reader)?,
            cycle: u32::peg_deserialize(&mut reader)?,
        })
    }
}

/// Plan a withdrawal paid from the balance's liquid side.
pub fn prepare_liquid_withdraw(
    view: &ChainView<'_>,
    request: &WithdrawRequest,
) -> Result<WithdrawReceipt, PegOpsError> {
    prepare_withdraw(view, request, PegSide::Liquid)
}

/// Plan a withdrawal paid from the balance's reserve side, freezing the paid
/// reserve on chain via notary outputs.
pub fn prepare_reserve_withdraw(
    view: &ChainView<'_>,
    request: &WithdrawRequest,
) -> Result<WithdrawReceipt, PegOpsError> {
    prepare_withdraw(view, request, PegSide::Reserve)
}

fn parse_consumed(consumed: &str) -> BTreeSet<FractionKey> {
    consumed
        .split(',')
        .filter_map(|entry| FractionKey::from_hex(entry).ok())
        .collect()
}

fn parse_provided(
    provided: &str,
    cycle_now: u32,
    consumed: &BTreeSet<FractionKey>,
    all_outputs: &mut BTreeSet<FractionKey>,
) -> BTreeMap<FractionKey, CoinToUse> {
    let mut map = BTreeMap::new();
    for entry in provided.split(',') {
        let bytes = match hex::decode(entry) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let coin = match CoinToUse::peg_deserialize(&bytes[..]) {
            Ok(coin) => coin,
            Err(_) => continue,
        };
        if coin.cycle != cycle_now {
            continue;
        }
        let key = coin.fraction_key();
        if consumed.contains(&key) {
            continue;
        }
        all_outputs.insert(key);
        map.insert(key, coin);
    }
    map
}

fn join_consumed(consumed: &BTreeSet<FractionKey>) -> String {
    consumed
        .iter()
        .map(FractionKey::to_hex)
        .collect::<Vec<_>>()
        .join(",")
}

/// Stored fractions for an output, with the mempool as a read-through
/// overlay for in-flight drafts.
fn lookup_fractions(
    store: &PegStore,
    mempool: &MempoolFractions,
    key: &FractionKey,
) -> Option<Fractions> {
    match store.read(key) {
        Ok(Some(fractions)) => Some(fractions),
        _ => mempool.lookup(&key.outpoint()),
    }
}

/// Change and payee outputs of the draft become candidate coins for the next
/// draft; notary outputs and the withdrawn payment itself do not.
fn collect_provided(
    tx: &Transaction,
    withdraw_address: &str,
    cycle_now: u32,
    ctx: &PegContext,
    provided: &mut Vec<String>,
) {
    for (i, out) in tx.outputs.iter().enumerate() {
        if out.lock_script.is_notary() {
            continue;
        }
        if out.lock_script.pool_key(ctx.params.network) == withdraw_address {
            continue;
        }
        let coin = CoinToUse {
            txhash: tx.hash(),
            index: i as u64,
            value: out.value,
            lock_script: out.lock_script.clone(),
            cycle: cycle_now,
        };
        provided.push(hex::encode(
            coin.peg_serialize_to_vec()
                .expect("coin records always serialize"),
        ));
    }
}

fn consume_pegshift(
    fr_balance: &mut Fractions,
    fr_exchange: &mut Fractions,
    fr_pegshift: &mut Fractions,
    consume_input: &Fractions,
) {
    let positive = consume_input.positive();
    let negative = consume_input.negative();

    // The negative half can only be consumed where the balance has funds to
    // absorb it, and no more than the positive half can match.
    let mut negative_consume = &negative & &(-&*fr_balance);
    let mut negative_total = negative_consume.total();
    let positive_total = positive.total();
    if -negative_total > positive_total {
        let scaled = (-&negative_consume).ratio_part(positive_total);
        negative_consume = -&scaled;
        negative_total = negative_consume.total();
    }
    let positive_consume = positive.ratio_part(-negative_total);
    let consume = &negative_consume + &positive_consume;

    *fr_balance += &consume;
    *fr_exchange += &consume;
    *fr_pegshift -= &consume;
}

fn check_pegshift_balanced(fr_pegshift: &Fractions) -> Result<(), PegOpsError> {
    let positive = fr_pegshift.positive().total();
    let negative = fr_pegshift.negative().total();
    if positive != -negative {
        return Err(PegOpsError::PegShiftUnbalanced { positive, negative });
    }
    Ok(())
}

fn prepare_withdraw(
    view: &ChainView<'_>,
    request: &WithdrawRequest,
    side: PegSide,
) -> Result<WithdrawReceipt, PegOpsError> {
    let ctx = view.ctx;
    let network = ctx.params.network;
    let amount_with_fee = request.amount_with_fee;

    let withdraw_address: Address = request
        .address
        .parse()
        .map_err(|_| PegOpsError::BadAddress)?;

    let level_exchange =
        PegLevel::from_hex(&request.level_hex).map_err(|_| PegOpsError::LevelInvalid)?;
    if !level_exchange.is_valid() {
        return Err(PegOpsError::LevelInvalid);
    }

    let cycle_now = ctx.params.peg_cycle(view.best_height);
    let level_net = PegLevel::new(
        cycle_now,
        cycle_now.saturating_sub(1),
        view.supply_now as u16,
        view.supply_next as u16,
        view.supply_next_next as u16,
    );

    let balance: Balance = unpack_balance(&request.balance, "balance")?;
    let exchange = unpack_balance(&request.exchange, "exchange")?;
    let pegshift = unpack_balance(&request.pegshift, "pegshift")?;

    if !request.balance.is_empty() && balance.level.cycle != level_exchange.cycle {
        return Err(PegOpsError::CycleMismatch {
            tag: "balance",
            have: balance.level.cycle,
            want: level_exchange.cycle,
        });
    }

    let mut fr_balance = balance.fractions.std();
    let mut fr_exchange = exchange.fractions.std();
    let mut fr_pegshift = pegshift.fractions.std();

    // The target shape: the requested amount carved proportionally out of
    // the side being withdrawn.
    let fr_side = match side {
        PegSide::Liquid => fr_balance.high_part_level(&level_exchange),
        PegSide::Reserve => fr_balance.low_part(level_exchange.supply_next as usize),
    };
    let side_available = fr_side.total();
    if amount_with_fee > side_available {
        return Err(match side {
            PegSide::Liquid => PegOpsError::NotEnoughLiquid {
                have: side_available,
                need: amount_with_fee,
            },
            PegSide::Reserve => PegOpsError::NotEnoughReserve {
                have: side_available,
                need: amount_with_fee,
            },
        });
    }
    let fr_amount = fr_side.ratio_part(amount_with_fee);

    // Candidate coins: the wallet's outputs minus what earlier drafts
    // consumed, plus the still-in-flight outputs earlier drafts provided.
    let mut consumed = parse_consumed(&request.consumed_inputs);
    let mut all_outputs: BTreeSet<FractionKey> = BTreeSet::new();
    let mut provided = parse_provided(
        &request.provided_outputs,
        cycle_now,
        &consumed,
        &mut all_outputs,
    );

    let mut candidates: BTreeMap<FractionKey, CoinToUse> = provided.clone();
    let mut wallet_outputs: BTreeSet<FractionKey> = BTreeSet::new();

    for coin in view.coins.available_coins() {
        let key = coin.outpoint.fraction_key();
        all_outputs.insert(key);
        wallet_outputs.insert(key);
        if consumed.contains(&key) {
            continue;
        }
        candidates.insert(
            key,
            CoinToUse {
                txhash: coin.outpoint.hash,
                index: coin.outpoint.index as u64,
                value: coin.value,
                lock_script: coin.lock_script,
                cycle: cycle_now,
            },
        );
    }

    // Consumed entries that no longer correspond to any output are stale.
    consumed = consumed.intersection(&all_outputs).copied().collect();
    // Provided entries the wallet already sees are redundant.
    provided.retain(|key, _| !wallet_outputs.contains(key));

    // Rate candidates by distortion against the target shape. Coins whose
    // usable value is under 5% of the amount are skipped to bound the input
    // count.
    let mut rated: Vec<(f64, CoinToUse, i64)> = Vec::new();
    for (key, coin) in &candidates {
        let fractions = match lookup_fractions(view.store, view.mempool, key) {
            Some(fractions) => fractions,
            None => continue,
        };
        let usable = match side {
            PegSide::Liquid => fractions.high_part(view.supply_next),
            PegSide::Reserve => fractions.low_part(view.supply_next),
        };
        let usable_value = usable.total();
        if usable_value < amount_with_fee / 20 {
            continue;
        }
        rated.push((usable.distortion(&fr_amount), coin.clone(), usable_value));
    }
    rated.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("distortions are finite"));

    let mut selected: Vec<(CoinToUse, i64)> = Vec::new();
    let mut left_amount = amount_with_fee;
    for (_, coin, usable_value) in rated {
        left_amount -= usable_value;
        selected.push((coin, usable_value));
        if left_amount <= 0 {
            break;
        }
    }
    if left_amount > 0 {
        return Err(PegOpsError::CoinsTooFragmented {
            need: amount_with_fee,
        });
    }

    let fee = view.fee;
    let amount = amount_with_fee - fee;
    let payee_script = withdraw_address.to_script();
    let vec_send: Vec<(Script, i64)> = vec![(payee_script, amount)];
    let send_total: i64 = vec_send.iter().map(|(_, value)| value).sum();

    // Inputs sorted by address for deterministic notary references.
    selected.sort_by(|a, b| {
        a.0.lock_script
            .pool_key(network)
            .cmp(&b.0.lock_script.pool_key(network))
            .then(a.0.fraction_key().cmp(&b.0.fraction_key()))
    });
    let n_coins = selected.len();

    // Per-address value bookkeeping over the selected coins.
    let mut available_at: BTreeMap<String, i64> = BTreeMap::new();
    let mut input_at: BTreeMap<String, i64> = BTreeMap::new();
    let mut take_at: BTreeMap<String, i64> = BTreeMap::new();
    let mut script_at: BTreeMap<String, Script> = BTreeMap::new();
    for (coin, usable_value) in &selected {
        let address = match coin.lock_script.destination(network) {
            Some(address) => address.to_string(),
            None => continue,
        };
        *available_at.entry(address.clone()).or_insert(0) += usable_value;
        *input_at.entry(address.clone()).or_insert(0) += coin.value;
        take_at.entry(address.clone()).or_insert(0);
        script_at.insert(address, coin.lock_script.clone());
    }
    let input_addresses: Vec<String> = input_at.keys().cloned().collect();

    let mut outputs: Vec<Output> = Vec::new();
    let mut value_from_change: i64 = 0;

    if side == PegSide::Reserve {
        // One freeze notary per input. All of them list every reserve payee,
        // padded so notary parsing always sees a shared multi-target freeze.
        let n_payees = vec_send.len();
        let out_indexes = if n_payees == 1 {
            let index = (n_coins).to_string();
            format!("{}:{}:{}", index, index, index)
        } else if n_payees == 2 {
            let index1 = (n_coins).to_string();
            let index2 = (n_coins + 1).to_string();
            format!("{}:{}:{}:{}", index1, index1, index2, index2)
        } else {
            (0..n_payees)
                .map(|i| (i + n_coins).to_string())
                .collect::<Vec<_>>()
                .join(":")
        };
        for _ in 0..n_coins {
            outputs.push(Output {
                value: PEG_MAKETX_FREEZE_VALUE,
                lock_script: Script::notary(&format!("**F**{}", out_indexes)),
            });
        }

        // Notary dust is paid from reserves in address order.
        let mut value_left = n_coins as i64 * PEG_MAKETX_FREEZE_VALUE;
        for address in &input_addresses {
            let available = available_at[address];
            if available == 0 {
                continue;
            }
            let taken = take_at.get_mut(address).expect("all addresses seeded");
            let left_here = available - *taken;
            let to_take = value_left.min(left_here);
            *taken += to_take;
            value_left -= to_take;
            if value_left == 0 {
                break;
            }
        }
        value_from_change += value_left;
    }

    for (script, value) in &vec_send {
        outputs.push(Output {
            value: *value,
            lock_script: script.clone(),
        });
    }

    match side {
        PegSide::Reserve => {
            // Reserve payees draw from the last input address first, the
            // referenced escrow, then the others in order.
            let mut freeze_order: Vec<String> = Vec::new();
            if let Some(last) = input_addresses.last() {
                freeze_order.push(last.clone());
                for address in &input_addresses {
                    if address != last {
                        freeze_order.push(address.clone());
                    }
                }
            }
            for (_, value) in &vec_send {
                let mut value_left = *value;
                for address in &freeze_order {
                    let available = available_at[address];
                    if available == 0 {
                        continue;
                    }
                    let taken = take_at.get_mut(address).expect("all addresses seeded");
                    let left_here = available - *taken;
                    let to_take = value_left.min(left_here);
                    *taken += to_take;
                    value_left -= to_take;
                    if value_left == 0 {
                        break;
                    }
                }
                value_from_change += value_left;
            }
        }
        PegSide::Liquid => {
            // Liquidity is common: each coin's usable value is taken until
            // the payees are covered.
            let mut value_left = send_total;
            for (coin, usable_value) in &selected {
                let address = match coin.lock_script.destination(network) {
                    Some(address) => address.to_string(),
                    None => continue,
                };
                let to_take = (*usable_value).min(value_left);
                *take_at.get_mut(&address).expect("all addresses seeded") += to_take;
                value_left -= to_take;
            }
        }
    }

    // Change per address, net of the fee and whatever the payees had to
    // borrow from change.
    let mut take_from_change_left = value_from_change + fee;
    for address in &input_addresses {
        let mut value_change = input_at[address] - take_at[address];
        if value_change > take_from_change_left {
            value_change -= take_from_change_left;
            take_from_change_left = 0;
        } else {
            take_from_change_left -= value_change;
            value_change = 0;
        }
        if value_change == 0 {
            continue;
        }
        outputs.push(Output {
            value: value_change,
            lock_script: script_at[address].clone(),
        });
    }

    let inputs: Vec<Input> = selected
        .iter()
        .map(|(coin, _)| Input::PrevOut {
            outpoint: coin.outpoint(),
            unlock_script: Script::default(),
            sequence: u32::MAX,
        })
        .collect();

    let mut tx = Transaction::new(1, view.best_time, inputs, outputs, 0);

    // Run the standard engine at the supply index the transaction will
    // confirm under.
    let mut prev_outs: HashMap<OutPoint, Output> = HashMap::new();
    let mut input_fractions: HashMap<OutPoint, Fractions> = HashMap::new();
    for (coin, _) in &selected {
        let outpoint = coin.outpoint();
        prev_outs.insert(
            outpoint,
            Output {
                value: coin.value,
                lock_script: coin.lock_script.clone(),
            },
        );
        let fractions = lookup_fractions(view.store, view.mempool, &coin.fraction_key())
            .unwrap_or_else(|| Fractions::value(coin.value));
        input_fractions.insert(outpoint, fractions);
    }

    let computed = calculate_standard_fractions(
        &tx,
        view.supply_next,
        view.best_time,
        &prev_outs,
        &input_fractions,
        ctx,
    )?
    .ok_or(PegOpsError::NoWithdrawFractions)?;

    let withdraw_index = match side {
        PegSide::Liquid => 0,
        PegSide::Reserve => n_coins,
    };
    let fr_withdraw = computed
        .outputs
        .get(withdraw_index)
        .cloned()
        .ok_or(PegOpsError::NoWithdrawFractions)?;

    for index in 0..tx.inputs.len() {
        let prev_script = selected[index].0.lock_script.clone();
        if !view.signer.sign_input(&mut tx, index, &prev_script) {
            return Err(PegOpsError::SignFailed { input: index });
        }
    }

    let mut fr_processed = fr_withdraw;
    fr_processed += &computed.fee;
    let fr_requested = fr_amount;

    if fr_requested.total() != amount_with_fee {
        return Err(PegOpsError::RequestedMismatch {
            requested: fr_requested.total(),
            amount: amount_with_fee,
        });
    }
    if fr_processed.total() != amount_with_fee {
        return Err(PegOpsError::ProcessedMismatch {
            processed: fr_processed.total(),
            amount: amount_with_fee,
        });
    }

    // The draft's inputs are consumed from now on.
    for (coin, _) in &selected {
        let key = coin.fraction_key();
        provided.remove(&key);
        consumed.insert(key);
    }

    let txhash = tx.hash();
    let tx_hex = hex::encode(
        tx.peg_serialize_to_vec()
            .expect("transactions always serialize"),
    );

    // Change fractions go to the store so the next draft can chain on them
    // before block inclusion.
    let change_start = match side {
        PegSide::Liquid => 1,
        PegSide::Reserve => n_coins + 1,
    };
    let mut changes: Vec<(String, i64)> = Vec::new();
    for index in change_start..tx.outputs.len() {
        let outpoint = OutPoint {
            hash: txhash,
            index: index as u32,
        };
        changes.push((
            format!("{}:{}", txhash, index),
            tx.outputs[index].value,
        ));
        view.store
            .write(&outpoint.fraction_key(), &computed.outputs[index])?;
    }

    let mut provided_strings: Vec<String> = provided
        .values()
        .map(|coin| {
            hex::encode(
                coin.peg_serialize_to_vec()
                    .expect("coin records always serialize"),
            )
        })
        .collect();
    collect_provided(
        &tx,
        &withdraw_address.to_string(),
        cycle_now,
        ctx,
        &mut provided_strings,
    );

    // Book the withdrawal and rebalance the pegshift on the side just used.
    fr_balance -= &fr_requested;
    fr_exchange -= &fr_requested;
    let mut shift_delta = fr_requested.clone();
    shift_delta -= &fr_processed;
    fr_pegshift += &shift_delta;

    let consume_input = match side {
        PegSide::Liquid => fr_pegshift.high_part_level(&level_exchange),
        PegSide::Reserve => fr_pegshift.low_part_level(&level_exchange),
    };
    consume_pegshift(
        &mut fr_balance,
        &mut fr_exchange,
        &mut fr_pegshift,
        &consume_input,
    );
    check_pegshift_balanced(&fr_pegshift)?;

    let is_reserve = side == PegSide::Reserve;
    debug!(
        %txhash,
        inputs = n_coins,
        amount = amount_with_fee,
        reserve = is_reserve,
        "withdrawal drafted"
    );

    Ok(WithdrawReceipt {
        txhash: txhash.to_string(),
        rawtx: tx_hex,
        consumed_inputs: join_consumed(&consumed),
        provided_outputs: provided_strings.join(","),
        created_on_peg: view.supply_now,
        broadcast_on_peg: view.supply_next,
        balance: pack_peg_data(&fr_balance, &level_exchange),
        processed: pack_peg_data(&fr_processed, &level_exchange),
        exchange: pack_peg_data(&fr_exchange, &level_exchange),
        pegshift: pack_peg_data(&fr_pegshift, &level_net),
        changes,
    })
}
