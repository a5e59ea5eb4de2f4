//! End-to-end withdrawal drafts against a real (temporary) fraction store.

use std::collections::HashMap;
use std::sync::Mutex;

use tempdir::TempDir;

use bitpeg_chain::transaction::{self, Transaction};
use bitpeg_chain::transparent::{Address, Input, OutPoint, Output, Script};
use bitpeg_chain::{
    Fractions, Network, PegDeserializeInto, PegLevel, PegParams,
};
use bitpeg_consensus::PegContext;
use bitpeg_state::{Config, MempoolFractions, PegStore};
use bitpeg_exchange::{
    pack_peg_data, prepare_liquid_withdraw, prepare_reserve_withdraw, unpack_balance, ChainView,
    CoinSource, InputSigner, WalletCoin, WithdrawRequest,
};

struct TestWallet {
    coins: Vec<WalletCoin>,
}

impl CoinSource for TestWallet {
    fn available_coins(&self) -> Vec<WalletCoin> {
        self.coins.clone()
    }
}

struct TestSigner {
    signed: Mutex<usize>,
}

impl InputSigner for TestSigner {
    fn sign_input(&self, tx: &mut Transaction, index: usize, _prev_script: &Script) -> bool {
        if let Input::PrevOut { unlock_script, .. } = &mut tx.inputs[index] {
            *unlock_script = Script(vec![0xaa]);
        }
        *self.signed.lock().unwrap() += 1;
        true
    }
}

fn address(tag: u8) -> Address {
    Address::PayToPublicKeyHash {
        network: Network::Mainnet,
        pub_key_hash: [tag; 20],
    }
}

fn outpoint(tag: u8) -> OutPoint {
    OutPoint {
        hash: transaction::Hash([tag; 32]),
        index: 0,
    }
}

/// A 10 M coin with 4 M below and 6 M above the supply boundary at 600.
fn wallet_fractions() -> Fractions {
    let mut fractions = Fractions::zero_std();
    fractions[0] = 4_000_000;
    fractions[700] = 6_000_000;
    fractions
}

struct Harness {
    _dir: TempDir,
    store: PegStore,
    mempool: MempoolFractions,
    wallet: TestWallet,
    signer: TestSigner,
    ctx: PegContext,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new("bitpeg-withdraw-test").expect("temp dir");
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            ephemeral: true,
        };
        let store = PegStore::new(&config, Network::Mainnet).expect("open store");

        let mut coins = Vec::new();
        for tag in 1..=2u8 {
            let op = outpoint(tag);
            let fractions = wallet_fractions();
            store.write(&op.fraction_key(), &fractions).expect("seed");
            coins.push(WalletCoin {
                outpoint: op,
                value: fractions.total(),
                lock_script: address(tag).to_script(),
            });
        }

        Harness {
            _dir: dir,
            store,
            mempool: MempoolFractions::new(),
            wallet: TestWallet { coins },
            signer: TestSigner {
                signed: Mutex::new(0),
            },
            ctx: PegContext::new(PegParams::mainnet()),
        }
    }

    fn view(&self) -> ChainView<'_> {
        ChainView {
            store: &self.store,
            mempool: &self.mempool,
            coins: &self.wallet,
            signer: &self.signer,
            ctx: &self.ctx,
            best_height: 400,
            best_time: 1_600_000_000,
            supply_now: 600,
            supply_next: 600,
            supply_next_next: 600,
            fee: 1_000_000,
        }
    }
}

fn balance_blob(reserve: i64, liquid: i64, level: &PegLevel) -> String {
    let mut fractions = Fractions::zero_std();
    fractions[0] = reserve;
    fractions[700] = liquid;
    pack_peg_data(&fractions, level)
}

#[test]
fn liquid_withdraw_selects_greedily_and_balances() {
    let harness = Harness::new();
    let view = harness.view();
    let level = PegLevel::new(2, 1, 600, 600, 600);

    let balance = balance_blob(5_000_000, 20_000_000, &level);
    let request = WithdrawRequest {
        balance: balance.clone(),
        exchange: balance,
        pegshift: String::new(),
        amount_with_fee: 7_000_000,
        address: address(9).to_string(),
        level_hex: level.to_hex(),
        consumed_inputs: String::new(),
        provided_outputs: String::new(),
    };

    let receipt = prepare_liquid_withdraw(&view, &request).expect("draft succeeds");

    // Each coin offers 6 M liquid against the 7 M request: both selected.
    let tx: Transaction = (&hex::decode(&receipt.rawtx).expect("rawtx is hex")[..])
        .peg_deserialize_into()
        .expect("rawtx decodes");
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(*harness.signer.signed.lock().unwrap(), 2);

    // Payee first, no notaries on the liquid path.
    assert_eq!(tx.outputs[0].value, 6_000_000);
    assert!(tx.outputs.iter().all(|out| !out.lock_script.is_notary()));

    // Value conservation across the draft.
    let outputs_total: i64 = tx.outputs.iter().map(|out| out.value).sum();
    assert_eq!(outputs_total, 20_000_000 - 1_000_000);

    // The processed fractions carry exactly the amount with fee.
    let processed = unpack_balance(&receipt.processed, "processed").expect("decodes");
    assert_eq!(processed.fractions.total(), 7_000_000);

    // Book-keeping: balance shrank by the withdrawal.
    let new_balance = unpack_balance(&receipt.balance, "balance").expect("decodes");
    assert_eq!(new_balance.fractions.total(), 25_000_000 - 7_000_000);

    // The pegshift halves cancel.
    let pegshift = unpack_balance(&receipt.pegshift, "pegshift").expect("decodes");
    assert_eq!(
        pegshift.fractions.positive().total(),
        -pegshift.fractions.negative().total()
    );

    // Both inputs are consumed and the change is provided for future drafts.
    assert_eq!(receipt.consumed_inputs.split(',').count(), 2);
    assert!(!receipt.provided_outputs.is_empty());

    // Change fractions were persisted so the next draft can chain.
    for (txout, value) in &receipt.changes {
        let mut parts = txout.split(':');
        let hash = parts.next().expect("hash part");
        let index: u32 = parts.next().expect("index part").parse().expect("index");
        assert_eq!(hash, receipt.txhash);

        let change_outpoint = OutPoint {
            hash: tx.hash(),
            index,
        };
        let stored = harness
            .store
            .read(&change_outpoint.fraction_key())
            .expect("read")
            .expect("change fractions persisted");
        assert_eq!(stored.total(), *value);
    }
}

#[test]
fn liquid_withdraw_rejects_overdraw() {
    let harness = Harness::new();
    let view = harness.view();
    let level = PegLevel::new(2, 1, 600, 600, 600);

    let balance = balance_blob(5_000_000, 6_000_000, &level);
    let request = WithdrawRequest {
        balance: balance.clone(),
        exchange: balance,
        pegshift: String::new(),
        amount_with_fee: 7_000_000,
        address: address(9).to_string(),
        level_hex: level.to_hex(),
        consumed_inputs: String::new(),
        provided_outputs: String::new(),
    };

    assert!(prepare_liquid_withdraw(&view, &request).is_err());
}

#[test]
fn reserve_withdraw_emits_freeze_notaries() {
    let harness = Harness::new();
    let view = harness.view();
    let level = PegLevel::new(2, 1, 600, 600, 600);

    let balance = balance_blob(9_000_000, 20_000_000, &level);
    let request = WithdrawRequest {
        balance: balance.clone(),
        exchange: balance,
        pegshift: String::new(),
        amount_with_fee: 7_000_000,
        address: address(9).to_string(),
        level_hex: level.to_hex(),
        consumed_inputs: String::new(),
        provided_outputs: String::new(),
    };

    let receipt = prepare_reserve_withdraw(&view, &request).expect("draft succeeds");

    let tx: Transaction = (&hex::decode(&receipt.rawtx).expect("rawtx is hex")[..])
        .peg_deserialize_into()
        .expect("rawtx decodes");

    // One freeze notary per input, then the payee.
    assert_eq!(tx.inputs.len(), 2);
    assert!(tx.outputs[0].lock_script.is_notary());
    assert!(tx.outputs[1].lock_script.is_notary());
    assert!(tx.outputs[0]
        .lock_script
        .notary_payload()
        .expect("payload")
        .starts_with("**F**"));
    assert_eq!(tx.outputs[2].value, 6_000_000);

    let processed = unpack_balance(&receipt.processed, "processed").expect("decodes");
    assert_eq!(processed.fractions.total(), 7_000_000);

    let pegshift = unpack_balance(&receipt.pegshift, "pegshift").expect("decodes");
    assert_eq!(
        pegshift.fractions.positive().total(),
        -pegshift.fractions.negative().total()
    );

    // Notary targets point at the payee output.
    let payload = tx.outputs[0].lock_script.notary_payload().expect("payload");
    assert_eq!(payload, "**F**2:2:2");
}

#[test]
fn cycle_mismatch_is_rejected() {
    let harness = Harness::new();
    let view = harness.view();
    let level = PegLevel::new(2, 1, 600, 600, 600);
    let stale = PegLevel::new(1, 0, 600, 600, 600);

    let balance = balance_blob(5_000_000, 20_000_000, &stale);
    let request = WithdrawRequest {
        balance: balance.clone(),
        exchange: balance,
        pegshift: String::new(),
        amount_with_fee: 7_000_000,
        address: address(9).to_string(),
        level_hex: level.to_hex(),
        consumed_inputs: String::new(),
        provided_outputs: String::new(),
    };

    assert!(prepare_liquid_withdraw(&view, &request).is_err());
}
