use super::*;
use bitpeg_chain::PEG_SIZE;

fn uniform(value: i64) -> Fractions {
    let mut fractions = Fractions::zero_std();
    for i in 0..PEG_SIZE {
        fractions[i] = value;
    }
    fractions
}

#[test]
fn balance_blob_roundtrip() {
    let level = PegLevel::new(4, 3, 100, 101, 102);
    let fractions = uniform(23);
    let blob = pack_peg_data(&fractions, &level);

    let balance = unpack_balance(&blob, "test").expect("blob decodes");
    assert_eq!(balance.level, level);
    assert_eq!(balance.reserve, 23 * 100);
    assert_eq!(balance.liquid, 23 * (PEG_SIZE as i64 - 100));
    assert_eq!(balance.reserve + balance.liquid, balance.fractions.total());
}

#[test]
fn legacy_blob_without_scalars_still_decodes() {
    let level = PegLevel::new(4, 3, 100, 101, 102);
    let fractions = uniform(23);

    let mut bytes = Vec::new();
    fractions.peg_serialize(&mut bytes).expect("pack");
    level.peg_serialize(&mut bytes).expect("pack");
    let blob = base64::encode(&bytes);

    let balance = unpack_balance(&blob, "legacy").expect("legacy blob decodes");
    assert_eq!(balance.reserve, 23 * 100);
    assert_eq!(balance.liquid, fractions.total() - 23 * 100);
}

#[test]
fn get_peg_level_builds_pool_from_liquid_side() {
    let exchange = pack_peg_data(&uniform(23), &PegLevel::new(1, 0, 3, 3, 3));
    let (level_hex, pool_blob) =
        get_peg_level(&exchange, "", 1, 0, 3, 3, 3, 0).expect("level derives");

    let level = get_peg_level_info(&level_hex).expect("level hex is valid");
    assert_eq!(level.cycle, 1);
    assert_eq!(level.supply, 3);
    assert_eq!(level.shift, 0);

    let pool = unpack_balance(&pool_blob, "pegpool").expect("pool decodes");
    assert_eq!(pool.fractions.total(), 23 * (PEG_SIZE as i64 - 3));
    assert_eq!(pool.reserve, 0);
}

#[test]
fn get_peg_level_applies_broadcast_offset() {
    let exchange = pack_peg_data(&uniform(23), &PegLevel::new(1, 0, 3, 3, 3));
    let (level_hex, _) = get_peg_level(&exchange, "", 1, 0, 3, 4, 5, 3).expect("level derives");
    let level = get_peg_level_info(&level_hex).expect("level hex is valid");
    assert_eq!(level.supply, 6);
    assert_eq!(level.supply_next, 7);
    assert_eq!(level.supply_next_next, 8);
}

#[test]
fn update_rolls_balance_into_next_cycle() {
    // Cycle 1 at supply 3, then cycle 2 at supply 13.
    let exchange_fr = uniform(23);
    let level1 = PegLevel::new(1, 0, 3, 3, 3);
    let balance1 = pack_peg_data(&exchange_fr, &level1);
    let exchange1 = balance1.clone();

    let (level2_hex, pool2) =
        get_peg_level(&exchange1, "", 2, 1, 13, 13, 13, 0).expect("level derives");

    let updated = update_peg_balances(&balance1, &pool2, &level2_hex).expect("update succeeds");

    let balance = unpack_balance(&updated.balance, "balance").expect("decodes");
    // Total preserved, reserve is exactly the low part at the new level.
    assert_eq!(balance.fractions.total(), exchange_fr.total());
    assert_eq!(balance.reserve, exchange_fr.low(13));
    assert_eq!(balance.liquid, exchange_fr.high(13));

    // The single balance drains the pool completely.
    let pool = unpack_balance(&updated.pegpool, "pegpool").expect("decodes");
    assert_eq!(pool.fractions.total(), 0);
}

#[test]
fn update_is_noop_within_same_cycle() {
    let fractions = uniform(23);
    let level = PegLevel::new(2, 1, 13, 13, 13);
    let balance = pack_peg_data(&fractions, &level);
    let pool = pack_peg_balance(&Fractions::zero_std(), &level, 0, 0);

    let updated =
        update_peg_balances(&balance, &pool, &level.to_hex()).expect("noop update succeeds");
    assert_eq!(updated.balance, balance);
    assert_eq!(updated.pegpool, pool);
}

#[test]
fn update_rejects_backwards_cycle() {
    let fractions = uniform(23);
    let balance = pack_peg_data(&fractions, &PegLevel::new(3, 2, 13, 13, 13));
    let level2 = PegLevel::new(2, 1, 13, 13, 13);
    let pool = pack_peg_balance(&fractions, &level2, 0, fractions.total());

    let err = update_peg_balances(&balance, &pool, &level2.to_hex())
        .expect_err("going backwards is invalid");
    assert!(matches!(err, PegOpsError::Outdated { tag: "balance", .. }));
}

#[test]
fn update_requires_sequential_cycles() {
    let fractions = uniform(23);
    let balance = pack_peg_data(&fractions, &PegLevel::new(1, 0, 13, 13, 13));
    // Cycle jumps 1 -> 4 with prev 3: not sequential.
    let level4 = PegLevel::new(4, 3, 13, 13, 13);
    let pool = pack_peg_balance(&fractions, &level4, 0, fractions.total());

    let err = update_peg_balances(&balance, &pool, &level4.to_hex())
        .expect_err("cycle gap is invalid");
    assert!(matches!(err, PegOpsError::NotSequential { .. }));
}

#[test]
fn update_fails_on_short_pool() {
    let fractions = uniform(23);
    let balance = pack_peg_data(&fractions, &PegLevel::new(1, 0, 3, 3, 3));
    let level2 = PegLevel::new(2, 1, 13, 13, 13);
    // A pool with almost nothing in it.
    let pool = pack_peg_balance(&Fractions::std_of(10), &level2, 0, 10);

    let err = update_peg_balances(&balance, &pool, &level2.to_hex())
        .expect_err("pool cannot cover the liquid");
    assert!(matches!(err, PegOpsError::PoolShort { .. }));
}

#[test]
fn move_coins_conserves_totals() {
    let level = PegLevel::new(2, 1, 13, 13, 13);
    let src = pack_peg_data(&uniform(23), &level);

    let (src2, dst2) = move_coins(6_000, &src, "", &level.to_hex(), false).expect("move succeeds");

    let src_balance = unpack_balance(&src2, "src").expect("decodes");
    let dst_balance = unpack_balance(&dst2, "dst").expect("decodes");

    assert_eq!(dst_balance.fractions.total(), 6_000);
    assert_eq!(
        src_balance.fractions.total() + dst_balance.fractions.total(),
        23 * PEG_SIZE as i64
    );
    assert!(src_balance.fractions.is_positive());
}

#[test]
fn move_coins_rejects_overdraw() {
    let level = PegLevel::new(2, 1, 13, 13, 13);
    let src = pack_peg_data(&uniform(1), &level);

    let err = move_coins(PEG_SIZE as i64 + 1, &src, "", &level.to_hex(), false)
        .expect_err("overdraw is invalid");
    assert!(matches!(err, PegOpsError::NotEnoughCoins { .. }));
}

#[test]
fn move_liquid_takes_only_liquid_buckets() {
    let level = PegLevel::new(2, 1, 100, 100, 100);
    let src = pack_peg_data(&uniform(10), &level);

    let (src2, dst2) =
        move_liquid(500, &src, "", &level.to_hex()).expect("move succeeds");

    let src_balance = unpack_balance(&src2, "src").expect("decodes");
    let dst_balance = unpack_balance(&dst2, "dst").expect("decodes");

    // Reserve buckets of src are untouched.
    assert_eq!(src_balance.fractions.low(100), 10 * 100);
    assert_eq!(dst_balance.fractions.low(100), 0);
    assert_eq!(dst_balance.fractions.total(), 500);
    assert_eq!(src_balance.liquid, 10 * (PEG_SIZE as i64 - 100) - 500);
    assert_eq!(dst_balance.liquid, 500);
}

#[test]
fn move_liquid_rejects_overdraw() {
    let level = PegLevel::new(2, 1, 1100, 1100, 1100);
    let src = pack_peg_data(&uniform(1), &level);

    let err = move_liquid(200, &src, "", &level.to_hex()).expect_err("overdraw is invalid");
    assert!(matches!(err, PegOpsError::NotEnoughLiquid { .. }));
}

#[test]
fn move_reserve_takes_only_reserve_buckets() {
    let level = PegLevel::new(2, 1, 100, 100, 100);
    let src = pack_peg_data(&uniform(10), &level);

    let (src2, dst2) =
        move_reserve(300, &src, "", &level.to_hex()).expect("move succeeds");

    let src_balance = unpack_balance(&src2, "src").expect("decodes");
    let dst_balance = unpack_balance(&dst2, "dst").expect("decodes");

    assert_eq!(src_balance.fractions.high(100), 10 * (PEG_SIZE as i64 - 100));
    assert_eq!(dst_balance.fractions.high(100), 0);
    assert_eq!(dst_balance.fractions.total(), 300);
    assert_eq!(src_balance.reserve, 10 * 100 - 300);
    assert_eq!(dst_balance.reserve, 300);
}

#[test]
fn move_rejects_level_mismatch() {
    let level = PegLevel::new(2, 1, 100, 100, 100);
    let other = PegLevel::new(3, 2, 100, 100, 100);
    let src = pack_peg_data(&uniform(10), &other);

    let err = move_liquid(10, &src, "", &level.to_hex()).expect_err("level mismatch is invalid");
    assert!(matches!(err, PegOpsError::Outdated { tag: "src", .. }));
}

#[test]
fn remove_coins_subtracts_bucket_wise() {
    let level = PegLevel::new(2, 1, 100, 100, 100);
    let whole = pack_peg_data(&uniform(10), &level);
    let part = pack_peg_data(&uniform(4), &level);

    let rest_blob = remove_coins(&whole, &part).expect("subtract succeeds");
    let rest = unpack_balance(&rest_blob, "rest").expect("decodes");

    assert_eq!(rest.fractions.total(), 6 * PEG_SIZE as i64);
    assert_eq!(rest.reserve, 6 * 100);
    assert_eq!(rest.liquid, 6 * (PEG_SIZE as i64 - 100));
}
