use super::super::*;
use crate::serialization::{PegDeserializeInto, PegSerialize};

fn uniform(value: i64) -> Fractions {
    let mut fractions = Fractions::zero_std();
    for i in 0..PEG_SIZE {
        fractions[i] = value;
    }
    fractions
}

#[test]
fn value_expansion_is_geometric() {
    let v = PEG_RATE * PEG_RATE * PEG_RATE;
    let fractions = Fractions::std_of(v);

    // First bucket takes 1/PEG_RATE of the whole, leaving
    // PEG_RATE^2 * (PEG_RATE - 1) for the tail.
    assert_eq!(fractions[0], PEG_RATE * PEG_RATE);
    assert_eq!(v - fractions[0], PEG_RATE * PEG_RATE * (PEG_RATE - 1));
    assert_eq!(fractions[1], (v - fractions[0]) / PEG_RATE);

    // Monotone non-increasing tail, sum preserved.
    for i in 1..PEG_SIZE {
        assert!(fractions[i] <= fractions[i - 1]);
    }
    assert_eq!(fractions.total(), v);
}

#[test]
fn expansion_is_idempotent() {
    let mut fractions = Fractions::std_of(123_456_789);
    let copy = fractions.clone();
    fractions.to_std();
    assert_eq!(fractions, copy);
}

#[test]
fn uniform_pack_roundtrip() {
    let fractions = uniform(23);
    assert_eq!(fractions.total(), 23 * PEG_SIZE as i64);

    let bytes = fractions.peg_serialize_to_vec().expect("pack");
    let unpacked: Fractions = (&bytes[..]).peg_deserialize_into().expect("unpack");
    assert!(unpacked.is_std());
    for i in 0..PEG_SIZE {
        assert_eq!(unpacked[i], 23);
    }
}

#[test]
fn value_form_packs_as_scalar() {
    let mut fractions = Fractions::value(777);
    fractions.marks = NotaryMarks::NOTARY_V;
    fractions.lock_time = 55;

    let bytes = fractions.peg_serialize_to_vec().expect("pack");
    // header + lock time + one i64
    assert_eq!(bytes.len(), 4 + 4 + 8);

    let unpacked: Fractions = (&bytes[..]).peg_deserialize_into().expect("unpack");
    assert!(unpacked.is_value());
    assert_eq!(unpacked.total(), 777);
    assert_eq!(unpacked.marks, NotaryMarks::NOTARY_V);
    assert_eq!(unpacked.lock_time, 55);
}

#[test]
fn unpack_rejects_overlong_zlen() {
    let fractions = Fractions::std_of(1_000_000);
    let mut bytes = fractions.peg_serialize_to_vec().expect("pack");
    // Corrupt the declared compressed length.
    bytes[8..12].copy_from_slice(&(u32::MAX).to_le_bytes());
    let result: Result<Fractions, _> = (&bytes[..]).peg_deserialize_into();
    assert!(result.is_err());
}

#[test]
fn unpack_rejects_garbled_deflate() {
    let fractions = Fractions::std_of(1_000_000);
    let mut bytes = fractions.peg_serialize_to_vec().expect("pack");
    for byte in bytes[12..].iter_mut() {
        *byte = 0xa5;
    }
    let result: Result<Fractions, _> = (&bytes[..]).peg_deserialize_into();
    assert!(result.is_err());
}

#[test]
fn low_high_partition_total() {
    let fractions = Fractions::std_of(987_654_321);
    for s in &[0usize, 1, 3, 599, 1198, 1199, PEG_SIZE] {
        assert_eq!(fractions.low(*s) + fractions.high(*s), fractions.total());
    }
}

#[test]
fn low_part_high_part_split() {
    let fractions = uniform(7);
    let low = fractions.low_part(100);
    let high = fractions.high_part(100);
    assert_eq!(low.total(), 700);
    assert_eq!(high.total(), 7 * (PEG_SIZE as i64 - 100));
    assert_eq!((&low + &high), fractions);
}

#[test]
fn ratio_part_boundaries() {
    let fractions = Fractions::std_of(1_000_000);
    let total = fractions.total();

    assert_eq!(fractions.ratio_part(0).total(), 0);
    assert_eq!(fractions.ratio_part(1).total(), 1);
    assert_eq!(fractions.ratio_part(total - 1).total(), total - 1);
    assert_eq!(fractions.ratio_part(total).total(), total);
}

#[test]
fn ratio_part_never_exceeds_source() {
    let fractions = Fractions::std_of(5_000_000);
    let part = fractions.ratio_part(1_234_567);
    for i in 0..PEG_SIZE {
        assert!(part[i] <= fractions.std()[i]);
        assert!(part[i] >= 0);
    }
    assert_eq!(part.total(), 1_234_567);
}

#[test]
fn ratio_part_shortfall_fills_from_first_nonzero_bucket() {
    let mut fractions = Fractions::zero_std();
    fractions[10] = 3;
    fractions[11] = 3;
    fractions[12] = 3;
    // 9 * 4 / 9 truncates to 1 per bucket, shortfall 1 goes to bucket 10.
    let part = fractions.ratio_part(4);
    assert_eq!(part[10], 2);
    assert_eq!(part[11], 1);
    assert_eq!(part[12], 1);
}

#[test]
fn move_ratio_part_moves_exactly() {
    let mut src = Fractions::std_of(60);
    let mut dst = Fractions::zero_std();
    let left = src.move_ratio_part_to(25, &mut dst);
    assert_eq!(left, 0);
    assert_eq!(dst.total(), 25);
    assert_eq!(src.total(), 35);
}

#[test]
fn move_ratio_part_reports_shortfall() {
    let mut src = Fractions::std_of(10);
    let mut dst = Fractions::zero_std();
    let left = src.move_ratio_part_to(25, &mut dst);
    assert_eq!(left, 15);
    assert_eq!(dst.total(), 10);
    assert_eq!(src.total(), 0);
}

#[test]
fn move_ratio_part_survives_huge_values() {
    // Large enough that bucket * part overflows i64 and the 128-bit
    // path must take over.
    let mut src = Fractions::zero_std();
    src[0] = 4_000_000_000_000_000_000;
    src[1] = 4_000_000_000_000_000_000;
    let mut dst = Fractions::zero_std();
    let left = src.move_ratio_part_to(3_000_000_000_000_000_000, &mut dst);
    assert_eq!(left, 0);
    assert_eq!(dst.total(), 3_000_000_000_000_000_000);
}

#[test]
fn distortion_of_identical_is_zero() {
    let fractions = Fractions::std_of(44_000);
    assert_eq!(fractions.distortion(&fractions.clone()), 0.0);
}

#[test]
fn distortion_of_disjoint_equal_totals_is_one() {
    let mut a = Fractions::zero_std();
    let mut b = Fractions::zero_std();
    for i in 0..100 {
        a[i] = 10;
        b[i + 100] = 10;
    }
    assert!((a.distortion(&b) - 1.0).abs() < f64::EPSILON);
}

#[test]
fn distortion_scales_larger_side_down() {
    // Same shape, different size: scaling the larger makes them identical.
    let a = uniform(10);
    let b = uniform(20);
    assert_eq!(a.distortion(&b), 0.0);
}

#[test]
fn intersection_is_conservative() {
    let mut a = Fractions::zero_std();
    let mut b = Fractions::zero_std();
    a[0] = 5;
    b[0] = 3;
    a[1] = -5;
    b[1] = -2;
    a[2] = 4;
    b[2] = -4;

    let both = &a & &b;
    assert_eq!(both[0], 3);
    assert_eq!(both[1], -2);
    assert_eq!(both[2], 0);
}

#[test]
fn positive_negative_split() {
    let mut fractions = Fractions::zero_std();
    fractions[0] = 10;
    fractions[1] = -4;

    assert_eq!(fractions.positive().total(), 10);
    assert_eq!(fractions.negative().total(), -4);
    assert_eq!(
        (&fractions.positive() + &fractions.negative()),
        fractions
    );
    assert!(!fractions.is_positive());
    assert!(!fractions.is_negative());
}

#[test]
fn change_tracks_boundary_moves() {
    let fractions = uniform(2);
    // Moving the boundary up converts buckets from liquid to reserve.
    assert_eq!(fractions.change(10, 15), -10);
    assert_eq!(fractions.change(15, 10), 10);
}
