use proptest::prelude::*;

use super::super::*;
use crate::serialization::{PegDeserializeInto, PegSerialize};

fn arbitrary_std() -> impl Strategy<Value = Fractions> {
    proptest::collection::vec(0i64..10_000, PEG_SIZE).prop_map(|buckets| {
        let mut fractions = Fractions::zero_std();
        for (i, v) in buckets.into_iter().enumerate() {
            fractions[i] = v;
        }
        fractions
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pack_roundtrips(fractions in arbitrary_std()) {
        let bytes = fractions.peg_serialize_to_vec().expect("fractions should pack");
        let unpacked: Fractions = (&bytes[..]).peg_deserialize_into().expect("packed fractions should unpack");
        prop_assert_eq!(fractions, unpacked);
    }

    #[test]
    fn low_high_partition(fractions in arbitrary_std(), supply in 0usize..=PEG_SIZE) {
        prop_assert_eq!(fractions.low(supply) + fractions.high(supply), fractions.total());
    }

    #[test]
    fn ratio_part_total_and_bound(fractions in arbitrary_std(), numerator in 0u32..=1000) {
        let total = fractions.total();
        let part_value = (total * numerator as i64) / 1000;
        let part = fractions.ratio_part(part_value);
        prop_assert_eq!(part.total(), part_value);
        for i in 0..PEG_SIZE {
            prop_assert!(part[i] <= fractions[i]);
            prop_assert!(part[i] >= 0);
        }
    }

    #[test]
    fn move_ratio_conserves_value(mut fractions in arbitrary_std(), numerator in 0u32..=1000) {
        let total = fractions.total();
        let to_move = (total * numerator as i64) / 1000;
        let mut dst = Fractions::zero_std();
        let left = fractions.move_ratio_part_to(to_move, &mut dst);
        prop_assert_eq!(left, 0);
        prop_assert_eq!(dst.total(), to_move);
        prop_assert_eq!(fractions.total() + dst.total(), total);
    }
}
