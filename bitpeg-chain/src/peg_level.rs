//! Peg cycle descriptors.
//!
//! A `PegLevel` is an immutable snapshot of a peg cycle: the cycle pair, the
//! three supply indices (current, next interval, the one after), and the
//! exchange-side shift with its partial-bucket state. Levels are value
//! objects derived per block or per exchange request and are never mutated.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::fraction::{Fractions, PEG_SIZE};
use crate::parameters::PEG_MAX_SUPPLY_INDEX;
use crate::serialization::{PegDeserialize, PegSerialize, SerializationError};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegLevel {
    pub cycle: u32,
    pub cycle_prev: u32,
    pub supply: u16,
    pub supply_next: u16,
    pub supply_next_next: u16,
    pub shift: i16,
    pub shift_last_part: i64,
    pub shift_last_total: i64,
}

impl PegLevel {
    /// A level from plain numeric fields, with no shift.
    pub fn new(
        cycle: u32,
        cycle_prev: u32,
        supply: u16,
        supply_next: u16,
        supply_next_next: u16,
    ) -> Self {
        PegLevel {
            cycle,
            cycle_prev,
            supply,
            supply_next,
            supply_next_next,
            shift: 0,
            shift_last_part: 0,
            shift_last_total: 0,
        }
    }

    /// A level derived from an exchange-side snapshot.
    ///
    /// The shift is found by walking buckets up from `supply`, covering each
    /// whole exchange bucket with the pegshift surplus; the first bucket the
    /// surplus cannot fully cover becomes the partial boundary bucket,
    /// recorded as `shift_last_part` of `shift_last_total`.
    pub fn with_shift(
        cycle: u32,
        cycle_prev: u32,
        supply: u16,
        supply_next: u16,
        supply_next_next: u16,
        exchange: &Fractions,
        pegshift: &Fractions,
    ) -> Self {
        let mut level = PegLevel::new(cycle, cycle_prev, supply, supply_next, supply_next_next);

        let exchange = exchange.std();
        let mut surplus = pegshift.positive().total();
        let mut idx = supply as usize;

        while surplus > 0 && idx < PEG_SIZE {
            let bucket = exchange[idx];
            if surplus >= bucket {
                surplus -= bucket;
                level.shift += 1;
                idx += 1;
            } else {
                level.shift_last_part = surplus;
                level.shift_last_total = bucket;
                break;
            }
        }

        level
    }

    /// The effective boundary between reserve and liquid, clamped to the
    /// bucket range.
    pub fn supply_effective(&self) -> usize {
        let effective = self.supply as i32 + self.shift as i32;
        effective.max(0).min(PEG_SIZE as i32) as usize
    }

    /// True when the boundary cuts strictly inside a bucket.
    pub fn has_partial(&self) -> bool {
        self.shift_last_part > 0 && self.shift_last_total > 0
    }

    /// Every consumer must check validity before use; levels decoded from
    /// untrusted hex can hold arbitrary fields.
    pub fn is_valid(&self) -> bool {
        self.supply <= PEG_MAX_SUPPLY_INDEX as u16
            && self.supply_next <= PEG_MAX_SUPPLY_INDEX as u16
            && self.supply_next_next <= PEG_MAX_SUPPLY_INDEX as u16
            && self.cycle >= self.cycle_prev
            && self.shift_last_part >= 0
            && self.shift_last_part <= self.shift_last_total
    }

    pub fn to_hex(&self) -> String {
        let bytes = self
            .peg_serialize_to_vec()
            .expect("writing to a Vec never fails");
        hex::encode(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SerializationError> {
        let bytes = hex::decode(hex_str)
            .map_err(|_| SerializationError::Parse("peg level hex is not hex"))?;
        PegLevel::peg_deserialize(&bytes[..])
    }
}

impl fmt::Display for PegLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl PegSerialize for PegLevel {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.cycle.peg_serialize(&mut writer)?;
        self.cycle_prev.peg_serialize(&mut writer)?;
        self.supply.peg_serialize(&mut writer)?;
        self.supply_next.peg_serialize(&mut writer)?;
        self.supply_next_next.peg_serialize(&mut writer)?;
        self.shift.peg_serialize(&mut writer)?;
        self.shift_last_part.peg_serialize(&mut writer)?;
        self.shift_last_total.peg_serialize(&mut writer)?;
        Ok(())
    }
}

impl PegDeserialize for PegLevel {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(PegLevel {
            cycle: u32::peg_deserialize(&mut reader)?,
            cycle_prev: u32::peg_deserialize(&mut reader)?,
            supply: u16::peg_deserialize(&mut reader)?,
            supply_next: u16::peg_deserialize(&mut reader)?,
            supply_next_next: u16::peg_deserialize(&mut reader)?,
            shift: i16::peg_deserialize(&mut reader)?,
            shift_last_part: i64::peg_deserialize(&mut reader)?,
            shift_last_total: i64::peg_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let level = PegLevel::new(7, 6, 500, 501, 503);
        let decoded = PegLevel::from_hex(&level.to_hex()).expect("level hex should decode");
        assert_eq!(level, decoded);
    }

    #[test]
    fn hex_layout_is_stable() {
        let level = PegLevel::new(1, 0, 3, 3, 3);
        assert_eq!(
            level.to_hex(),
            "010000000000000003000300030000000000000000000000000000000000000000000000",
        );
    }

    #[test]
    fn invalid_supply_is_rejected() {
        let mut level = PegLevel::new(1, 0, 3, 3, 3);
        assert!(level.is_valid());
        level.supply = 1300;
        assert!(!level.is_valid());
    }

    #[test]
    fn cycle_must_not_decrease() {
        let level = PegLevel::new(1, 2, 3, 3, 3);
        assert!(!level.is_valid());
    }

    #[test]
    fn shift_walks_whole_buckets() {
        // Uniform exchange of 100 per bucket; a surplus of 250 covers two
        // whole buckets and half of the third.
        let mut exchange = Fractions::zero_std();
        for i in 0..PEG_SIZE {
            exchange[i] = 100;
        }
        let mut pegshift = Fractions::zero_std();
        pegshift[40] = 250;

        let level = PegLevel::with_shift(2, 1, 10, 10, 10, &exchange, &pegshift);
        assert_eq!(level.shift, 2);
        assert_eq!(level.shift_last_part, 50);
        assert_eq!(level.shift_last_total, 100);
        assert_eq!(level.supply_effective(), 12);
        assert!(level.has_partial());
    }

    #[test]
    fn empty_pegshift_means_no_shift() {
        let exchange = Fractions::std_of(1_000_000);
        let pegshift = Fractions::zero_std();
        let level = PegLevel::with_shift(1, 0, 3, 3, 3, &exchange, &pegshift);
        assert_eq!(level.shift, 0);
        assert!(!level.has_partial());
        assert_eq!(level.supply_effective(), 3);
    }
}
