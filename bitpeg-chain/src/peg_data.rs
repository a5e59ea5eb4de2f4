//! The exchange wire format: fractions, level and the reserve/liquid pair
//! packed together in a single base64 blob.

use std::io;

use crate::fraction::Fractions;
use crate::peg_level::PegLevel;
use crate::serialization::{PegDeserialize, PegSerialize, SerializationError};

/// A caller-owned balance blob.
///
/// Invariant: `reserve + liquid == fractions.total()`.
#[derive(Clone, Debug, PartialEq)]
pub struct PegData {
    pub fractions: Fractions,
    pub level: PegLevel,
    pub reserve: i64,
    pub liquid: i64,
}

impl Default for PegData {
    fn default() -> Self {
        PegData {
            fractions: Fractions::value(0),
            level: PegLevel::default(),
            reserve: 0,
            liquid: 0,
        }
    }
}

impl PegData {
    /// A blob for `fractions` at `level`, with the scalars derived from the
    /// level split.
    pub fn of(fractions: Fractions, level: PegLevel) -> Self {
        let reserve = fractions.low_level(&level);
        let liquid = fractions.total() - reserve;
        PegData {
            fractions,
            level,
            reserve,
            liquid,
        }
    }

    pub fn to_base64(&self) -> String {
        let bytes = self
            .peg_serialize_to_vec()
            .expect("writing to a Vec never fails");
        base64::encode(&bytes)
    }

    /// Decode a blob; the empty string decodes to the zero balance.
    ///
    /// Legacy blobs without the trailing scalars still decode, with the
    /// scalars reconstructed from the fractions and the level.
    pub fn from_base64(blob: &str) -> Result<Self, SerializationError> {
        if blob.is_empty() {
            return Ok(PegData::default());
        }
        let bytes =
            base64::decode(blob).map_err(|_| SerializationError::Parse("pegdata is not base64"))?;
        PegData::peg_deserialize(&bytes[..])
    }

    /// Full validation of the scalar pair against the fractions and level.
    ///
    /// With a partial boundary bucket the split inside that bucket is only
    /// bounded, not exact, so the scalars are checked against the whole
    /// buckets on each side.
    pub fn is_consistent(&self) -> bool {
        if self.reserve + self.liquid != self.fractions.total() {
            return false;
        }
        let supply = self.level.supply_effective();
        if self.level.has_partial() {
            let liquid_whole = self.fractions.high(supply + 1);
            let reserve_whole = self.fractions.low(supply);
            self.liquid >= liquid_whole && self.reserve >= reserve_whole
        } else {
            self.liquid == self.fractions.high(supply)
                && self.reserve == self.fractions.low(supply)
        }
    }
}

impl PegSerialize for PegData {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.fractions.peg_serialize(&mut writer)?;
        self.level.peg_serialize(&mut writer)?;
        self.reserve.peg_serialize(&mut writer)?;
        self.liquid.peg_serialize(&mut writer)?;
        Ok(())
    }
}

impl PegDeserialize for PegData {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut fractions = Fractions::peg_deserialize(&mut reader)?;
        let level = PegLevel::peg_deserialize(&mut reader)?;

        // Tolerate legacy blobs that end after the level.
        let (reserve, liquid) = match i64::peg_deserialize(&mut reader) {
            Ok(reserve) => (reserve, i64::peg_deserialize(&mut reader)?),
            Err(_) => {
                let reserve = fractions.low_level(&level);
                (reserve, fractions.total() - reserve)
            }
        };

        if reserve + liquid != fractions.total() {
            return Err(SerializationError::Corrupt(
                "pegdata scalars disagree with fraction total",
            ));
        }

        fractions.to_std();
        Ok(PegData {
            fractions,
            level,
            reserve,
            liquid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::PEG_SIZE;

    #[test]
    fn base64_roundtrip() {
        let mut fractions = Fractions::zero_std();
        for i in 0..PEG_SIZE {
            fractions[i] = 23;
        }
        let level = PegLevel::new(1, 0, 3, 3, 3);
        let data = PegData::of(fractions, level);
        assert_eq!(data.reserve, 69);
        assert_eq!(data.liquid, 23 * (PEG_SIZE as i64) - 69);

        let decoded = PegData::from_base64(&data.to_base64()).expect("blob should decode");
        assert_eq!(decoded, data);
        assert!(decoded.is_consistent());
    }

    #[test]
    fn empty_blob_is_zero_balance() {
        let data = PegData::from_base64("").expect("empty blob is the zero balance");
        assert_eq!(data.fractions.total(), 0);
        assert_eq!(data.reserve, 0);
        assert_eq!(data.liquid, 0);
    }

    #[test]
    fn mismatched_scalars_are_corruption() {
        let fractions = Fractions::std_of(10_000);
        let level = PegLevel::new(1, 0, 3, 3, 3);
        let mut data = PegData::of(fractions, level);
        data.reserve += 1;
        let blob = data.to_base64();
        assert!(PegData::from_base64(&blob).is_err());
    }
}
