//! Transparent-related (Bitcoin-inherited) functionality.

mod address;
mod script;

pub use address::Address;
pub use script::Script;

use std::io;

use serde::{Deserialize, Serialize};

use crate::serialization::{PegDeserialize, PegSerialize, SerializationError};
use crate::transaction;

/// OutPoint
///
/// A particular transaction output reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
pub struct OutPoint {
    /// References the transaction that contains the UTXO being spent.
    pub hash: transaction::Hash,

    /// Identifies which UTXO from that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    /// The 320-bit key this outpoint maps to in the fraction store: the
    /// transaction hash followed by the index widened to 64 bits.
    pub fn fraction_key(&self) -> FractionKey {
        let mut bytes = [0u8; FractionKey::LEN];
        bytes[..32].copy_from_slice(&self.hash.0);
        bytes[32..].copy_from_slice(&(self.index as u64).to_le_bytes());
        FractionKey(bytes)
    }
}

impl PegSerialize for OutPoint {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.hash.0.peg_serialize(&mut writer)?;
        self.index.peg_serialize(&mut writer)?;
        Ok(())
    }
}

impl PegDeserialize for OutPoint {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: transaction::Hash(<[u8; 32]>::peg_deserialize(&mut reader)?),
            index: u32::peg_deserialize(&mut reader)?,
        })
    }
}

/// The 320-bit fraction-store key of an unspent output.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FractionKey(pub [u8; FractionKey::LEN]);

impl FractionKey {
    pub const LEN: usize = 40;

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SerializationError> {
        let bytes = hex::decode(hex_str)
            .map_err(|_| SerializationError::Parse("fraction key is not hex"))?;
        if bytes.len() != FractionKey::LEN {
            return Err(SerializationError::Parse("fraction key has wrong length"));
        }
        let mut key = [0u8; FractionKey::LEN];
        key.copy_from_slice(&bytes);
        Ok(FractionKey(key))
    }

    pub fn outpoint(&self) -> OutPoint {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[..32]);
        let mut index = [0u8; 8];
        index.copy_from_slice(&self.0[32..]);
        OutPoint {
            hash: transaction::Hash(hash),
            index: u64::from_le_bytes(index) as u32,
        }
    }
}

impl std::fmt::Debug for FractionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FractionKey").field(&self.to_hex()).finish()
    }
}

/// A transparent input to a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// A reference to an output of a previous transaction.
    PrevOut {
        /// The previous output transaction reference.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The sequence number for the output.
        sequence: u32,
    },
    /// New coins created by the block reward.
    Coinbase {
        /// Free data inserted by miners.
        data: Vec<u8>,
        /// The sequence number for the output.
        sequence: u32,
    },
}

impl Input {
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Input::PrevOut { outpoint, .. } => Some(*outpoint),
            Input::Coinbase { .. } => None,
        }
    }
}

impl PegSerialize for Input {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.peg_serialize(&mut writer)?;
                unlock_script.peg_serialize(&mut writer)?;
                sequence.peg_serialize(&mut writer)?;
            }
            Input::Coinbase { data, sequence } => {
                // Coinbase inputs spend the null outpoint.
                [0u8; 32].peg_serialize(&mut writer)?;
                u32::MAX.peg_serialize(&mut writer)?;
                data.peg_serialize(&mut writer)?;
                sequence.peg_serialize(&mut writer)?;
            }
        }
        Ok(())
    }
}

impl PegDeserialize for Input {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::peg_deserialize(&mut reader)?;
        if outpoint.hash.0 == [0u8; 32] && outpoint.index == u32::MAX {
            let data = Vec::<u8>::peg_deserialize(&mut reader)?;
            let sequence = u32::peg_deserialize(&mut reader)?;
            Ok(Input::Coinbase { data, sequence })
        } else {
            let unlock_script = Script::peg_deserialize(&mut reader)?;
            let sequence = u32::peg_deserialize(&mut reader)?;
            Ok(Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            })
        }
    }
}

/// A transparent output from a transaction.
///
/// The most fundamental building block of a transaction is a transaction
/// output -- the coins you own are in fact a subset of unspent transaction
/// outputs of the global UTXO set. Each peg-tracked output additionally has
/// a fraction vector persisted under its outpoint key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct Output {
    /// Transaction value in base units.
    pub value: i64,

    /// The lock script defines the conditions under which this output can be
    /// spent.
    pub lock_script: Script,
}

impl PegSerialize for Output {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.value.peg_serialize(&mut writer)?;
        self.lock_script.peg_serialize(&mut writer)?;
        Ok(())
    }
}

impl PegDeserialize for Output {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: i64::peg_deserialize(&mut reader)?,
            lock_script: Script::peg_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::PegDeserializeInto;

    #[test]
    fn fraction_key_roundtrip() {
        let outpoint = OutPoint {
            hash: transaction::Hash([7u8; 32]),
            index: 11,
        };
        let key = outpoint.fraction_key();
        let decoded = FractionKey::from_hex(&key.to_hex()).expect("key hex should decode");
        assert_eq!(key, decoded);
        assert_eq!(decoded.outpoint(), outpoint);
    }

    #[test]
    fn output_roundtrip() {
        let output = Output {
            value: 12_345,
            lock_script: Script(vec![0x76, 0xa9, 0x14]),
        };
        let bytes = output.peg_serialize_to_vec().expect("serialize");
        let decoded: Output = (&bytes[..]).peg_deserialize_into().expect("deserialize");
        assert_eq!(output, decoded);
    }
}
