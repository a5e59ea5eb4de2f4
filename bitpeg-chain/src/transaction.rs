//! Transactions and transaction-related structures.

use std::io;

use serde::{Deserialize, Serialize};

use crate::cached::Cached;
use crate::serialization::{PegDeserialize, PegSerialize, SerializationError};
use crate::transparent;

mod hash;

pub use hash::Hash;

/// A transaction.
///
/// A transaction is an encoded data structure that facilitates the transfer
/// of value between two public key addresses. The peg engine consumes
/// transactions after script validation, deriving a fraction vector for each
/// output from the fraction vectors of the spent outputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version.
    pub version: i32,
    /// The transaction timestamp; freeze expiry is checked against it.
    pub time: u32,
    /// The transaction Inputs
    pub inputs: Vec<transparent::Input>,
    /// The transaction Outputs
    pub outputs: Vec<transparent::Output>,
    /// The transaction LockTime
    pub lock_time: u32,
    hash: Cached<Hash>,
}

impl Transaction {
    pub fn new(
        version: i32,
        time: u32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: u32,
    ) -> Transaction {
        Transaction {
            version,
            time,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        }
    }

    /// Get the hash of this transaction.
    pub fn hash(&self) -> Hash {
        // If we have a cached version, just return that
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        // Otherwise, serialize the tx to calculate and return the hash
        Hash::from(self)
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(
                self.inputs.get(0),
                Some(transparent::Input::Coinbase { .. })
            )
    }
}

/// Equality over the transaction content; the cached id does not take part.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.time == other.time
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
    }
}

impl Eq for Transaction {}

impl PegSerialize for Transaction {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.peg_serialize(&mut writer)?;
        self.time.peg_serialize(&mut writer)?;
        self.inputs.peg_serialize(&mut writer)?;
        self.outputs.peg_serialize(&mut writer)?;
        self.lock_time.peg_serialize(&mut writer)?;
        Ok(())
    }
}

/// Deserializes a transaction, calculating and caching its id.
impl PegDeserialize for Transaction {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = i32::peg_deserialize(&mut reader)?;
        let time = u32::peg_deserialize(&mut reader)?;
        let inputs = <Vec<transparent::Input>>::peg_deserialize(&mut reader)?;
        let outputs = <Vec<transparent::Output>>::peg_deserialize(&mut reader)?;
        let lock_time = u32::peg_deserialize(&mut reader)?;
        let mut tx = Transaction {
            version,
            time,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        };
        let own_hash = tx.hash();
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::PegDeserializeInto;
    use crate::transparent::{Output, Script};

    #[test]
    fn hash_is_stable_over_roundtrip() {
        let tx = Transaction::new(
            1,
            1_600_000_000,
            vec![transparent::Input::Coinbase {
                data: b"peg".to_vec(),
                sequence: 0,
            }],
            vec![Output {
                value: 42,
                lock_script: Script(vec![0x51]),
            }],
            0,
        );
        let bytes = tx.peg_serialize_to_vec().expect("serialize");
        let decoded: Transaction = (&bytes[..]).peg_deserialize_into().expect("deserialize");
        assert_eq!(tx.hash(), decoded.hash());
        assert_eq!(tx, decoded);
    }
}
