use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};

use super::Transaction;
use crate::serialization::{sha256d, PegSerialize};

/// A transaction hash: the SHA-256d digest of the serialized transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl From<&Transaction> for Hash {
    fn from(transaction: &Transaction) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        transaction
            .peg_serialize(&mut hash_writer)
            .expect("Transactions must serialize into the hash writer");
        let _ = hash_writer.flush();
        Hash(hash_writer.finish())
    }
}

impl Hash {
    /// The conventional big-endian hex rendering of a transaction id.
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("transaction::Hash")
            .field(&self.to_hex())
            .finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
