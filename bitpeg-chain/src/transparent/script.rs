use crate::{
    compactint::CompactInt,
    parameters::Network,
    serialization::{PegDeserialize, PegSerialize, SerializationError},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{self, Read},
};

use super::Address;

/// OP_RETURN, the opcode that marks an unspendable data-carrier output.
pub const OP_RETURN: u8 = 0x6a;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// An encoding of a script.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }

    /// The pay-to-public-key-hash and pay-to-script-hash destination, if this
    /// is one of the two standard forms.
    pub fn destination(&self, network: Network) -> Option<Address> {
        let s = &self.0;
        if s.len() == 25
            && s[0] == OP_DUP
            && s[1] == OP_HASH160
            && s[2] == 20
            && s[23] == OP_EQUALVERIFY
            && s[24] == OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&s[3..23]);
            return Some(Address::PayToPublicKeyHash {
                network,
                pub_key_hash: hash,
            });
        }
        if s.len() == 23 && s[0] == OP_HASH160 && s[1] == 20 && s[22] == OP_EQUAL {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&s[2..22]);
            return Some(Address::PayToScriptHash {
                network,
                script_hash: hash,
            });
        }
        None
    }

    /// The key the peg engine pools this script's funds under: the base58
    /// address when the script has a standard destination, otherwise the hex
    /// of the raw script. Pool iteration is in ascending order of this key.
    pub fn pool_key(&self, network: Network) -> String {
        match self.destination(network) {
            Some(address) => address.to_string(),
            None => hex::encode(&self.0),
        }
    }

    /// The payload of an OP_RETURN data push, if this is a data carrier.
    pub fn notary_payload(&self) -> Option<String> {
        let s = &self.0;
        if s.len() < 2 || s[0] != OP_RETURN {
            return None;
        }
        let mut len = s[1] as usize;
        if len > s.len() - 2 {
            len = s.len() - 2;
        }
        Some(String::from_utf8_lossy(&s[2..2 + len]).into_owned())
    }

    /// A data-carrier script holding `payload`.
    pub fn notary(payload: &str) -> Script {
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        bytes.push(OP_RETURN);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload.as_bytes());
        Script(bytes)
    }

    pub fn is_notary(&self) -> bool {
        self.0.len() > 1 && self.0[0] == OP_RETURN
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl PegSerialize for Script {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).peg_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl PegDeserialize for Script {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::peg_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated script"));
        }
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_destination() {
        let mut bytes = vec![OP_DUP, OP_HASH160, 20];
        bytes.extend_from_slice(&[0u8; 20]);
        bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        let script = Script(bytes);

        let address = script
            .destination(Network::Mainnet)
            .expect("standard p2pkh should extract");
        assert_eq!(address.to_script().0, script.0);
    }

    #[test]
    fn notary_payload_roundtrip() {
        let script = Script::notary("**F**2:3");
        assert!(script.is_notary());
        assert_eq!(script.notary_payload().as_deref(), Some("**F**2:3"));
        assert_eq!(script.destination(Network::Mainnet), None);
    }

    #[test]
    fn notary_payload_clamps_overlong_length() {
        let script = Script(vec![OP_RETURN, 200, b'x']);
        assert_eq!(script.notary_payload().as_deref(), Some("x"));
    }

    #[test]
    fn nonstandard_pool_key_is_script_hex() {
        let script = Script(vec![0x51]);
        assert_eq!(script.pool_key(Network::Mainnet), "51");
    }
}
