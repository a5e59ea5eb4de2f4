//! Consensus-critical serialization.
//!
//! This module contains the `PegSerialize` and `PegDeserialize` traits,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the consensus-critical peg wire formats (fraction vectors, peg levels,
//! transactions, exchange coin records), plus the primitive impls they build
//! on. All integers are little-endian.

mod deserialize;
mod error;

pub mod sha256d;

pub use deserialize::{PegDeserialize, PegDeserializeInto};
pub use error::SerializationError;

use crate::compactint::CompactInt;
use byteorder::{LittleEndian, WriteBytesExt};

pub trait PegSerialize {
    fn peg_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn peg_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.peg_serialize(&mut data)?;
        Ok(data)
    }
}

impl PegSerialize for bool {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self as u8])
    }
}

impl PegSerialize for u16 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl PegSerialize for u32 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl PegSerialize for u64 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl PegSerialize for i16 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i16::<LittleEndian>(*self)
    }
}

impl PegSerialize for i32 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl PegSerialize for i64 {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

impl PegSerialize for &[u8] {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl PegSerialize for [u8; 32] {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl PegSerialize for Vec<u8> {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).peg_serialize(&mut target)?;
        target.write_all(self)?;
        Ok(())
    }
}

// NOTE: no `impl PegSerialize for u8` -- it would overlap with the
// length-prefixed `Vec<u8>` impl above until specialization stabilizes.
// Single bytes are written with `write_all(&[b])` at the call site.

impl<T> PegSerialize for Vec<T>
where
    T: PegSerialize,
{
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).peg_serialize(&mut target)?;
        for item in self.iter() {
            item.peg_serialize(&mut target)?
        }
        Ok(())
    }
}

impl<T, U> PegSerialize for (T, U)
where
    T: PegSerialize,
    U: PegSerialize,
{
    fn peg_serialize<W>(&self, mut target: W) -> std::result::Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.0.peg_serialize(&mut target)?;
        self.1.peg_serialize(&mut target)?;
        Ok(())
    }
}

impl PegSerialize for String {
    fn peg_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).peg_serialize(&mut target)?;
        target.write_all(self.as_bytes())?;
        Ok(())
    }
}
