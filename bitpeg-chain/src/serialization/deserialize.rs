use byteorder::{LittleEndian, ReadBytesExt};
use std::io;
use std::io::Read;

use super::CompactInt;
use super::SerializationError;

type Result<R> = std::result::Result<R, SerializationError>;

pub trait PegDeserialize {
    fn peg_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait PegDeserializeInto {
    /// Deserialize based on type inference
    fn peg_deserialize_into<T>(self) -> Result<T>
    where
        T: PegDeserialize;
}

impl<R: io::Read> PegDeserializeInto for R {
    fn peg_deserialize_into<T>(self) -> Result<T>
    where
        T: PegDeserialize,
    {
        T::peg_deserialize(self)
    }
}

impl PegDeserialize for bool {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<bool> {
        let value = reader.read_u8()?;
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("Invalid bool")),
        }
    }
}

impl PegDeserialize for u8 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl PegDeserialize for u16 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<u16> {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl PegDeserialize for u32 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<u32> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl PegDeserialize for u64 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<u64> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl PegDeserialize for i16 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<i16> {
        Ok(reader.read_i16::<LittleEndian>()?)
    }
}

impl PegDeserialize for i32 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<i32> {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl PegDeserialize for i64 {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<i64> {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

impl PegDeserialize for [u8; 32] {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; 32]> {
        let mut bytes = [0u8; 32];
        reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

impl<T> PegDeserialize for Vec<T>
where
    T: PegDeserialize,
{
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let len = CompactInt::peg_deserialize(&mut reader)?.value() as usize;
        // Limit preallocation since blind preallocation is a DOS vulnerability
        let blind_alloc_limit = 1024;
        let mut result: Vec<T> = Vec::with_capacity(std::cmp::min(len, blind_alloc_limit));
        for _ in 0..len {
            result.push(T::peg_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl PegDeserialize for String {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<String> {
        let len = CompactInt::peg_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated string"));
        }
        String::from_utf8(bytes).map_err(|_| SerializationError::Parse("string is not utf8"))
    }
}
