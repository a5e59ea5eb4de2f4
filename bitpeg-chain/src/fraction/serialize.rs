//! The compressed on-disk format of fraction vectors.
//!
//! A header mask selects one of three wire forms:
//!
//! - `SER_VALUE`: header, lock time, the single scalar. Only for VALUE form.
//! - `SER_ZDELTA`: header, lock time, length, deflated delta stream. The
//!   deltas `f[i] - f[i-1]*(PEG_RATE-1)/PEG_RATE` exploit the near-geometric
//!   bucket shape, so well-formed vectors deflate to a few dozen bytes.
//! - `SER_RAW`: header, lock time, the raw buckets. Fallback when deflate
//!   errors.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use super::{zero_buckets, Form, Fractions, NotaryMarks, PEG_RATE, PEG_SIZE};
use crate::serialization::{PegDeserialize, PegSerialize, SerializationError};

const FLAG_VALUE: u32 = 0x01;
const FLAG_STD: u32 = 0x02;
const SER_VALUE: u32 = 0x04;
const SER_ZDELTA: u32 = 0x08;
const SER_RAW: u32 = 0x10;

/// Upper bound accepted for the deflated payload length.
const MAX_ZDELTA_LEN: usize = 2 * PEG_SIZE * 8;

impl Fractions {
    fn to_deltas(&self) -> Vec<i64> {
        let mut deltas = vec![0i64; PEG_SIZE];
        let mut prev = 0i64;
        for i in 0..PEG_SIZE {
            if i == 0 {
                prev = self.f[0];
                deltas[0] = prev;
                continue;
            }
            deltas[i] = self.f[i] - prev * (PEG_RATE - 1) / PEG_RATE;
            prev = self.f[i];
        }
        deltas
    }

    fn from_deltas(deltas: &[i64]) -> Box<[i64; PEG_SIZE]> {
        let mut f = zero_buckets();
        let mut prev = 0i64;
        for i in 0..PEG_SIZE {
            if i == 0 {
                prev = deltas[0];
                f[0] = prev;
                continue;
            }
            f[i] = deltas[i] + prev * (PEG_RATE - 1) / PEG_RATE;
            prev = f[i];
        }
        f
    }
}

fn deflate(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(9));
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn inflate(bytes: &[u8], expected: usize) -> Result<Vec<u8>, SerializationError> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(bytes)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| SerializationError::Corrupt("fraction deltas do not inflate"))?;
    if out.len() != expected {
        return Err(SerializationError::Corrupt(
            "inflated fraction deltas have wrong length",
        ));
    }
    Ok(out)
}

impl PegSerialize for Fractions {
    fn peg_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        let marks = self.marks.bits();
        match self.form {
            Form::Value => {
                writer.write_u32::<LittleEndian>(FLAG_VALUE | SER_VALUE | marks)?;
                writer.write_u32::<LittleEndian>(self.lock_time)?;
                writer.write_i64::<LittleEndian>(self.f[0])?;
            }
            Form::Std => {
                let deltas = self.to_deltas();
                let mut raw = Vec::with_capacity(PEG_SIZE * 8);
                for delta in &deltas {
                    raw.write_i64::<LittleEndian>(*delta)?;
                }
                match deflate(&raw) {
                    Ok(compressed) => {
                        writer.write_u32::<LittleEndian>(FLAG_STD | SER_ZDELTA | marks)?;
                        writer.write_u32::<LittleEndian>(self.lock_time)?;
                        writer.write_u32::<LittleEndian>(compressed.len() as u32)?;
                        writer.write_all(&compressed)?;
                    }
                    Err(error) => {
                        warn!(%error, "fraction deltas failed to deflate, writing raw");
                        writer.write_u32::<LittleEndian>(FLAG_STD | SER_RAW | marks)?;
                        writer.write_u32::<LittleEndian>(self.lock_time)?;
                        for value in self.f.iter() {
                            writer.write_i64::<LittleEndian>(*value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl PegDeserialize for Fractions {
    fn peg_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let header = reader.read_u32::<LittleEndian>()?;
        let lock_time = reader.read_u32::<LittleEndian>()?;
        let marks = NotaryMarks::from_bits_truncate(header);

        if header & SER_VALUE != 0 {
            let value = reader.read_i64::<LittleEndian>()?;
            let mut fractions = Fractions::value(value);
            fractions.marks = marks;
            fractions.lock_time = lock_time;
            return Ok(fractions);
        }

        let f = if header & SER_ZDELTA != 0 {
            let zlen = reader.read_u32::<LittleEndian>()? as usize;
            if zlen > MAX_ZDELTA_LEN {
                return Err(SerializationError::Corrupt(
                    "deflated fraction length out of range",
                ));
            }
            let mut compressed = vec![0u8; zlen];
            reader.read_exact(&mut compressed)?;
            let raw = inflate(&compressed, PEG_SIZE * 8)?;
            let mut deltas = vec![0i64; PEG_SIZE];
            let mut cursor = &raw[..];
            for delta in deltas.iter_mut() {
                *delta = cursor.read_i64::<LittleEndian>()?;
            }
            Fractions::from_deltas(&deltas)
        } else if header & SER_RAW != 0 {
            let mut f = zero_buckets();
            for value in f.iter_mut() {
                *value = reader.read_i64::<LittleEndian>()?;
            }
            f
        } else {
            return Err(SerializationError::Parse("unknown fraction wire form"));
        };

        Ok(Fractions {
            form: Form::Std,
            marks,
            lock_time,
            f,
        })
    }
}
