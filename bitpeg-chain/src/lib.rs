//! Core data structures of the peg accounting system: fraction vectors and
//! their algebra, peg levels, exchange pegdata blobs, and the transparent
//! transaction layer they attach to.

#![allow(clippy::unit_arg)]

pub mod cached;
pub mod compactint;
pub mod fraction;
pub mod parameters;
pub mod peg_data;
pub mod peg_level;
pub mod serialization;
pub mod transaction;
pub mod transparent;

pub use fraction::{Fractions, NotaryMarks, PEG_RATE, PEG_SIZE};
pub use parameters::{Network, PegParams, PEG_MAKETX_FREEZE_VALUE, PEG_MAX_SUPPLY_INDEX};
pub use peg_data::PegData;
pub use peg_level::PegLevel;
pub use serialization::{PegDeserialize, PegDeserializeInto, PegSerialize, SerializationError};
