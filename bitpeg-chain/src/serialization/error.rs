use std::io;

use thiserror::Error;

/// A serialization error.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// An io error that prevented deserialization
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The data to be deserialized was malformed.
    #[error("parse error: {0}")]
    Parse(&'static str),
    /// Compressed fraction data that fails to inflate, or whose declared
    /// length is out of range. Fatal for the containing operation.
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
}
