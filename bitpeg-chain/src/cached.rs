//! A tiny wrapper for lazily computed values that may be cached at
//! construction time (for example a transaction id computed while
//! deserializing the transaction).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cached<T>(Option<T>);

impl<T: Copy> Cached<T> {
    pub fn new() -> Self {
        Cached(None)
    }

    pub fn from(value: T) -> Self {
        Cached(Some(value))
    }

    pub fn value(&self) -> Option<T> {
        self.0
    }
}
