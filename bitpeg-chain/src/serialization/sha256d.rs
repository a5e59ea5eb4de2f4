//! The SHA-256d hash, as used for transaction ids.

use sha2::{Digest, Sha256};
use std::io;

/// An `io::Write` instance that produces a SHA-256d hash of the written data.
pub struct Writer {
    hash: Sha256,
}

impl Default for Writer {
    fn default() -> Self {
        Writer {
            hash: Sha256::new(),
        }
    }
}

impl Writer {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let result = Sha256::digest(&self.hash.finalize());
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result);
        buffer
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash a byte slice with SHA-256d in one call.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let result = Sha256::digest(&Sha256::digest(bytes));
    let mut buffer = [0u8; 32];
    buffer[0..32].copy_from_slice(&result);
    buffer
}
