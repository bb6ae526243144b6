//! Strong hash used to confirm weak-checksum candidates and to verify
//! reconstructed content.
//!
//! The rolling checksum narrows candidates cheaply but collides; every match
//! is confirmed against this 128-bit MD5 digest, and a whole-stream digest
//! guards patch application end to end.

use std::fmt;
use std::io::Read;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// 128-bit strong hash of a byte span.
///
/// # Example
///
/// ```rust
/// use blocksync::StrongHash;
///
/// let a = StrongHash::compute(b"hello world");
/// let b = StrongHash::compute(b"hello world");
/// assert_eq!(a, b);
/// assert_ne!(a, StrongHash::compute(b"something else"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongHash([u8; 16]);

impl StrongHash {
    /// Hash a byte slice.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Hash everything a reader yields, in 8 KiB chunks.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub fn compute_streaming<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut acc = StrongHasher::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            acc.update(&buffer[..n]);
        }
        Ok(acc.finish())
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// All-zero hash, for initialization.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 16])
    }
}

impl fmt::Display for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrongHash({self})")
    }
}

impl Default for StrongHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<[u8]> for StrongHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental accumulator for hashing a stream fed in pieces.
#[derive(Clone, Default)]
pub struct StrongHasher {
    inner: Md5,
}

impl StrongHasher {
    /// Start a fresh accumulation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold more bytes into the running digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the digest.
    #[must_use]
    pub fn finish(self) -> StrongHash {
        StrongHash(self.inner.finalize().into())
    }
}

impl fmt::Debug for StrongHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StrongHasher(..)")
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Splitting the input across updates never changes the digest.
        #[test]
        fn split_invariant(
            data in prop::collection::vec(any::<u8>(), 0..2000),
            split in 0usize..2000
        ) {
            let split = split.min(data.len());
            let mut acc = StrongHasher::new();
            acc.update(&data[..split]);
            acc.update(&data[split..]);
            prop_assert_eq!(acc.finish(), StrongHash::compute(&data));
        }

        /// Different byte strings produce different digests.
        #[test]
        fn collision_free_in_practice(
            a in prop::collection::vec(any::<u8>(), 0..100),
            b in prop::collection::vec(any::<u8>(), 0..100)
        ) {
            if a != b {
                prop_assert_ne!(StrongHash::compute(&a), StrongHash::compute(&b));
            }
        }
    }
}
