//! Signature generation and lookup for delta computation.
//!
//! A signature summarizes the receiver's copy of a file as one weak checksum
//! and one strong hash per window. The sender scans its own copy against a
//! [`SignatureIndex`] built from the signature to find reusable spans.

use std::io::Read;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::checksum::RollingChecksum;
use crate::error::Result;
use crate::hash::StrongHash;

/// Summary of one window of the basis file.
///
/// Carries the weak (rolling) checksum for fast filtering and the strong
/// hash for confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Byte offset of the window in the basis file.
    pub position: u64,
    /// Window length in bytes; only the final chunk may be short.
    pub size: u32,
    /// Rolling checksum of the window.
    pub weak_hash: u32,
    /// Strong hash of the window.
    pub strong_hash: StrongHash,
}

impl Chunk {
    /// Summarize one window of data at the given file offset.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute(position: u64, data: &[u8]) -> Self {
        let mut weak = RollingChecksum::new(data.len() as u32);
        for &b in data {
            weak.eat(b);
        }
        Self {
            position,
            size: data.len() as u32,
            weak_hash: weak.value(),
            strong_hash: StrongHash::compute(data),
        }
    }
}

/// Complete signature of a basis file.
///
/// Chunks cover the file contiguously from offset 0 in order; only the final
/// chunk may be shorter than `window_size`. An empty file has no chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Window size the signature was built with.
    pub window_size: u32,
    /// Per-window summaries, in file order.
    pub chunks: Vec<Chunk>,
}

impl Signature {
    /// Build a signature from a reader.
    ///
    /// Reads the stream to the end, then summarizes consecutive
    /// non-overlapping windows. Inputs over 64 KiB hash their windows in
    /// parallel.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub fn build<R: Read>(reader: &mut R, window_size: u32) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(Self {
                window_size,
                chunks: Vec::new(),
            });
        }

        let window = (window_size as usize).max(1);
        let chunks: Vec<Chunk> = if data.len() > 64 * 1024 {
            data.par_chunks(window)
                .enumerate()
                .map(|(i, piece)| Chunk::compute((i * window) as u64, piece))
                .collect()
        } else {
            data.chunks(window)
                .enumerate()
                .map(|(i, piece)| Chunk::compute((i * window) as u64, piece))
                .collect()
        };

        Ok(Self {
            window_size,
            chunks,
        })
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the signature describes an empty file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total size of the file the signature describes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| u64::from(c.size))
            .sum()
    }

    /// Build a lookup index over this signature.
    #[must_use]
    pub fn index(&self) -> SignatureIndex<'_> {
        SignatureIndex::new(self)
    }
}

/// Weak-hash lookup index over a signature.
///
/// Two-level lookup: the weak checksum selects a candidate bucket, the
/// strong hash of the probed span confirms. Buckets preserve signature
/// order, so a weak collision resolves to the earliest matching chunk.
#[derive(Debug)]
pub struct SignatureIndex<'a> {
    weak_index: FxHashMap<u32, Vec<&'a Chunk>>,
}

impl<'a> SignatureIndex<'a> {
    /// Index a signature by weak hash.
    #[must_use]
    pub fn new(signature: &'a Signature) -> Self {
        let mut weak_index: FxHashMap<u32, Vec<&'a Chunk>> = FxHashMap::with_capacity_and_hasher(
            signature.chunks.len(),
            rustc_hash::FxBuildHasher,
        );
        for chunk in &signature.chunks {
            weak_index.entry(chunk.weak_hash).or_default().push(chunk);
        }
        Self { weak_index }
    }

    /// Find the chunk matching a probed span.
    ///
    /// Filters by weak checksum, then confirms with the strong hash of
    /// `span`. The strong hash is only computed when the bucket exists.
    #[must_use]
    pub fn find(&self, weak: u32, span: &[u8]) -> Option<&'a Chunk> {
        let candidates = self.weak_index.get(&weak)?;
        let strong = StrongHash::compute(span);
        candidates
            .iter()
            .copied()
            .find(|chunk| chunk.strong_hash == strong)
    }

    /// Whether the index holds no chunks at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weak_index.is_empty()
    }

    /// Number of distinct weak-hash buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.weak_index.len()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        /// Signatures are deterministic across builds.
        #[test]
        fn build_deterministic(
            data in prop::collection::vec(any::<u8>(), 0..5000),
            window in prop::sample::select(vec![16u32, 100, 512, 1000])
        ) {
            let a = Signature::build(&mut Cursor::new(&data), window).unwrap();
            let b = Signature::build(&mut Cursor::new(&data), window).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Chunk sizes sum to the input length and positions are contiguous.
        #[test]
        fn chunks_cover_input(
            data in prop::collection::vec(any::<u8>(), 0..5000),
            window in prop::sample::select(vec![16u32, 100, 512])
        ) {
            let sig = Signature::build(&mut Cursor::new(&data), window).unwrap();
            prop_assert_eq!(sig.file_size(), data.len() as u64);

            let mut pos = 0u64;
            for (i, chunk) in sig.chunks.iter().enumerate() {
                prop_assert_eq!(chunk.position, pos);
                if i + 1 < sig.chunks.len() {
                    prop_assert_eq!(chunk.size, window);
                }
                pos += u64::from(chunk.size);
            }
        }

        /// Every full window of the input is findable through the index.
        #[test]
        fn index_finds_every_chunk(
            data in prop::collection::vec(any::<u8>(), 1..2000)
        ) {
            let window = 64u32;
            let sig = Signature::build(&mut Cursor::new(&data), window).unwrap();
            let index = sig.index();

            for chunk in &sig.chunks {
                let start = usize::try_from(chunk.position).unwrap();
                let span = &data[start..start + chunk.size as usize];
                let found = index.find(chunk.weak_hash, span);
                prop_assert!(found.is_some());
                // Identical spans may resolve to an earlier duplicate.
                prop_assert_eq!(found.unwrap().strong_hash, chunk.strong_hash);
            }
        }
    }
}
