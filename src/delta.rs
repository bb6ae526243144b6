//! Delta representation: the op list that rebuilds a source file from a
//! basis plus literal bytes.

use serde::{Deserialize, Serialize};

use crate::hash::StrongHash;

/// One reconstruction instruction.
///
/// Ops are ordered by `dst_pos` and tile the output exactly: each op starts
/// where the previous one ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Reuse `size` bytes of the basis starting at `source_pos`.
    Copy {
        /// Byte offset into the basis file.
        source_pos: u64,
        /// Byte offset into the reconstructed output.
        dst_pos: u64,
        /// Span length in bytes.
        size: u32,
    },
    /// Write bytes the basis does not contain.
    Literal {
        /// Byte offset into the reconstructed output.
        dst_pos: u64,
        /// The bytes themselves.
        data: Vec<u8>,
    },
}

impl DeltaOp {
    /// Bytes this op contributes to the output.
    #[must_use]
    pub fn output_len(&self) -> u64 {
        match self {
            Self::Copy { size, .. } => u64::from(*size),
            Self::Literal { data, .. } => data.len() as u64,
        }
    }

    /// Output offset this op writes at.
    #[must_use]
    pub const fn dst_pos(&self) -> u64 {
        match self {
            Self::Copy { dst_pos, .. } | Self::Literal { dst_pos, .. } => *dst_pos,
        }
    }
}

/// Metadata of the sender's file, captured when the delta was computed and
/// applied to the receiver's copy after patching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Permission bits; meaningful on unix, zero elsewhere.
    pub mode: u32,
}

/// A computed delta: origin metadata, a whole-content hash, and the op list.
///
/// The op lengths sum to `origin.size`, and `content_hash` is the strong
/// hash of the reconstructed stream; patch application verifies both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Sender-side file metadata.
    pub origin: OriginMetadata,
    /// Strong hash of the complete source content.
    pub content_hash: StrongHash,
    /// Reconstruction instructions in output order.
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    /// Bytes reused from the basis.
    #[must_use]
    pub fn bytes_copied(&self) -> u64 {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Copy { size, .. } => Some(u64::from(*size)),
                DeltaOp::Literal { .. } => None,
            })
            .sum()
    }

    /// Bytes carried literally.
    #[must_use]
    pub fn bytes_literal(&self) -> u64 {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Literal { data, .. } => Some(data.len() as u64),
                DeltaOp::Copy { .. } => None,
            })
            .sum()
    }

    /// Total reconstructed length.
    #[must_use]
    pub fn output_len(&self) -> u64 {
        self.ops.iter().map(DeltaOp::output_len).sum()
    }

    /// Number of ops.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }
}
