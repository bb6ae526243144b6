//! Error types for blocksync operations.

use thiserror::Error;

use crate::hash::StrongHash;

/// Errors that can occur during blocksync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during read/write operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialized signature or delta did not start with its header tag.
    #[error("unrecognized format: missing {expected:?} header")]
    UnrecognizedFormat {
        /// The header tag that was expected.
        expected: &'static str,
    },

    /// Content hash mismatch after patch replay.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Hash recorded in the delta.
        expected: StrongHash,
        /// Hash of the reconstructed bytes.
        actual: StrongHash,
    },

    /// A copy op read fewer bytes than it referenced; the basis file no
    /// longer matches the signature the delta was computed against.
    #[error("short copy at offset {offset}: wanted {expected} bytes, got {got}")]
    ShortCopy {
        /// Basis offset the copy op referenced.
        offset: u64,
        /// Bytes the op required.
        expected: u32,
        /// Bytes actually available.
        got: u64,
    },

    /// Transport or framing error on the RPC connection.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for blocksync operations.
pub type Result<T> = std::result::Result<T, Error>;
