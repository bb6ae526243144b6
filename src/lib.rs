//! Delta synchronization of file trees, rsync style.
//!
//! `blocksync` keeps a remote directory tree mirroring a local one while
//! moving as few bytes as possible. The receiver summarizes each file into a
//! [`Signature`] (a rolling checksum and a strong hash per window); the
//! sender scans its copy against that signature and produces a [`Delta`] of
//! copy and literal ops; the receiver replays the delta against its own copy
//! and atomically swaps in the result, verified end to end by a content
//! hash.
//!
//! The building blocks are usable on their own:
//!
//! ```rust
//! use std::io::Cursor;
//! use blocksync::Engine;
//!
//! let basis = b"The quick brown fox jumps over the lazy dog";
//! let source = b"The quick brown fox vaults over the lazy dog";
//!
//! let engine = Engine::with_window(8);
//! let signature = engine.signature(&mut Cursor::new(&basis[..]))?;
//! let delta = engine.delta(&mut Cursor::new(&source[..]), &signature)?;
//!
//! let mut rebuilt = Vec::new();
//! engine.apply(&mut Cursor::new(&basis[..]), &delta, &mut rebuilt)?;
//! assert_eq!(rebuilt, source);
//! # Ok::<(), blocksync::Error>(())
//! ```
//!
//! Continuous mirroring runs over a small framed TCP protocol: [`rpc::serve`]
//! exposes a tree, and a [`Watcher`] polls for differences and drives a pool
//! of transfer workers against it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod checksum;
pub mod codec;
pub mod delta;
pub mod error;
pub mod hash;
pub mod orchestrator;
pub mod rpc;
pub mod scan;
pub mod signature;
pub mod sync;
pub mod tree;

pub use checksum::RollingChecksum;
pub use delta::{Delta, DeltaOp, OriginMetadata};
pub use error::{Error, Result};
pub use hash::{StrongHash, StrongHasher};
pub use orchestrator::{JobQueue, Watcher};
pub use rpc::RpcClient;
pub use scan::Scanner;
pub use signature::{Chunk, Signature, SignatureIndex};
pub use sync::Engine;
pub use tree::FileMeta;
