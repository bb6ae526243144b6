//! High-level engine: signature and delta computation over streams, delta
//! replay, and atomic in-place file patching.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::delta::{Delta, DeltaOp, OriginMetadata};
use crate::error::{Error, Result};
use crate::hash::StrongHasher;
use crate::scan::Scanner;
use crate::signature::Signature;
use crate::tree::{unix_mode, unix_mtime};

/// Extension appended to a file while its replacement is being assembled.
pub const TEMP_EXTENSION: &str = ".blocksync";

/// Delta-sync engine.
///
/// Stateless apart from the configured window size; one engine can serve any
/// number of files concurrently.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use blocksync::Engine;
///
/// let engine = Engine::with_window(5);
/// let basis = b"hello wonderful world";
/// let source = b"hello cruel world";
///
/// let signature = engine.signature(&mut Cursor::new(&basis[..])).unwrap();
/// let delta = engine.delta(&mut Cursor::new(&source[..]), &signature).unwrap();
///
/// let mut rebuilt = Vec::new();
/// engine.apply(&mut Cursor::new(&basis[..]), &delta, &mut rebuilt).unwrap();
/// assert_eq!(rebuilt, source);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    window: u32,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Default window size in bytes.
    pub const DEFAULT_WINDOW: u32 = 1000;

    /// Engine with the default window size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            window: Self::DEFAULT_WINDOW,
        }
    }

    /// Engine with an explicit window size.
    #[must_use]
    pub const fn with_window(window: u32) -> Self {
        Self { window }
    }

    /// Configured window size.
    #[must_use]
    pub const fn window(&self) -> u32 {
        self.window
    }

    /// Summarize a stream into a signature at the configured window size.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub fn signature<R: Read>(&self, reader: &mut R) -> Result<Signature> {
        Signature::build(reader, self.window)
    }

    /// Compute the delta that rebuilds `reader`'s content from the file the
    /// signature describes.
    ///
    /// The scan runs at the signature's window size, which may differ from
    /// the engine's. Origin metadata carries only the stream length; use
    /// [`delta_file`](Self::delta_file) to capture mtime and mode too.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub fn delta<R: Read>(&self, reader: &mut R, signature: &Signature) -> Result<Delta> {
        let index = signature.index();
        let mut scanner = Scanner::new(signature.window_size);
        let mut ops = Vec::new();
        let mut hasher = StrongHasher::new();
        let mut total = 0u64;

        let mut buf = vec![0u8; signature.window_size.max(1) as usize];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            scanner.feed(&buf[..n], &index, &mut ops);
            total += n as u64;
        }
        scanner.finish(&index, &mut ops);

        Ok(Delta {
            origin: OriginMetadata {
                size: total,
                ..OriginMetadata::default()
            },
            content_hash: hasher.finish(),
            ops,
        })
    }

    /// Compute a delta for a file, capturing its size, mtime and mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn delta_file(&self, path: &Path, signature: &Signature) -> Result<Delta> {
        let meta = fs::metadata(path)?;
        let mut reader = BufReader::new(File::open(path)?);
        let mut delta = self.delta(&mut reader, signature)?;
        delta.origin = OriginMetadata {
            size: meta.len(),
            mtime: unix_mtime(&meta),
            mode: unix_mode(&meta),
        };
        Ok(delta)
    }

    /// Replay a delta against a basis stream, writing the rebuilt content.
    ///
    /// Every written byte is hashed; the accumulated hash must equal the
    /// delta's `content_hash` or the output is reported corrupt. The writer
    /// is flushed before returning.
    ///
    /// # Errors
    ///
    /// [`Error::ShortCopy`] when a copy op references bytes the basis no
    /// longer has, [`Error::ChecksumMismatch`] when the rebuilt content does
    /// not hash to `content_hash`, or an I/O error.
    pub fn apply<B, W>(&self, basis: &mut B, delta: &Delta, out: &mut W) -> Result<()>
    where
        B: Read + Seek,
        W: Write,
    {
        let mut hasher = StrongHasher::new();
        let mut span = Vec::new();

        for op in &delta.ops {
            match op {
                DeltaOp::Literal { data, .. } => {
                    hasher.update(data);
                    out.write_all(data)?;
                }
                DeltaOp::Copy {
                    source_pos, size, ..
                } => {
                    basis.seek(SeekFrom::Start(*source_pos))?;
                    span.resize(*size as usize, 0);
                    read_full(basis, &mut span, *source_pos, *size)?;
                    hasher.update(&span);
                    out.write_all(&span)?;
                }
            }
        }
        out.flush()?;

        let actual = hasher.finish();
        if actual != delta.content_hash {
            return Err(Error::ChecksumMismatch {
                expected: delta.content_hash,
                actual,
            });
        }
        Ok(())
    }

    /// Patch a file in place.
    ///
    /// The rebuilt content is written to a sibling temp file
    /// (`<path>.blocksync`); on any failure the temp file is removed and the
    /// destination is untouched. On success the origin mtime and mode are
    /// applied to the temp file, which then atomically replaces the
    /// destination. The destination must already exist to serve as basis.
    ///
    /// # Errors
    ///
    /// Propagates replay errors from [`apply`](Self::apply) and any I/O
    /// error while staging or renaming.
    pub fn patch_file(&self, path: &Path, delta: &Delta) -> Result<()> {
        let tmp = temp_path(path);
        let result = self.stage_patch(path, delta, &tmp);
        if let Err(ref err) = result {
            warn!(path = %path.display(), error = %err, "patch discarded");
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn stage_patch(&self, path: &Path, delta: &Delta, tmp: &Path) -> Result<()> {
        let basis = File::open(path)?;
        let staged = File::create(tmp)?;
        {
            let mut reader = BufReader::new(basis);
            let mut writer = BufWriter::new(&staged);
            self.apply(&mut reader, delta, &mut writer)?;
        }

        staged.set_modified(system_time_from_unix(delta.origin.mtime))?;
        // a zero mode means the origin never captured one
        #[cfg(unix)]
        if delta.origin.mode != 0 {
            use std::os::unix::fs::PermissionsExt;
            staged.set_permissions(fs::Permissions::from_mode(delta.origin.mode))?;
        }
        drop(staged);

        fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Sibling staging path for a destination file.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_EXTENSION);
    PathBuf::from(name)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64, expected: u32) -> Result<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::ShortCopy {
                offset,
                expected,
                got: filled as u64,
            });
        }
        filled += n;
    }
    Ok(())
}

fn system_time_from_unix(secs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
