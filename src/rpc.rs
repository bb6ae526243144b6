//! Framed request/response transport between watcher and server.
//!
//! One TCP connection carries a sequence of frames, each a fixed header
//! (magic, version, payload length) followed by a bincode payload. Calls are
//! strictly synchronous: one request, one response, in order. Signatures and
//! deltas cross the boundary as codec byte strings inside the payload, so
//! the binary format is the single source of truth for both artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::signature::Signature;
use crate::sync::Engine;
use crate::tree::{self, FileMeta};

/// Magic bytes opening every frame.
pub const RPC_MAGIC: [u8; 4] = *b"BSYN";
/// Protocol version carried in every frame.
pub const RPC_VERSION: u8 = 1;
/// Upper bound on a frame payload; deltas carry whole files.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

const HEADER_SIZE: usize = 9;

/// Procedures the server answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// List all directories under the served root.
    Dirs,
    /// Create a directory (and parents).
    Mkdir {
        /// Root-relative directory path.
        path: String,
    },
    /// Remove a file or directory tree.
    Rmdir {
        /// Root-relative path.
        path: String,
    },
    /// List all files under the served root with their metadata.
    Files,
    /// Compute the signature of a file; absent files yield an empty one.
    Signature {
        /// Root-relative file path.
        path: String,
    },
    /// Apply a delta to a file, creating it empty first if absent.
    Patch {
        /// Root-relative file path.
        path: String,
        /// Codec-serialized delta.
        delta: Vec<u8>,
    },
}

/// Server answers, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Directory set for [`Request::Dirs`].
    Dirs(BTreeSet<String>),
    /// File table for [`Request::Files`].
    Files(BTreeMap<String, FileMeta>),
    /// Codec-serialized signature for [`Request::Signature`].
    Signature(Vec<u8>),
    /// Whether a [`Request::Patch`] applied cleanly.
    Patched(bool),
    /// Acknowledgement for requests with no payload.
    Done,
    /// The request could not be served.
    Err(String),
}

/// Write one frame: header plus bincode payload.
///
/// # Errors
///
/// [`Error::Protocol`] if the payload exceeds [`MAX_FRAME_SIZE`] or cannot
/// be serialized, otherwise I/O errors from the stream.
pub fn write_frame<T: Serialize, W: Write>(stream: &mut W, message: &T) -> Result<()> {
    let payload = bincode::serialize(message).map_err(|e| Error::Protocol(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_SIZE)
        .ok_or_else(|| Error::Protocol(format!("frame too large: {} bytes", payload.len())))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&RPC_MAGIC);
    header[4] = RPC_VERSION;
    header[5..9].copy_from_slice(&len.to_le_bytes());
    stream.write_all(&header)?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

/// Read one frame, validating the header before touching the payload.
///
/// # Errors
///
/// [`Error::Protocol`] on bad magic, unknown version, oversized length or a
/// payload that does not deserialize; I/O errors on a truncated stream.
pub fn read_frame<T: DeserializeOwned, R: Read>(stream: &mut R) -> Result<T> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header)?;
    if header[0..4] != RPC_MAGIC {
        return Err(Error::Protocol("bad frame magic".into()));
    }
    if header[4] != RPC_VERSION {
        return Err(Error::Protocol(format!("unknown version {}", header[4])));
    }
    let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    bincode::deserialize(&payload).map_err(|e| Error::Protocol(e.to_string()))
}

/// Client side of one connection.
///
/// Not shareable; the watcher gives every worker its own client so no lock
/// is ever held across network I/O.
#[derive(Debug)]
pub struct RpcClient {
    stream: TcpStream,
}

impl RpcClient {
    /// Connect to a server.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection fails.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Ok(Self { stream })
    }

    /// Send one request and read its response.
    ///
    /// # Errors
    ///
    /// Propagates framing and I/O errors; a [`Response::Err`] from the
    /// server becomes [`Error::Protocol`].
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request)?;
        let response: Response = read_frame(&mut self.stream)?;
        if let Response::Err(message) = response {
            return Err(Error::Protocol(message));
        }
        Ok(response)
    }

    /// Remote directory set.
    ///
    /// # Errors
    ///
    /// Call failures, or [`Error::Protocol`] on an unexpected answer.
    pub fn dirs(&mut self) -> Result<BTreeSet<String>> {
        match self.call(&Request::Dirs)? {
            Response::Dirs(set) => Ok(set),
            other => Err(unexpected(&other)),
        }
    }

    /// Create a remote directory.
    ///
    /// # Errors
    ///
    /// Call failures, or [`Error::Protocol`] on an unexpected answer.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        match self.call(&Request::Mkdir { path: path.into() })? {
            Response::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Remove a remote file or directory tree.
    ///
    /// # Errors
    ///
    /// Call failures, or [`Error::Protocol`] on an unexpected answer.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        match self.call(&Request::Rmdir { path: path.into() })? {
            Response::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Remote file table.
    ///
    /// # Errors
    ///
    /// Call failures, or [`Error::Protocol`] on an unexpected answer.
    pub fn files(&mut self) -> Result<BTreeMap<String, FileMeta>> {
        match self.call(&Request::Files)? {
            Response::Files(table) => Ok(table),
            other => Err(unexpected(&other)),
        }
    }

    /// Signature of a remote file, decoded from its codec bytes.
    ///
    /// # Errors
    ///
    /// Call failures, codec decode failures, or [`Error::Protocol`] on an
    /// unexpected answer.
    pub fn signature(&mut self, path: &str) -> Result<Signature> {
        match self.call(&Request::Signature { path: path.into() })? {
            Response::Signature(bytes) => codec::read_signature(&mut Cursor::new(bytes)),
            other => Err(unexpected(&other)),
        }
    }

    /// Patch a remote file with a delta; `true` when it applied cleanly.
    ///
    /// # Errors
    ///
    /// Call failures, or [`Error::Protocol`] on an unexpected answer.
    pub fn patch(&mut self, path: &str, delta: &Delta) -> Result<bool> {
        let bytes = codec::delta_to_bytes(delta)?;
        match self.call(&Request::Patch {
            path: path.into(),
            delta: bytes,
        })? {
            Response::Patched(applied) => Ok(applied),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Protocol(format!("unexpected response: {response:?}"))
}

/// Serve a directory tree until the listener fails.
///
/// Each connection gets its own thread and is dropped on the first
/// malformed frame; request failures are answered, logged and never fatal.
///
/// # Errors
///
/// Returns an I/O error if accepting connections fails.
pub fn serve(listener: TcpListener, root: PathBuf, engine: Engine) -> Result<()> {
    info!(root = %root.display(), addr = %listener.local_addr()?, "serving");
    loop {
        let (stream, peer) = listener.accept()?;
        debug!(%peer, "connection accepted");
        let root = root.clone();
        thread::spawn(move || {
            handle_connection(stream, &root, engine);
            debug!(%peer, "connection closed");
        });
    }
}

fn handle_connection(mut stream: TcpStream, root: &Path, engine: Engine) {
    loop {
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(Error::Io(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return,
            Err(err) => {
                warn!(error = %err, "dropping connection");
                return;
            }
        };
        let response = dispatch(&request, root, engine);
        if let Err(err) = write_frame(&mut stream, &response) {
            warn!(error = %err, "failed to answer, dropping connection");
            return;
        }
    }
}

fn dispatch(request: &Request, root: &Path, engine: Engine) -> Response {
    match request {
        Request::Dirs => match tree::dirs(root) {
            Ok(set) => Response::Dirs(set),
            Err(err) => Response::Err(err.to_string()),
        },
        Request::Files => match tree::files(root) {
            Ok(table) => Response::Files(table),
            Err(err) => Response::Err(err.to_string()),
        },
        Request::Mkdir { path } => with_escaped(root, path, |local| {
            tree::mkdir(&local)?;
            Ok(Response::Done)
        }),
        Request::Rmdir { path } => with_escaped(root, path, |local| {
            tree::remove_all(&local)?;
            Ok(Response::Done)
        }),
        Request::Signature { path } => with_escaped(root, path, |local| {
            let signature = if local.is_file() {
                engine.signature(&mut BufReader::new(File::open(&local)?))?
            } else {
                // an absent destination has an empty signature
                Signature {
                    window_size: engine.window(),
                    chunks: Vec::new(),
                }
            };
            Ok(Response::Signature(codec::signature_to_bytes(&signature)?))
        }),
        Request::Patch { path, delta } => with_escaped(root, path, |local| {
            let delta = codec::read_delta(&mut Cursor::new(delta))?;
            if !local.exists() {
                fs::write(&local, b"")?;
            }
            match engine.patch_file(&local, &delta) {
                Ok(()) => Ok(Response::Patched(true)),
                Err(err) => {
                    warn!(path = %local.display(), error = %err, "patch failed");
                    Ok(Response::Patched(false))
                }
            }
        }),
    }
}

fn with_escaped<F>(root: &Path, path: &str, action: F) -> Response
where
    F: FnOnce(PathBuf) -> Result<Response>,
{
    // escape collapses traversal; the root itself is never a valid target
    let Some(clean) = tree::escape(path) else {
        return Response::Err(format!("invalid path: {path:?}"));
    };
    match action(root.join(clean)) {
        Ok(response) => response,
        Err(err) => Response::Err(err.to_string()),
    }
}
