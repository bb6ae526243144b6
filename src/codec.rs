//! Binary serialization of signatures and deltas.
//!
//! Both artifacts serialize to a little-endian stream opened by a constant
//! ASCII tag. Decoding checks the tag first and fails closed; streams are
//! otherwise trusted, there is no per-field validation beyond structure.
//!
//! On the wire a delta op is a single record; a literal is marked by a
//! `u64::MAX` source position. The in-memory [`DeltaOp`] keeps the two
//! variants separate, the sentinel exists only here.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::delta::{Delta, DeltaOp, OriginMetadata};
use crate::error::{Error, Result};
use crate::hash::StrongHash;
use crate::signature::{Chunk, Signature};

/// Tag opening a serialized signature.
pub const SIGNATURE_TAG: &[u8] = b"blocksync::signature";
/// Tag opening a serialized delta.
pub const DELTA_TAG: &[u8] = b"blocksync::delta";

/// Wire marker for a literal op's absent source position.
const LITERAL_SENTINEL: u64 = u64::MAX;

/// Serialize a signature.
///
/// # Errors
///
/// Returns an I/O error if writing fails.
pub fn write_signature<W: Write>(out: &mut W, signature: &Signature) -> Result<()> {
    out.write_all(SIGNATURE_TAG)?;
    out.write_all(&signature.window_size.to_le_bytes())?;
    out.write_all(&(signature.chunks.len() as u64).to_le_bytes())?;
    for chunk in &signature.chunks {
        out.write_all(&chunk.position.to_le_bytes())?;
        out.write_all(&chunk.size.to_le_bytes())?;
        out.write_all(&chunk.weak_hash.to_le_bytes())?;
        write_bytes(out, chunk.strong_hash.as_bytes())?;
    }
    Ok(())
}

/// Deserialize a signature.
///
/// # Errors
///
/// [`Error::UnrecognizedFormat`] if the stream does not open with the
/// signature tag, or an I/O error on a truncated stream.
pub fn read_signature<R: Read>(input: &mut R) -> Result<Signature> {
    expect_tag(input, SIGNATURE_TAG, "blocksync::signature")?;
    let window_size = read_u32(input)?;
    let count = read_u64(input)?;

    let mut chunks = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for _ in 0..count {
        let position = read_u64(input)?;
        let size = read_u32(input)?;
        let weak_hash = read_u32(input)?;
        let strong_hash = read_hash(input)?;
        chunks.push(Chunk {
            position,
            size,
            weak_hash,
            strong_hash,
        });
    }

    Ok(Signature {
        window_size,
        chunks,
    })
}

/// Serialize a delta.
///
/// # Errors
///
/// Returns an I/O error if writing fails.
pub fn write_delta<W: Write>(out: &mut W, delta: &Delta) -> Result<()> {
    out.write_all(DELTA_TAG)?;
    out.write_all(&delta.origin.size.to_le_bytes())?;
    out.write_all(&delta.origin.mtime.to_le_bytes())?;
    out.write_all(&delta.origin.mode.to_le_bytes())?;
    write_bytes(out, delta.content_hash.as_bytes())?;
    out.write_all(&(delta.ops.len() as u64).to_le_bytes())?;
    for op in &delta.ops {
        match op {
            DeltaOp::Copy {
                source_pos,
                dst_pos,
                size,
            } => {
                out.write_all(&source_pos.to_le_bytes())?;
                out.write_all(&dst_pos.to_le_bytes())?;
                out.write_all(&0u64.to_le_bytes())?;
                out.write_all(&size.to_le_bytes())?;
            }
            DeltaOp::Literal { dst_pos, data } => {
                out.write_all(&LITERAL_SENTINEL.to_le_bytes())?;
                out.write_all(&dst_pos.to_le_bytes())?;
                out.write_all(&(data.len() as u64).to_le_bytes())?;
                out.write_all(data)?;
                out.write_all(&(data.len() as u32).to_le_bytes())?;
            }
        }
    }
    Ok(())
}

/// Deserialize a delta.
///
/// # Errors
///
/// [`Error::UnrecognizedFormat`] if the stream does not open with the delta
/// tag, or an I/O error on a truncated stream.
pub fn read_delta<R: Read>(input: &mut R) -> Result<Delta> {
    expect_tag(input, DELTA_TAG, "blocksync::delta")?;
    let origin = OriginMetadata {
        size: read_u64(input)?,
        mtime: read_i64(input)?,
        mode: read_u32(input)?,
    };
    let content_hash = read_hash(input)?;
    let count = read_u64(input)?;

    let mut ops = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for _ in 0..count {
        let source_pos = read_u64(input)?;
        let dst_pos = read_u64(input)?;
        let data_len = read_u64(input)?;
        let mut data = vec![0u8; usize::try_from(data_len).map_err(|_| too_large(data_len))?];
        input.read_exact(&mut data)?;
        let size = read_u32(input)?;

        ops.push(if source_pos == LITERAL_SENTINEL {
            DeltaOp::Literal { dst_pos, data }
        } else {
            DeltaOp::Copy {
                source_pos,
                dst_pos,
                size,
            }
        });
    }

    Ok(Delta {
        origin,
        content_hash,
        ops,
    })
}

/// Serialize a signature into a fresh buffer.
///
/// # Errors
///
/// Never fails in practice; declared fallible for symmetry with the stream
/// writers.
pub fn signature_to_bytes(signature: &Signature) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_signature(&mut buf, signature)?;
    Ok(buf)
}

/// Serialize a delta into a fresh buffer.
///
/// # Errors
///
/// Never fails in practice; declared fallible for symmetry with the stream
/// writers.
pub fn delta_to_bytes(delta: &Delta) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_delta(&mut buf, delta)?;
    Ok(buf)
}

/// Write a signature to a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn save_signature(path: &Path, signature: &Signature) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_signature(&mut out, signature)?;
    out.flush()?;
    Ok(())
}

/// Read a signature from a file.
///
/// # Errors
///
/// Propagates [`read_signature`] failures and file-open errors.
pub fn load_signature(path: &Path) -> Result<Signature> {
    read_signature(&mut BufReader::new(File::open(path)?))
}

/// Write a delta to a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn save_delta(path: &Path, delta: &Delta) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_delta(&mut out, delta)?;
    out.flush()?;
    Ok(())
}

/// Read a delta from a file.
///
/// # Errors
///
/// Propagates [`read_delta`] failures and file-open errors.
pub fn load_delta(path: &Path) -> Result<Delta> {
    read_delta(&mut BufReader::new(File::open(path)?))
}

fn expect_tag<R: Read>(input: &mut R, tag: &[u8], name: &'static str) -> Result<()> {
    let mut found = vec![0u8; tag.len()];
    input.read_exact(&mut found)?;
    if found != tag {
        return Err(Error::UnrecognizedFormat { expected: name });
    }
    Ok(())
}

fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(&(bytes.len() as u64).to_le_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

fn read_hash<R: Read>(input: &mut R) -> Result<StrongHash> {
    let len = read_u64(input)?;
    if len != 16 {
        return Err(Error::Protocol(format!("bad hash length {len}")));
    }
    let mut bytes = [0u8; 16];
    input.read_exact(&mut bytes)?;
    Ok(StrongHash::from_bytes(bytes))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(input: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64<R: Read>(input: &mut R) -> Result<i64> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

fn too_large(len: u64) -> Error {
    Error::Protocol(format!("literal length {len} exceeds address space"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_signature() -> Signature {
        Signature::build(&mut Cursor::new(vec![7u8; 2500].as_slice()), 1000).unwrap()
    }

    fn sample_delta() -> Delta {
        Delta {
            origin: OriginMetadata {
                size: 12,
                mtime: -42,
                mode: 0o100_755,
            },
            content_hash: StrongHash::compute(b"xhello world"),
            ops: vec![
                DeltaOp::Literal {
                    dst_pos: 0,
                    data: b"x".to_vec(),
                },
                DeltaOp::Copy {
                    source_pos: 0,
                    dst_pos: 1,
                    size: 11,
                },
            ],
        }
    }

    #[test]
    fn signature_roundtrip() {
        let original = sample_signature();
        let bytes = signature_to_bytes(&original).unwrap();
        let restored = read_signature(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn empty_signature_roundtrip() {
        let original = Signature {
            window_size: 1000,
            chunks: Vec::new(),
        };
        let bytes = signature_to_bytes(&original).unwrap();
        let restored = read_signature(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn delta_roundtrip() {
        let original = sample_delta();
        let bytes = delta_to_bytes(&original).unwrap();
        let restored = read_delta(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn signature_stream_layout() {
        let sig = Signature {
            window_size: 1000,
            chunks: vec![Chunk {
                position: 0,
                size: 24,
                weak_hash: 0x0102_0304,
                strong_hash: StrongHash::from_bytes([0xab; 16]),
            }],
        };
        let bytes = signature_to_bytes(&sig).unwrap();

        assert!(bytes.starts_with(SIGNATURE_TAG));
        let body = &bytes[SIGNATURE_TAG.len()..];
        assert_eq!(&body[0..4], 1000u32.to_le_bytes());
        assert_eq!(&body[4..12], 1u64.to_le_bytes());
        assert_eq!(&body[12..20], 0u64.to_le_bytes()); // position
        assert_eq!(&body[20..24], 24u32.to_le_bytes()); // size
        assert_eq!(&body[24..28], 0x0102_0304u32.to_le_bytes());
        assert_eq!(&body[28..36], 16u64.to_le_bytes());
        assert_eq!(&body[36..52], [0xab; 16]);
        assert_eq!(body.len(), 52);
    }

    #[test]
    fn literal_uses_sentinel_on_wire() {
        let delta = Delta {
            origin: OriginMetadata::default(),
            content_hash: StrongHash::zero(),
            ops: vec![DeltaOp::Literal {
                dst_pos: 5,
                data: b"ab".to_vec(),
            }],
        };
        let bytes = delta_to_bytes(&delta).unwrap();

        // tag + origin (8+8+4) + hash (8+16) + op count (8) = first op record
        let op = &bytes[DELTA_TAG.len() + 20 + 24 + 8..];
        assert_eq!(&op[0..8], u64::MAX.to_le_bytes());
        assert_eq!(&op[8..16], 5u64.to_le_bytes());
        assert_eq!(&op[16..24], 2u64.to_le_bytes());
        assert_eq!(&op[24..26], b"ab");
    }

    #[test]
    fn wrong_tag_fails_closed() {
        let sig_bytes = signature_to_bytes(&sample_signature()).unwrap();
        let err = read_delta(&mut Cursor::new(&sig_bytes)).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));

        let err = read_signature(&mut Cursor::new(b"garbage data here, long enough")).unwrap_err();
        assert!(matches!(
            err,
            Error::UnrecognizedFormat {
                expected: "blocksync::signature"
            }
        ));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let bytes = delta_to_bytes(&sample_delta()).unwrap();
        let err = read_delta(&mut Cursor::new(&bytes[..bytes.len() - 3])).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn file_save_load() {
        let dir = tempfile::tempdir().unwrap();

        let sig_path = dir.path().join("basis.sig");
        let sig = sample_signature();
        save_signature(&sig_path, &sig).unwrap();
        assert_eq!(load_signature(&sig_path).unwrap(), sig);

        let delta_path = dir.path().join("update.delta");
        let delta = sample_delta();
        save_delta(&delta_path, &delta).unwrap();
        assert_eq!(load_delta(&delta_path).unwrap(), delta);
    }
}
