//! Byte-at-a-time delta scanner.
//!
//! The scanner walks the sender's stream one byte at a time, keeping a
//! rolling checksum of the trailing window and probing the signature index
//! at every position. Matched windows become `Copy` ops; bytes that never
//! matched are flushed as `Literal` ops. Extracted as an explicit state
//! struct so the algorithm is testable without any I/O.

use crate::checksum::RollingChecksum;
use crate::delta::DeltaOp;
use crate::signature::SignatureIndex;

/// Mutable scan state across stream chunks.
///
/// Feed the stream in any chunking with [`feed`](Self::feed), then call
/// [`finish`](Self::finish) once to flush the remainder. Ops accumulate in a
/// caller-owned vector so the driver can wrap the scan however it likes.
#[derive(Debug)]
pub struct Scanner {
    window: usize,
    /// Bytes consumed from the stream but not yet emitted as an op.
    buf: Vec<u8>,
    /// Cursor into `buf`; everything before it has been checksummed.
    cursor: usize,
    /// Total stream bytes the cursor has passed, across all ops.
    bytes_count: u64,
    rolling: RollingChecksum,
}

impl Scanner {
    /// Create a scanner for the signature's window size.
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            window: window as usize,
            buf: Vec::new(),
            cursor: 0,
            bytes_count: 0,
            rolling: RollingChecksum::new(window),
        }
    }

    /// Stream offset of `buf[0]`, which is where the next op lands.
    fn pending_pos(&self) -> u64 {
        self.bytes_count - self.cursor as u64
    }

    /// Consume the next stream chunk, emitting any ops it completes.
    ///
    /// Against an empty index the scanner only accumulates; the whole stream
    /// then flushes as a single literal in [`finish`](Self::finish).
    pub fn feed(&mut self, chunk: &[u8], index: &SignatureIndex<'_>, ops: &mut Vec<DeltaOp>) {
        self.buf.extend_from_slice(chunk);
        if index.is_empty() {
            return;
        }

        while self.cursor < self.buf.len() {
            if self.cursor >= self.window {
                self.rolling
                    .slide(self.buf[self.cursor], self.buf[self.cursor - self.window]);
            } else {
                self.rolling.eat(self.buf[self.cursor]);
            }

            // A full window ends at the cursor once enough bytes are in.
            if self.cursor + 1 >= self.window {
                let start = self.cursor + 1 - self.window;
                let span = &self.buf[start..=self.cursor];
                if let Some(matched) = index.find(self.rolling.value(), span) {
                    self.rolling.reset();
                    let missed_pos = self.pending_pos();
                    if start > 0 {
                        ops.push(DeltaOp::Literal {
                            dst_pos: missed_pos,
                            data: self.buf[..start].to_vec(),
                        });
                    }
                    ops.push(DeltaOp::Copy {
                        source_pos: matched.position,
                        dst_pos: missed_pos + start as u64,
                        size: matched.size,
                    });
                    self.buf.drain(..=self.cursor);
                    self.cursor = 0;
                    self.bytes_count += 1;
                    continue;
                }
            }

            self.cursor += 1;
            self.bytes_count += 1;
        }
    }

    /// Flush the unmatched remainder.
    ///
    /// The remainder gets one last whole-buffer probe, which is how a short
    /// final chunk of the basis is matched; otherwise it becomes a single
    /// literal. An empty remainder emits nothing.
    pub fn finish(self, index: &SignatureIndex<'_>, ops: &mut Vec<DeltaOp>) {
        if self.buf.is_empty() {
            return;
        }

        let dst_pos = self.pending_pos();
        if let Some(matched) = index.find(self.rolling.value(), &self.buf) {
            ops.push(DeltaOp::Copy {
                source_pos: matched.position,
                dst_pos,
                size: matched.size,
            });
        } else {
            ops.push(DeltaOp::Literal {
                dst_pos,
                data: self.buf,
            });
        }
    }
}
