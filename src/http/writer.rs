//! Bounded streaming output writer.
//!
//! [`StreamWriter`] accumulates formatted or raw bytes in a [`FixedBuffer`].
//! It runs in one of two modes:
//!
//! - **Buffered** (no sink): the whole output must fit in the buffer. Any write
//!   that does not fit marks the writer invalid.
//! - **Streaming** (sink enabled via [`StreamWriter::enable_sink`]): when a write
//!   does not fit, the current contents are handed to the sink, the buffer is
//!   cleared and the write is retried once. A single formatted write larger than
//!   the whole buffer still marks the writer invalid.
//!
//! Once invalid, every operation is a no-op until [`StreamWriter::reset`].
//! The sink is borrowed for the lifetime of the writer, which is the lifetime
//! of one response.

use std::fmt;

use thiserror::Error;

use super::buffer::FixedBuffer;
use crate::tunnel::TransportError;

/// Failure reported by a [`ResponseSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Destination for flushed output: a socket, a tunnel message stream, or memory.
pub trait ResponseSink {
    /// Deliver one full buffer's worth of output. More will follow.
    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Push delivered bytes toward the peer.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Deliver the final bytes (possibly empty) and close the logical stream.
    fn end(&mut self, tail: &[u8]) -> Result<(), SinkError>;
}

/// In-memory sink, mostly useful for capturing streamed output.
impl ResponseSink for Vec<u8> {
    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn end(&mut self, tail: &[u8]) -> Result<(), SinkError> {
        self.extend_from_slice(tail);
        Ok(())
    }
}

/// Adapts a [`FixedBuffer`] to `fmt::Write`, failing instead of truncating.
struct Bounded<'a>(&'a mut FixedBuffer);

impl fmt::Write for Bounded<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.append(s.as_bytes()).map(|_| ()).map_err(|_| fmt::Error)
    }
}

/// Fixed-capacity writer that optionally streams to a borrowed sink.
pub struct StreamWriter<'s> {
    buf: FixedBuffer,
    sink: Option<&'s mut dyn ResponseSink>,
    valid: bool,
    ended: bool,
    /// Bytes already handed to the sink.
    flushed: usize,
    /// Highest buffer occupancy seen since the last reset.
    peak: usize,
}

impl<'s> StreamWriter<'s> {
    pub fn new(capacity: usize) -> Self {
        Self::with_buffer(FixedBuffer::new(capacity))
    }

    /// Reuse an existing buffer. Its contents are discarded.
    pub fn with_buffer(mut buf: FixedBuffer) -> Self {
        buf.reset();
        Self {
            buf,
            sink: None,
            valid: true,
            ended: false,
            flushed: 0,
            peak: 0,
        }
    }

    /// Switch to streaming mode. Output already buffered is kept and goes out
    /// with the first flush.
    pub fn enable_sink(&mut self, sink: &'s mut dyn ResponseSink) {
        self.sink = Some(sink);
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    /// Append formatted output (`format_args!`).
    pub fn write_formatted(&mut self, args: fmt::Arguments<'_>) {
        if !self.valid || self.ended {
            return;
        }
        if self.try_format(args) {
            return;
        }
        if self.sink.is_none() || !self.flush_buffer() {
            self.valid = false;
            return;
        }
        if !self.try_format(args) {
            self.valid = false;
        }
    }

    /// Append raw bytes. Binary safe.
    ///
    /// In streaming mode a payload larger than the buffer is passed through in
    /// buffer-sized pieces, so memory use stays bounded.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        if !self.valid || self.ended {
            return;
        }
        if self.buf.fits(bytes.len()) {
            self.append(bytes);
            return;
        }
        if self.sink.is_none() || self.buf.capacity() == 0 {
            self.valid = false;
            return;
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            if self.buf.is_full() && !self.flush_buffer() {
                return;
            }
            let n = rest.len().min(self.buf.remaining());
            self.append(&rest[..n]);
            rest = &rest[n..];
        }
    }

    /// Flush whatever is buffered and signal completion to the sink.
    ///
    /// Returns the writer's validity. Without a sink this is a no-op: the
    /// output stays in the buffer for the caller to take.
    pub fn end(&mut self) -> bool {
        if !self.valid || self.ended {
            return self.valid;
        }
        let Some(sink) = self.sink.as_mut() else {
            return true;
        };
        self.ended = true;
        if let Err(e) = sink.end(self.buf.as_slice()) {
            tracing::debug!("Writer: sink end failed: {e}");
            self.valid = false;
            return false;
        }
        self.flushed += self.buf.len();
        self.buf.reset();
        true
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Total bytes written: already flushed plus still buffered.
    pub fn total_length(&self) -> usize {
        self.flushed + self.buf.len()
    }

    /// Bytes already handed to the sink. Zero means nothing reached the peer.
    pub fn flushed_length(&self) -> usize {
        self.flushed
    }

    /// Currently buffered bytes (the whole output in buffered mode).
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn peak_len(&self) -> usize {
        self.peak
    }

    /// Clear output and error state. The sink, if any, stays attached.
    pub fn reset(&mut self) {
        self.buf.reset();
        self.valid = true;
        self.ended = false;
        self.flushed = 0;
        self.peak = 0;
    }

    /// Give the buffer back for reuse.
    pub fn into_buffer(self) -> FixedBuffer {
        self.buf
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.buf.append(bytes).is_err() {
            self.valid = false;
        }
        self.peak = self.peak.max(self.buf.len());
    }

    fn try_format(&mut self, args: fmt::Arguments<'_>) -> bool {
        let mark = self.buf.len();
        if fmt::write(&mut Bounded(&mut self.buf), args).is_ok() {
            self.peak = self.peak.max(self.buf.len());
            return true;
        }
        self.buf.rollback(mark);
        false
    }

    /// Hand the buffered bytes to the sink. Marks the writer invalid on failure.
    fn flush_buffer(&mut self) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        if self.buf.is_empty() {
            return true;
        }
        let result = sink
            .write(self.buf.as_slice())
            .and_then(|()| sink.flush());
        if let Err(e) = result {
            tracing::debug!("Writer: sink write failed: {e}");
            self.valid = false;
            return false;
        }
        self.flushed += self.buf.len();
        self.buf.reset();
        true
    }
}

impl fmt::Debug for StreamWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("buf", &self.buf)
            .field("streaming", &self.sink.is_some())
            .field("valid", &self.valid)
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}
