//! Stream framing: one JSON envelope per line.
//!
//! Rules:
//! - Encoder writes compact JSON followed by a single `\n`. JSON escapes
//!   control characters, so a frame never contains a raw newline.
//! - Decoder accepts an optional trailing `\r` and skips empty lines.
//! - A line longer than the configured maximum is a protocol error; the
//!   framer never buffers without bound.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};
use crate::protocol::envelope::Envelope;

/// Default maximum frame size (bytes, excluding the newline).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Encode one envelope as a newline-terminated frame.
pub fn encode_frame(env: &Envelope) -> Result<Bytes> {
    let json = env.to_json()?;
    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.put_slice(json.as_bytes());
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decode one frame. The trailing newline is optional.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope> {
    let line = trim_line_end(frame);
    let text = std::str::from_utf8(line)
        .map_err(|e| RelayError::Protocol(format!("frame is not utf-8: {e}")))?;
    Envelope::from_json(text)
}

fn trim_line_end(mut frame: &[u8]) -> &[u8] {
    if let Some(rest) = frame.strip_suffix(b"\n") {
        frame = rest;
    }
    if let Some(rest) = frame.strip_suffix(b"\r") {
        frame = rest;
    }
    frame
}

/// Incremental line splitter for a byte stream.
///
/// Callers read socket data into [`LineFramer::buffer_mut`] and then pull
/// complete lines out with [`LineFramer::next_frame`].
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_frame_bytes: usize,
}

impl LineFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_frame_bytes.min(8 * 1024)),
            max_frame_bytes,
        }
    }

    /// Read target for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete, non-empty line (without its terminator), if any.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > self.max_frame_bytes {
                    return Err(RelayError::Protocol(format!(
                        "frame too large: {} bytes without newline (max {})",
                        self.buf.len(),
                        self.max_frame_bytes
                    )));
                }
                return Ok(None);
            };

            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if line.len() > self.max_frame_bytes {
                return Err(RelayError::Protocol(format!(
                    "frame too large: {} bytes (max {})",
                    line.len(),
                    self.max_frame_bytes
                )));
            }
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    /// Drop any partially buffered data.
    pub fn clear(&mut self) {
        self.buf.advance(self.buf.len());
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
