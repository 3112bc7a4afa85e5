//! Newline-delimited JSON framing over a byte stream.
//!
//! The decoder consumes bytes until it sees `\n`, parses the preceding
//! bytes as one JSON value, and emits it. Decoding is chunk-agnostic:
//! feeding one byte at a time yields the same frames as feeding the whole
//! stream at once. A line that fails to parse is discarded and reported
//! as an error for that line only; the stream stays usable.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FabricError, Result};

/// Upper bound on a single frame; a line that grows past this without a
/// terminator closes the connection
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Incremental newline splitter and JSON parser
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from the stream
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if any. Blank lines are skipped;
    /// a non-blank line that is not valid JSON yields the parse error.
    pub fn next_frame(&mut self) -> Option<std::result::Result<Value, serde_json::Error>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];

            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Some(serde_json::from_slice(line));
        }
    }

    /// Bytes buffered without a terminator yet
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Async frame reader over one half of a connection
pub struct FrameStream<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    /// Wrap a read half
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next frame. `Ok(None)` means the stream closed cleanly;
    /// a [`FabricError::Protocol`] means the current line was garbage and
    /// the caller may keep reading.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(parsed) = self.decoder.next_frame() {
                return match parsed {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => Err(FabricError::Protocol(format!("invalid frame: {e}"))),
                };
            }

            // Fatal, unlike a bad line: the buffer can never drain, so
            // the connection must close
            if self.decoder.buffered() > MAX_FRAME_BYTES {
                return Err(FabricError::Transport("frame exceeds maximum size".to_string()));
            }

            let mut chunk = [0u8; 8192];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                // Trailing bytes without a terminator are dropped
                return Ok(None);
            }
            self.decoder.feed(&chunk[..n]);
        }
    }
}

/// Serialize one frame and write it with its `\n` terminator
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
