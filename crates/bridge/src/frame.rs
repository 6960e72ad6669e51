//! Newline framing over the gateway byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::{BridgeError, BridgeResult};

const DELIMITER: u8 = b'\n';

/// Default cap on one frame, delimiter excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Yields one newline-terminated frame per call, delimiter stripped.
///
/// Bytes of an unfinished frame are kept in `pending`, so a call that gets
/// cancelled (read timeout, shutdown) loses nothing: the next call picks up
/// where it stopped.
///
/// A line longer than `max_len` is dropped through its newline and reported
/// once as [`BridgeError::FrameTooLong`]; the reader stays usable.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    max_len: usize,
    /// Byte count of an oversized line still being skipped.
    skipped: Option<usize>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::with_capacity(128),
            max_len,
            skipped: None,
        }
    }

    pub async fn read_frame(&mut self) -> BridgeResult<Vec<u8>> {
        loop {
            // fill_buf is cancel-safe and nothing below awaits before consume.
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                let dropped = self.pending.len() + self.skipped.unwrap_or(0);
                if dropped > 0 {
                    tracing::debug!(dropped, "gateway closed mid-frame");
                }
                self.pending.clear();
                self.skipped = None;
                return Err(BridgeError::ConnectionClosed);
            }

            let (chunk, complete) = match buf.iter().position(|&b| b == DELIMITER) {
                Some(i) => (&buf[..i], true),
                None => (buf, false),
            };
            let used = chunk.len() + usize::from(complete);
            match self.skipped.as_mut() {
                Some(skipped) => *skipped += chunk.len(),
                None => self.pending.extend_from_slice(chunk),
            }
            self.reader.consume(used);

            if self.skipped.is_none() && self.pending.len() > self.max_len {
                self.skipped = Some(self.pending.len());
                self.pending.clear();
                self.pending.shrink_to(128);
            }
            if !complete {
                continue;
            }

            if let Some(len) = self.skipped.take() {
                return Err(BridgeError::FrameTooLong {
                    len,
                    limit: self.max_len,
                });
            }
            let mut frame = std::mem::take(&mut self.pending);
            // Serial-attached gateways terminate lines with CRLF.
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            return Ok(frame);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
