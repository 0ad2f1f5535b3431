//! Incremental SSE framing over an arbitrarily chunked byte stream.
//!
//! Chunks are appended to a byte buffer and split on the blank-line
//! delimiter. The trailing partial frame stays buffered until the next
//! `feed`, so delimiters (and multi-byte UTF-8 characters) split across
//! chunks are handled without assuming chunks are self-contained.

use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{trace, warn};

/// Default bound on a single buffered, not-yet-delimited frame.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

const DELIMITER: &[u8] = b"\n\n";

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("SSE buffer exceeded {limit} bytes without a frame delimiter")]
    BufferOverflow { limit: usize },
    #[error("transport error: {0}")]
    Transport(String),
}

pub struct SseParser {
    buffer: Vec<u8>,
    max_buffer_bytes: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_buffer(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_bytes,
        }
    }

    /// Append a chunk and return every frame it completed, in order.
    ///
    /// Carriage returns are dropped so `\r\n\r\n` delimits like `\n\n`.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, SseError> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = find(&self.buffer[start..], DELIMITER) {
            let segment = &self.buffer[start..start + pos];
            start += pos + DELIMITER.len();
            if segment.iter().all(|b| *b == b'\n') {
                continue;
            }
            frames.push(decode_utf8(segment));
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_buffer_bytes {
            return Err(SseError::BufferOverflow {
                limit: self.max_buffer_bytes,
            });
        }

        trace!(frames = frames.len(), buffered = self.buffer.len(), "fed SSE chunk");
        Ok(frames)
    }

    /// Take whatever is left when the connection closes.
    ///
    /// A leftover without a trailing delimiter is an incomplete frame: it is
    /// reported as a protocol warning and returned for inspection.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        let leftover = decode_utf8(&rest);
        warn!(bytes = rest.len(), "connection closed with an incomplete SSE frame");
        Some(leftover)
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Turn a byte stream into a lazy stream of complete frames.
    ///
    /// Frames are yielded as soon as the chunk that completes them arrives.
    /// A transport error or buffer overflow ends the stream after yielding
    /// the error. The incomplete tail at close is logged and dropped.
    pub fn frames<S, E>(
        self,
        bytes: S,
    ) -> Pin<Box<dyn Stream<Item = Result<String, SseError>> + Send>>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        struct State<S> {
            bytes: Pin<Box<S>>,
            parser: SseParser,
            ready: std::collections::VecDeque<String>,
            finished: bool,
        }

        let state = State {
            bytes: Box::pin(bytes),
            parser: self,
            ready: std::collections::VecDeque::new(),
            finished: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.ready.pop_front() {
                    return Some((Ok(frame), state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => match state.parser.feed(&chunk) {
                        Ok(frames) => state.ready.extend(frames),
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    },
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(SseError::Transport(e.to_string())), state));
                    }
                    None => {
                        state.parser.flush();
                        state.finished = true;
                    }
                }
            }
        }))
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!(error = %e, "SSE frame is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
