//! Line-buffered decoding of Ollama's newline-delimited JSON stream.
//!
//! Bytes arrive in arbitrary TCP-sized pieces; [`NdjsonDecoder`] reassembles
//! complete lines across chunk boundaries and turns each into a
//! [`ResponseFragment`]. Lines that fail to parse are skipped.

use super::types::{ChatWireResponse, ResponseFragment};

/// A single line longer than this is discarded instead of growing the buffer.
const MAX_LINE_BYTES: usize = 64 * 1024;

pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            skipped: 0,
        }
    }

    /// Feed a chunk and return the fragments of every line it completes, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ResponseFragment> {
        let mut fragments = Vec::new();
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(fragment) = self.decode_line(&line) {
                fragments.push(fragment);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Discarding oversized backend stream line"
            );
            self.buffer.clear();
            self.skipped += 1;
        }

        fragments
    }

    /// Decode whatever remains after the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<ResponseFragment> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    /// Number of lines dropped as malformed or oversized so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<ResponseFragment> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(_) => {
                self.skipped += 1;
                tracing::debug!("Skipping non-UTF-8 backend stream line");
                return None;
            }
        };
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<ChatWireResponse>(line) {
            Ok(parsed) => Some(parsed.into_fragment()),
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(error = %e, "Skipping malformed backend stream line");
                None
            }
        }
    }
}
