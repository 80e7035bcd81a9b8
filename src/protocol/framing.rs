//! Splits a raw serial byte stream into terminator-delimited frames.

use super::TERMINATOR;
use tracing::warn;

/// Default upper bound on an unterminated payload, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// Incremental frame splitter for one serial connection.
///
/// Bytes are accumulated until a `;` arrives; the accumulated payload is then
/// trimmed and returned. Empty payloads (back-to-back terminators, leading
/// terminator, whitespace only) are dropped. The reader owns no I/O, so a
/// session can feed it from whatever read loop it runs and `reset()` it when
/// the connection is reopened.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    max_frame_len: usize,
    overflowed: bool,
}

impl FrameReader {
    /// Create a reader with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a reader that discards payloads longer than `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            max_frame_len: max_frame_len.max(1),
            overflowed: false,
        }
    }

    /// Feed freshly read bytes; returns every frame they complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();

        for &byte in bytes {
            if byte == TERMINATOR as u8 {
                if self.overflowed {
                    // Tail of a discarded payload.
                    self.overflowed = false;
                } else if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                self.buffer.clear();
                continue;
            }

            if self.overflowed {
                continue;
            }

            if self.buffer.len() >= self.max_frame_len {
                warn!(
                    limit = self.max_frame_len,
                    "Discarding unterminated payload over frame limit"
                );
                self.buffer.clear();
                self.overflowed = true;
                continue;
            }

            self.buffer.push(byte);
        }

        frames
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial payload and start a fresh frame sequence.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    fn take_frame(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buffer);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminator_and_trims() {
        let mut reader = FrameReader::new();
        let frames = reader.push(b"  1.5,2.0 ;hello world;\r\n42.0;");
        assert_eq!(frames, vec!["1.5,2.0", "hello world", "42.0"]);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn frames_can_span_reads() {
        let mut reader = FrameReader::new();
        assert!(reader.push(b"SENSOR_AU").is_empty());
        assert!(reader.push(b"TO:1.0,").is_empty());
        assert_eq!(reader.push(b"2.0;3"), vec!["SENSOR_AUTO:1.0,2.0"]);
        assert_eq!(reader.pending(), 1);
        assert_eq!(reader.push(b";"), vec!["3"]);
    }

    #[test]
    fn empty_payloads_are_dropped() {
        let mut reader = FrameReader::new();
        assert!(reader.push(b";;;  \n ;").is_empty());
        assert_eq!(reader.push(b";;S;;"), vec!["S"]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let mut reader = FrameReader::new();
        let frames = reader.push(&[b'o', b'k', 0xFF, b';']);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("ok"));
    }

    #[test]
    fn oversized_payload_is_discarded_up_to_next_terminator() {
        let mut reader = FrameReader::with_max_frame_len(4);
        assert!(reader.push(b"123456789").is_empty());
        assert_eq!(reader.push(b"0;7;"), vec!["7"]);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut reader = FrameReader::new();
        reader.push(b"12.");
        reader.reset();
        assert_eq!(reader.push(b"5;"), vec!["5"]);
    }
}
