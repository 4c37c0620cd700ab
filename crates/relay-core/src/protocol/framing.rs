//! Newline framing for the producer → broker byte stream.
//!
//! A Unix stream socket is a *stream*: one `read()` may return half a line,
//! or three lines and the start of a fourth.  [`LineBuffer`] accumulates the
//! bytes and hands out complete lines one at a time.
//!
//! # Framing rules
//!
//! - A line is everything before the first `\n`.  The remainder stays
//!   buffered as the start of the next line.
//! - Bytes without a terminator are *not yet a message* and are never handed
//!   out, no matter how long the producer waits before finishing the line.
//! - A trailing `\r` and surrounding whitespace are trimmed.
//! - A line longer than the configured limit is dropped as a whole and
//!   reported once, when its terminator finally arrives.  Producers therefore
//!   still get exactly one reply per line they sent.

use thiserror::Error;

/// The request/reply line terminator.
pub const TERMINATOR: u8 = b'\n';

/// Default maximum line length in bytes, excluding the terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Reasons a complete line cannot be forwarded.
///
/// The `Display` text is what the broker sends back after `ERROR:`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The line was empty after trimming.
    #[error("empty message")]
    Empty,

    /// The line was longer than the configured limit.
    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },

    /// The line contained bytes that are not valid UTF-8.
    #[error("message is not valid UTF-8")]
    NotText,
}

/// Accumulates stream bytes and splits them into complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line_len: usize,
    /// Set while dropping the remainder of an oversized line.
    discarding: bool,
    /// An oversized line has been terminated and still needs reporting.
    overflow_pending: bool,
}

impl LineBuffer {
    /// Creates an empty buffer that rejects lines longer than `max_line_len`.
    ///
    /// A limit of zero is treated as one byte.
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_line_len.clamp(1, DEFAULT_MAX_LINE_LEN)),
            max_line_len: max_line_len.max(1),
            discarding: false,
            overflow_pending: false,
        }
    }

    /// Appends bytes received from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        if !self.discarding {
            self.buf.extend_from_slice(bytes);
            return;
        }

        // Still inside an oversized line: skip up to its terminator.
        if let Some(pos) = bytes.iter().position(|&b| b == TERMINATOR) {
            self.discarding = false;
            self.overflow_pending = true;
            self.buf.extend_from_slice(&bytes[pos + 1..]);
        }
    }

    /// Returns the next complete line, if one is buffered.
    ///
    /// `None` means more bytes are needed.  `Some(Err(_))` is a complete
    /// line that must be answered with `ERROR:<reason>`.
    pub fn next_line(&mut self) -> Option<Result<String, FramingError>> {
        if self.overflow_pending {
            self.overflow_pending = false;
            return Some(Err(FramingError::TooLong {
                limit: self.max_line_len,
            }));
        }

        match self.buf.iter().position(|&b| b == TERMINATOR) {
            Some(pos) => {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = &raw[..pos];
                if content_len(line) > self.max_line_len {
                    return Some(Err(FramingError::TooLong {
                        limit: self.max_line_len,
                    }));
                }
                Some(decode_line(line))
            }
            None => {
                // A held-back `\r` may still turn out to be part of the terminator.
                if content_len(&self.buf) > self.max_line_len {
                    tracing::debug!(
                        buffered = self.buf.len(),
                        limit = self.max_line_len,
                        "line over limit; discarding until terminator"
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                None
            }
        }
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// `true` while the remainder of an oversized line is being dropped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// The configured maximum line length.
    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LEN)
    }
}

/// Length of `line` without a trailing `\r`.
fn content_len(line: &[u8]) -> usize {
    line.strip_suffix(b"\r").unwrap_or(line).len()
}

fn decode_line(line: &[u8]) -> Result<String, FramingError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| FramingError::NotText)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(FramingError::Empty);
    }
    Ok(text.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line_is_returned() {
        // Arrange
        let mut buf = LineBuffer::default();
        buf.push(b"{\"subject\":\"beacon_detected\"}\n");

        // Act
        let line = buf.next_line();

        // Assert
        assert_eq!(line, Some(Ok("{\"subject\":\"beacon_detected\"}".to_string())));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_partial_line_is_not_a_message() {
        let mut buf = LineBuffer::default();
        buf.push(b"{\"subject\":");

        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending(), 11);
    }

    #[test]
    fn test_line_split_across_pushes_is_reassembled() {
        let mut buf = LineBuffer::default();
        buf.push(b"hel");
        assert_eq!(buf.next_line(), None);
        buf.push(b"lo\n");
        assert_eq!(buf.next_line(), Some(Ok("hello".to_string())));
    }

    #[test]
    fn test_embedded_terminator_splits_and_buffers_remainder() {
        // Arrange: two full lines and the start of a third in one read
        let mut buf = LineBuffer::default();
        buf.push(b"one\ntwo\nthr");

        // Act / Assert
        assert_eq!(buf.next_line(), Some(Ok("one".to_string())));
        assert_eq!(buf.next_line(), Some(Ok("two".to_string())));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending(), 3);
    }

    #[test]
    fn test_crlf_terminator_is_stripped() {
        let mut buf = LineBuffer::default();
        buf.push(b"payload\r\n");
        assert_eq!(buf.next_line(), Some(Ok("payload".to_string())));
    }

    #[test]
    fn test_empty_line_is_reported() {
        let mut buf = LineBuffer::default();
        buf.push(b"\n");
        assert_eq!(buf.next_line(), Some(Err(FramingError::Empty)));
    }

    #[test]
    fn test_whitespace_only_line_is_reported_as_empty() {
        let mut buf = LineBuffer::default();
        buf.push(b"   \t \n");
        assert_eq!(buf.next_line(), Some(Err(FramingError::Empty)));
    }

    #[test]
    fn test_invalid_utf8_is_reported_as_not_text() {
        let mut buf = LineBuffer::default();
        buf.push(&[0xFF, 0xFE, 0x41, b'\n']);
        assert_eq!(buf.next_line(), Some(Err(FramingError::NotText)));
    }

    #[test]
    fn test_oversized_line_in_one_chunk_is_rejected() {
        let mut buf = LineBuffer::new(8);
        buf.push(b"0123456789\nok\n");

        assert_eq!(buf.next_line(), Some(Err(FramingError::TooLong { limit: 8 })));
        assert_eq!(buf.next_line(), Some(Ok("ok".to_string())));
    }

    #[test]
    fn test_line_exactly_at_limit_is_accepted() {
        let mut buf = LineBuffer::new(4);
        buf.push(b"abcd\n");
        assert_eq!(buf.next_line(), Some(Ok("abcd".to_string())));
    }

    #[test]
    fn test_crlf_line_exactly_at_limit_is_accepted() {
        let mut buf = LineBuffer::new(4);
        buf.push(b"abcd\r\n");
        assert_eq!(buf.next_line(), Some(Ok("abcd".to_string())));
    }

    #[test]
    fn test_carriage_return_at_limit_waits_for_terminator() {
        // Arrange: the `\r` arrives in one read, the `\n` in the next
        let mut buf = LineBuffer::new(4);
        buf.push(b"abcd\r");

        // Act / Assert: still buffered, not discarded
        assert_eq!(buf.next_line(), None);
        assert!(!buf.is_discarding());
        buf.push(b"\n");
        assert_eq!(buf.next_line(), Some(Ok("abcd".to_string())));
    }

    #[test]
    fn test_crlf_line_over_limit_is_still_rejected() {
        let mut buf = LineBuffer::new(4);
        buf.push(b"abcde\r\n");
        assert_eq!(buf.next_line(), Some(Err(FramingError::TooLong { limit: 4 })));
    }

    #[test]
    fn test_oversized_line_across_pushes_reports_once_at_terminator() {
        // Arrange
        let mut buf = LineBuffer::new(4);

        // Act: exceed the limit without a terminator
        buf.push(b"abcdef");
        assert_eq!(buf.next_line(), None);
        assert!(buf.is_discarding());
        assert_eq!(buf.pending(), 0);

        // More bytes of the same line are dropped
        buf.push(b"ghijkl");
        assert_eq!(buf.next_line(), None);

        // The terminator ends the oversized line; the tail is kept
        buf.push(b"mn\nnext\n");

        // Assert: exactly one error, then the following line
        assert_eq!(buf.next_line(), Some(Err(FramingError::TooLong { limit: 4 })));
        assert_eq!(buf.next_line(), Some(Ok("next".to_string())));
        assert_eq!(buf.next_line(), None);
        assert!(!buf.is_discarding());
    }

    #[test]
    fn test_error_reasons_match_wire_text() {
        assert_eq!(FramingError::Empty.to_string(), "empty message");
        assert_eq!(
            FramingError::TooLong { limit: 4096 }.to_string(),
            "line exceeds 4096 bytes"
        );
        assert_eq!(FramingError::NotText.to_string(), "message is not valid UTF-8");
    }

    #[test]
    fn test_zero_limit_is_clamped_to_one() {
        let buf = LineBuffer::new(0);
        assert_eq!(buf.max_line_len(), 1);
    }
}
