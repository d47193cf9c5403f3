// src/io/serial/framer.rs
//
// Newline framing for the serial byte stream.
//
// Incoming bytes are accumulated until a terminator, decoded as UTF-8 with
// invalid sequences dropped, trimmed, and emitted as Lines. Blank lines are
// swallowed. Outgoing payloads get a single terminator appended.

use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default cap on buffered bytes without a terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

// =============================================================================
// Line
// =============================================================================

/// One trimmed, non-empty line of device text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line(String);

impl Line {
    /// Build a line from raw bytes. Returns None when nothing but whitespace
    /// (or undecodable bytes) remains.
    pub fn from_bytes(bytes: &[u8]) -> Option<Line> {
        let text: String = bytes.utf8_chunks().map(|chunk| chunk.valid()).collect();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Line(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Line Framer
// =============================================================================

/// Delimiter framer over a byte stream.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::new(),
            max_length: max_length.max(1),
        }
    }

    /// Feed bytes and return every complete, non-blank line.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == LINE_TERMINATOR {
                let frame: Vec<u8> = self.buffer.drain(..).collect();
                lines.extend(Line::from_bytes(&frame));
                continue;
            }

            self.buffer.push(byte);

            // Force split on max length, keeping a cut character for the next line
            if self.buffer.len() >= self.max_length {
                let cut = self.buffer.len() - incomplete_tail(&self.buffer);
                let frame: Vec<u8> = self.buffer.drain(..cut).collect();
                lines.extend(Line::from_bytes(&frame));
            }
        }

        lines
    }

    /// Drop any partial line, e.g. after the device was reopened.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Number of trailing bytes that start a UTF-8 sequence not yet complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

/// Append the line terminator to an outgoing payload.
pub fn frame_outgoing(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(LINE_TERMINATOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(Line::as_str).collect()
    }

    #[test]
    fn test_line_framing() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(texts(&lines), vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_crlf_and_whitespace_trimmed() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"  hello \r\n\tworld\r\n");
        assert_eq!(texts(&lines), vec!["hello", "world"]);
    }

    #[test]
    fn test_blank_lines_discarded() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"\n\r\n   \nvalue\n\n");
        assert_eq!(texts(&lines), vec!["value"]);
    }

    #[test]
    fn test_partial_line_spans_feeds() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"{\"distance").is_empty());
        let lines = framer.feed(b"_cm\": 42}\n");
        assert_eq!(texts(&lines), vec!["{\"distance_cm\": 42}"]);
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(&[b'o', 0xFF, b'k', 0xC3, b'\n']);
        assert_eq!(texts(&lines), vec!["ok"]);

        // A line made only of garbage disappears entirely
        assert!(framer.feed(&[0xFE, 0xFF, b'\n']).is_empty());
    }

    #[test]
    fn test_max_length_forces_split() {
        let mut framer = LineFramer::new(5);
        let lines = framer.feed(b"12345678");
        assert_eq!(texts(&lines), vec!["12345"]);

        // Remaining 3 bytes complete on the next terminator
        let lines = framer.feed(b"\n");
        assert_eq!(texts(&lines), vec!["678"]);
    }

    #[test]
    fn test_replacement_character_from_device_kept() {
        let mut framer = LineFramer::default();
        let lines = framer.feed("{\"label\":\"\u{FFFD}\"}\n".as_bytes());
        assert_eq!(texts(&lines), vec!["{\"label\":\"\u{FFFD}\"}"]);

        let lines = framer.feed(&[0xEF, 0xBF, 0xBD, 0xFF, b'\n']);
        assert_eq!(texts(&lines), vec!["\u{FFFD}"]);
    }

    #[test]
    fn test_split_never_cuts_multibyte_character() {
        // "ab°" is 4 bytes; the degree sign straddles the cap of 3
        let mut framer = LineFramer::new(3);
        let lines = framer.feed("ab\u{00B0}c\n".as_bytes());
        assert_eq!(texts(&lines), vec!["ab", "\u{00B0}c"]);

        let mut framer = LineFramer::new(4);
        let lines = framer.feed("x\u{20AC}y\n".as_bytes());
        assert_eq!(texts(&lines), vec!["x\u{20AC}", "y"]);
    }

    #[test]
    fn test_incomplete_tail_widths() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(&[b'a', 0xC2]), 1);
        assert_eq!(incomplete_tail(&[b'a', 0xE2, 0x82]), 2);
        assert_eq!(incomplete_tail(&[0xE2, 0x82, 0xAC]), 0);
        assert_eq!(incomplete_tail(&[0xF0, 0x9F, 0x98]), 3);
        assert_eq!(incomplete_tail(&[]), 0);
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = LineFramer::default();
        framer.feed(b"half a li");
        framer.reset();
        let lines = framer.feed(b"ne\nfull\n");
        assert_eq!(texts(&lines), vec!["ne", "full"]);
    }

    #[test]
    fn test_frame_outgoing() {
        assert_eq!(frame_outgoing(b"LED ON"), b"LED ON\n".to_vec());
        assert_eq!(frame_outgoing(b""), b"\n".to_vec());
    }
}
