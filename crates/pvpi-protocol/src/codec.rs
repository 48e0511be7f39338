//! Line-based codec for MCU communication.
//!
//! Commands are terminated with a newline (`\n`). The MCU terminates its
//! replies with `\r\n`; on the receive side `\n` ends a line and any
//! trailing `\r` is stripped.

use bytes::BytesMut;

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum command/reply line length.
pub const MAX_LINE_LENGTH: usize = 256;

/// Line terminator appended to every command.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// A codec for reading and writing MCU lines.
///
/// Received bytes accumulate until a complete line is found. Only one line
/// is handed out per [`LineCodec::decode_line`] call, so a caller that reads
/// byte by byte can stop exactly at the first terminator.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let actual = self.buffer.len() + data.len();
        if actual > MAX_LINE_LENGTH && !data.iter().any(|b| is_terminator(*b)) {
            return Err(ProtocolError::BufferOverflow {
                max: MAX_LINE_LENGTH,
                actual,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Whether the buffer holds at least one terminator.
    pub fn has_line(&self) -> bool {
        self.buffer.iter().any(|b| is_terminator(*b))
    }

    /// Try to decode one complete line from the buffer.
    ///
    /// A line ends at `\n`. A trailing `\r` is stripped. Empty lines are
    /// returned as empty strings so a caller can tell "blank reply" apart
    /// from "no reply yet".
    pub fn decode_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| is_terminator(*b))?;

        let line_data = self.buffer.split_to(end + 1);
        let mut line = &line_data[..end];
        while let Some((last, rest)) = line.split_last() {
            if *last == b'\r' {
                line = rest;
            } else {
                break;
            }
        }

        Some(String::from_utf8_lossy(line).trim().to_string())
    }

    /// Encode a command for transmission.
    ///
    /// Appends the newline terminator.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(cmd.len() + 1);
        buf.extend_from_slice(cmd.as_bytes());
        buf.push(COMMAND_TERMINATOR);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the current buffer contents as a string (for debugging).
    pub fn buffer_as_str(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let encoded = LineCodec::encode_command("GET_BAT_V");
        assert_eq!(encoded, b"GET_BAT_V\n");
    }

    #[test]
    fn test_decode_line_strips_crlf() {
        let mut codec = LineCodec::new();
        codec.push(b"MILLIVOLTS,12500\r\n").unwrap();

        assert_eq!(codec.decode_line(), Some("MILLIVOLTS,12500".to_string()));
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_partial_line() {
        let mut codec = LineCodec::new();
        codec.push(b"ALI").unwrap();

        assert!(!codec.has_line());
        assert!(codec.decode_line().is_none());

        codec.push(b"VE\r\n").unwrap();
        assert_eq!(codec.decode_line(), Some("ALIVE".to_string()));
    }

    #[test]
    fn test_decode_one_line_at_a_time() {
        let mut codec = LineCodec::new();
        codec.push(b"TEMP,31\r\nALIVE\r\n").unwrap();

        assert_eq!(codec.decode_line(), Some("TEMP,31".to_string()));
        assert_eq!(codec.decode_line(), Some("ALIVE".to_string()));
        assert!(codec.decode_line().is_none());
    }

    #[test]
    fn test_overflow_without_terminator() {
        let mut codec = LineCodec::new();
        let junk = vec![b'x'; MAX_LINE_LENGTH + 1];

        let err = codec.push(&junk).unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { .. }));
    }
}
