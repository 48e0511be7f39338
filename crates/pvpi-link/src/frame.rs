//! Broker channel framing.
//!
//! Every message between a client stub and the broker is one frame:
//!
//! ```text
//! +------+--------+--------+--------+--------+-------------------+
//! | kind | seq_lo | seq_hi | len_lo | len_hi | payload[0..len]   |
//! +------+--------+--------+--------+--------+-------------------+
//! ```
//!
//! - `I` announces the client identity (first frame on a connection)
//! - `<` carries a request, client to broker
//! - `>` carries a reply, broker to client, echoing the request's `seq`
//!
//! A zero-length request is a liveness probe and is answered with a
//! zero-length reply.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{LinkError, LinkResult};

/// Maximum payload size of one frame.
pub const MAX_PAYLOAD: usize = 1024;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 5;

/// Prefix shared by all broker error sentinels.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Sentinel for a device that did not answer in time.
pub const DEVICE_TIMEOUT: &str = "ERROR: device timeout";

/// Sentinel for a closed device line.
pub const DEVICE_CLOSED: &str = "ERROR: device closed";

/// Sentinel for any other transport failure.
pub fn device_failure(detail: &str) -> String {
    format!("{}device failure: {}", ERROR_PREFIX, detail)
}

/// Sentinel for a request the broker could not accept.
pub fn malformed_request(detail: &str) -> String {
    format!("{}malformed request: {}", ERROR_PREFIX, detail)
}

/// Frame kinds on the broker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `I`: identity announcement.
    Identity,
    /// `<`: request.
    Request,
    /// `>`: reply.
    Reply,
    /// Any other kind byte. The frame is still consumed whole.
    Unknown(u8),
}

impl FrameKind {
    /// Get the kind byte.
    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::Identity => b'I',
            FrameKind::Request => b'<',
            FrameKind::Reply => b'>',
            FrameKind::Unknown(b) => b,
        }
    }

    /// Parse a kind byte.
    pub fn from_byte(b: u8) -> FrameKind {
        match b {
            b'I' => FrameKind::Identity,
            b'<' => FrameKind::Request,
            b'>' => FrameKind::Reply,
            other => FrameKind::Unknown(other),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Identity announcement frame.
    pub fn identity(identity: &str) -> Frame {
        Frame {
            kind: FrameKind::Identity,
            seq: 0,
            payload: identity.as_bytes().to_vec(),
        }
    }

    /// Request frame.
    pub fn request(seq: u16, payload: &[u8]) -> Frame {
        Frame {
            kind: FrameKind::Request,
            seq,
            payload: payload.to_vec(),
        }
    }

    /// Reply frame.
    pub fn reply(seq: u16, payload: &[u8]) -> Frame {
        Frame {
            kind: FrameKind::Reply,
            seq,
            payload: payload.to_vec(),
        }
    }

    /// Whether this is a zero-length liveness probe or its echo.
    pub fn is_probe(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode the frame for transmission.
    pub fn encode(&self) -> LinkResult<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(LinkError::Framing(format!(
                "payload of {} bytes exceeds {}",
                self.payload.len(),
                MAX_PAYLOAD
            )));
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.kind.to_byte());
        buf.put_u16_le(self.seq);
        buf.put_u16_le(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

/// Accumulates received bytes and splits them into frames.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(HEADER_LEN + MAX_PAYLOAD),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one complete frame.
    ///
    /// Returns `Ok(None)` if more data is needed. An oversized length field
    /// means the stream can no longer be trusted: the buffer is dropped and
    /// a framing error returned.
    pub fn decode(&mut self) -> LinkResult<Option<Frame>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_le_bytes([self.buffer[3], self.buffer[4]]) as usize;
        if len > MAX_PAYLOAD {
            self.buffer.clear();
            return Err(LinkError::Framing(format!(
                "frame length {} exceeds {}",
                len, MAX_PAYLOAD
            )));
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let kind = FrameKind::from_byte(self.buffer.get_u8());
        let seq = self.buffer.get_u16_le();
        self.buffer.advance(2);
        let payload = self.buffer.split_to(len).to_vec();

        Ok(Some(Frame { kind, seq, payload }))
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = Frame::request(0x0102, b"GET_BAT_V").encode().unwrap();
        assert_eq!(&encoded[..5], &[b'<', 0x02, 0x01, 9, 0]);
        assert_eq!(&encoded[5..], b"GET_BAT_V");
    }

    #[test]
    fn test_partial_and_multiple() {
        let mut codec = FrameCodec::new();
        let first = Frame::identity("client_pid#42").encode().unwrap();
        let second = Frame::reply(7, b"MILLIVOLTS,12500").encode().unwrap();

        codec.push(&first[..3]);
        assert_eq!(codec.decode().unwrap(), None);
        codec.push(&first[3..]);
        codec.push(&second);

        let frame = codec.decode().unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Identity);
        assert_eq!(frame.payload, b"client_pid#42");

        let frame = codec.decode().unwrap().unwrap();
        assert_eq!(frame, Frame::reply(7, b"MILLIVOLTS,12500"));
        assert_eq!(codec.decode().unwrap(), None);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_probe_frame() {
        let mut codec = FrameCodec::new();
        codec.push(&Frame::request(1, b"").encode().unwrap());
        let frame = codec.decode().unwrap().unwrap();
        assert!(frame.is_probe());
    }

    #[test]
    fn test_unknown_kind_is_consumed() {
        let mut codec = FrameCodec::new();
        codec.push(&[b'?', 3, 0, 2, 0, b'h', b'i']);
        codec.push(&Frame::request(4, b"GET_TEMP").encode().unwrap());
        let frame = codec.decode().unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Unknown(b'?'));
        assert_eq!(frame.seq, 3);
        assert_eq!(codec.decode().unwrap().unwrap().payload, b"GET_TEMP");
    }

    #[test]
    fn test_oversize() {
        let mut codec = FrameCodec::new();
        codec.push(&[b'<', 0, 0, 0xFF, 0xFF]);
        assert!(matches!(codec.decode(), Err(LinkError::Framing(_))));
        assert_eq!(codec.buffered_len(), 0);

        let frame = Frame::request(0, &[b'x'; MAX_PAYLOAD + 1]);
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(device_failure("broken pipe"), "ERROR: device failure: broken pipe");
        assert_eq!(malformed_request("no identity"), "ERROR: malformed request: no identity");
        assert!(DEVICE_TIMEOUT.starts_with(ERROR_PREFIX));
    }
}
