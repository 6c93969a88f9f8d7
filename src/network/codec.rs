//! Length-prefixed framing for the post-handshake wire.
//!
//! Every frame is `u64` little-endian token, `u32` little-endian payload
//! length, then exactly that many bytes of UTF-8 JSON. Both directions
//! use the same layout. The decoder is incremental: the router feeds it
//! whatever chunk the socket produced and receives zero or more whole
//! frames back, with partial bytes retained for the next chunk.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Bytes of token plus length prefix ahead of every payload.
pub const HEADER_SIZE: usize = 12;

/// Largest payload the decoder will accept (256 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// Longest NUL-terminated handshake banner the server may send.
pub const MAX_BANNER_LEN: usize = 1024;

/// One token-tagged unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub token: u64,
    pub payload: Bytes,
}

/// Encode a post-handshake frame.
pub fn encode_frame(token: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&token.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode the pre-session handshake frame.
///
/// Layout: version magic, auth-key length, auth-key bytes, protocol
/// magic, all little-endian. An empty auth key still writes its four
/// zero length bytes.
pub fn handshake_frame(version_magic: u32, auth_key: &str, protocol_magic: u32) -> Vec<u8> {
    let key = auth_key.as_bytes();
    let mut buf = Vec::with_capacity(12 + key.len());
    buf.extend_from_slice(&version_magic.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&protocol_magic.to_le_bytes());
    buf
}

/// Strip trailing non-word characters from a handshake banner.
pub fn trim_banner(raw: &str) -> &str {
    raw.trim_end_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Need the full 12-byte header.
    Header,
    /// Header consumed, need `remaining` payload bytes for `token`.
    Payload { token: u64, remaining: u32 },
}

/// Accumulates socket chunks and yields complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: DecodeState,
    max_payload: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: DecodeState::Header,
            max_payload,
        }
    }

    /// Append a chunk and extract every frame it completes.
    ///
    /// Returns an empty vector while a frame is still incomplete. A
    /// length prefix above the payload limit is a protocol error; the
    /// stream is not recoverable past it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.advance()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn advance(&mut self) -> Result<Option<Frame>> {
        match self.state {
            DecodeState::Header => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let token = u64::from_le_bytes(self.buffer[0..8].try_into().unwrap());
                let length = u32::from_le_bytes(self.buffer[8..12].try_into().unwrap());
                if length > self.max_payload {
                    return Err(Error::Protocol(format!(
                        "frame payload of {} bytes exceeds limit of {}",
                        length, self.max_payload
                    )));
                }
                let _ = self.buffer.split_to(HEADER_SIZE);

                if length == 0 {
                    return Ok(Some(Frame {
                        token,
                        payload: Bytes::new(),
                    }));
                }
                self.state = DecodeState::Payload {
                    token,
                    remaining: length,
                };
                self.advance()
            }
            DecodeState::Payload { token, remaining } => {
                if self.buffer.len() < remaining as usize {
                    return Ok(None);
                }
                let payload = self.buffer.split_to(remaining as usize).freeze();
                self.state = DecodeState::Header;
                Ok(Some(Frame { token, payload }))
            }
        }
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let payload = br#"{"t":1,"r":["foo"]}"#;
        let wire = encode_frame(42, payload);

        let mut decoder = FrameBuffer::new();
        let frames = decoder.push(&wire).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].token, 42);
        assert_eq!(&frames[0].payload[..], payload);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn length_prefix_matches_payload() {
        for payload in [&b""[..], b"[]", br#"{"t":2,"r":[1,2,3]}"#] {
            let wire = encode_frame(7, payload);
            let length = u32::from_le_bytes(wire[8..12].try_into().unwrap());
            assert_eq!(length as usize, payload.len());
            assert_eq!(wire.len(), HEADER_SIZE + payload.len());
        }
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut wire = encode_frame(1, b"first");
        wire.extend_from_slice(&encode_frame(2, b"second"));
        wire.extend_from_slice(&encode_frame(3, b""));

        let mut decoder = FrameBuffer::new();
        let frames = decoder.push(&wire).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].token, 1);
        assert_eq!(frames[1].token, 2);
        assert_eq!(frames[2].token, 3);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn fragmented_header() {
        let wire = encode_frame(99, b"data");
        let mut decoder = FrameBuffer::new();

        assert!(decoder.push(&wire[..5]).unwrap().is_empty());
        let frames = decoder.push(&wire[5..]).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].token, 99);
        assert_eq!(&frames[0].payload[..], b"data");
    }

    #[test]
    fn fragmented_payload() {
        let payload = b"a payload split across two socket reads";
        let wire = encode_frame(5, payload);
        let mut decoder = FrameBuffer::new();

        let cut = HEADER_SIZE + 10;
        assert!(decoder.push(&wire[..cut]).unwrap().is_empty());
        let frames = decoder.push(&wire[cut..]).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], payload);
    }

    #[test]
    fn byte_at_a_time() {
        let wire = encode_frame(8, b"hi");
        let mut decoder = FrameBuffer::new();

        let mut frames = Vec::new();
        for byte in &wire {
            frames.extend(decoder.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].token, 8);
        assert_eq!(&frames[0].payload[..], b"hi");
    }

    #[test]
    fn complete_frame_followed_by_partial() {
        let first = encode_frame(1, b"whole");
        let second = encode_frame(2, b"held back");

        let mut chunk = first.clone();
        chunk.extend_from_slice(&second[..HEADER_SIZE + 2]);

        let mut decoder = FrameBuffer::new();
        let frames = decoder.push(&chunk).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].token, 1);

        let frames = decoder.push(&second[HEADER_SIZE + 2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"held back");
    }

    #[test]
    fn oversize_payload_rejected() {
        let mut decoder = FrameBuffer::with_max_payload(16);
        let wire = encode_frame(1, &[0u8; 32]);

        let err = decoder.push(&wire).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn handshake_frame_layout() {
        let frame = handshake_frame(0x400C2D20, "secret", 0x7E6970C7);

        assert_eq!(&frame[0..4], &0x400C2D20u32.to_le_bytes());
        assert_eq!(&frame[4..8], &6u32.to_le_bytes());
        assert_eq!(&frame[8..14], b"secret");
        assert_eq!(&frame[14..18], &0x7E6970C7u32.to_le_bytes());
    }

    #[test]
    fn empty_auth_key_writes_four_zero_bytes() {
        let frame = handshake_frame(0x400C2D20, "", 0x7E6970C7);

        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[4..8], &[0, 0, 0, 0]);
        assert_eq!(&frame[8..12], &0x7E6970C7u32.to_le_bytes());
    }

    #[test]
    fn banner_trimming() {
        assert_eq!(trim_banner("SUCCESS"), "SUCCESS");
        assert_eq!(trim_banner("SUCCESS\n"), "SUCCESS");
        assert_eq!(trim_banner("SUCCESS \r\n"), "SUCCESS");
        assert_eq!(trim_banner("ERROR: bad auth."), "ERROR: bad auth");
    }
}
