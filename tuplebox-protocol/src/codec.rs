//! Encoder and decoder for wire frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::BytesMut;

/// Encodes frames for the wire.
pub struct Encoder;

impl Encoder {
    /// Encodes a frame into bytes ready to write to the socket.
    pub fn encode(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        frame.encode()
    }
}

/// Decodes frames from a byte stream.
///
/// Owns the inbound parse cursor; incomplete input stays buffered until the
/// next chunk arrives.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::RequestType;
    use crate::frame::Header;
    use rmpv::Value;

    fn ping_frame(sync: u64) -> Frame {
        Frame::new(
            Header::request(RequestType::Ping.code(), sync),
            Value::Map(Vec::new()),
        )
    }

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let encoded = Encoder::encode(&ping_frame(42)).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        let decoded = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(decoded.header.sync, 42);
        assert_eq!(decoded.header.code, RequestType::Ping.code());
    }

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = Encoder::encode(&ping_frame(1)).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded[..4]);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(&encoded[4..]);
        let decoded = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(decoded.header.sync, 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_buffered_and_clear() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
