//! Binary frame format.
//!
//! Frame layout (everything MessagePack):
//!
//! ```text
//! +--------------------+---------------------+-------------------+
//! | size (msgpack uint)| header (msgpack map)| body (msgpack map)|
//! +--------------------+---------------------+-------------------+
//! ```
//!
//! The size prefix counts header + body bytes only. Header keys are small
//! integers (`REQUEST_TYPE`/`RESPONSE_CODE`, `SYNC`, `SCHEMA_VERSION`).

use crate::consts::{keys, response_codes};
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use rmpv::Value;
use std::io::Cursor;

/// Sanity cap on the decoded size prefix. The protocol itself has no limit,
/// but a corrupt prefix must not make the decoder buffer gigabytes.
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Request type on outbound frames; response code on inbound frames.
    pub code: u32,
    /// Correlation id echoed by the server.
    pub sync: u64,
    /// Server schema version, present on responses.
    pub schema_version: Option<u64>,
}

impl Header {
    /// Creates a request header.
    pub fn request(code: u32, sync: u64) -> Self {
        Self {
            code,
            sync,
            schema_version: None,
        }
    }

    /// Returns whether a response header carries the error bit.
    pub fn is_error(&self) -> bool {
        self.code >= response_codes::ERROR_BIT
    }

    /// Server error code from an error response (low bits of `code`).
    pub fn server_code(&self) -> u32 {
        self.code & response_codes::ERROR_CODE_MASK
    }

    fn to_value(&self) -> Value {
        let mut entries = vec![
            (Value::from(keys::REQUEST_TYPE), Value::from(self.code)),
            (Value::from(keys::SYNC), Value::from(self.sync)),
        ];
        if let Some(version) = self.schema_version {
            entries.push((Value::from(keys::SCHEMA_VERSION), Value::from(version)));
        }
        Value::Map(entries)
    }

    fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let entries = value
            .as_map()
            .ok_or(ProtocolError::Malformed("frame header is not a map"))?;

        let mut code = None;
        let mut sync = None;
        let mut schema_version = None;
        for (key, entry) in entries {
            match key.as_u64() {
                Some(keys::REQUEST_TYPE) => code = entry.as_u64(),
                Some(keys::SYNC) => sync = entry.as_u64(),
                Some(keys::SCHEMA_VERSION) => schema_version = entry.as_u64(),
                _ => {}
            }
        }

        Ok(Self {
            code: code.ok_or(ProtocolError::Malformed("frame header has no code"))? as u32,
            sync: sync.ok_or(ProtocolError::Malformed("frame header has no sync"))?,
            schema_version,
        })
    }
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    /// Body map; empty map when the wire frame carried no body.
    pub body: Value,
}

impl Frame {
    pub fn new(header: Header, body: Value) -> Self {
        Self { header, body }
    }

    /// Encodes the frame into bytes, size prefix included.
    ///
    /// Encoding is all-or-nothing: nothing is emitted on error.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut payload = Vec::with_capacity(128);
        rmpv::encode::write_value(&mut payload, &self.header.to_value())?;
        rmpv::encode::write_value(&mut payload, &self.body)?;

        if payload.len() as u64 > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() as u64,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut prefix = Vec::with_capacity(9);
        rmp::encode::write_uint(&mut prefix, payload.len() as u64)
            .map_err(|_| ProtocolError::Malformed("failed to write size prefix"))?;

        let mut buf = BytesMut::with_capacity(prefix.len() + payload.len());
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decodes a frame from the inbound buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame was consumed,
    /// `Ok(None)` when more data is needed (the buffer is left untouched),
    /// or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let mut cursor = Cursor::new(&buf[..]);
        let size = match rmp::decode::read_int::<u64, _>(&mut cursor) {
            Ok(size) => size,
            Err(err) if is_eof(&err) => return Ok(None),
            Err(_) => return Err(ProtocolError::Malformed("invalid frame size prefix")),
        };
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let prefix_len = cursor.position() as usize;
        if (buf.len() - prefix_len) < size as usize {
            return Ok(None);
        }

        buf.advance(prefix_len);
        let frame_bytes = buf.split_to(size as usize);

        let mut cursor = Cursor::new(&frame_bytes[..]);
        let header_value = rmpv::decode::read_value(&mut cursor)?;
        let header = Header::from_value(&header_value)?;

        let body = if (cursor.position() as usize) < frame_bytes.len() {
            let body = rmpv::decode::read_value(&mut cursor)?;
            if !matches!(body, Value::Map(_)) {
                return Err(ProtocolError::Malformed("frame body is not a map"));
            }
            body
        } else {
            Value::Map(Vec::new())
        };

        let decoded = cursor.position() as usize;
        if decoded != frame_bytes.len() {
            return Err(ProtocolError::SizeMismatch {
                declared: frame_bytes.len(),
                decoded,
            });
        }

        Ok(Some(Self { header, body }))
    }
}

fn is_eof(err: &rmp::decode::NumValueReadError) -> bool {
    match err {
        rmp::decode::NumValueReadError::InvalidMarkerRead(e)
        | rmp::decode::NumValueReadError::InvalidDataRead(e) => {
            e.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::RequestType;

    fn select_frame(sync: u64) -> Frame {
        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(512u32)),
            (Value::from(keys::KEY), Value::Array(vec![Value::from(1u8)])),
        ]);
        Frame::new(Header::request(RequestType::Select.code(), sync), body)
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = select_frame(7);
        let mut buf = frame.encode().unwrap();

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame_keeps_buffer() {
        let encoded = select_frame(1).encode().unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..3]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&encoded[3..]);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.sync, 1);
    }

    #[test]
    fn test_empty_buffer() {
        let mut buf = BytesMut::new();
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&select_frame(1).encode().unwrap());
        buf.extend_from_slice(&select_frame(2).encode().unwrap());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().header.sync, 1);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().header.sync, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bodyless_frame_decodes_to_empty_map() {
        let mut payload = Vec::new();
        let header = Header::request(RequestType::Ping.code(), 3);
        rmpv::encode::write_value(&mut payload, &header.to_value()).unwrap();

        let mut prefix = Vec::new();
        rmp::encode::write_uint(&mut prefix, payload.len() as u64).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&payload);

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.body, Value::Map(Vec::new()));
    }

    #[test]
    fn test_error_bit() {
        let header = Header {
            code: 0x8000 | 47,
            sync: 9,
            schema_version: Some(80),
        };
        assert!(header.is_error());
        assert_eq!(header.server_code(), 47);

        let ok = Header::request(RequestType::Select.code(), 9);
        assert!(!ok.is_error());
    }

    #[test]
    fn test_trailing_garbage_is_size_mismatch() {
        let frame = select_frame(4);
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &frame.header.to_value()).unwrap();
        rmpv::encode::write_value(&mut payload, &frame.body).unwrap();
        payload.push(0xc0);

        let mut prefix = Vec::new();
        rmp::encode::write_uint(&mut prefix, payload.len() as u64).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&payload);

        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::SizeMismatch { .. })));
    }

    #[test]
    fn test_non_map_body_rejected() {
        let mut payload = Vec::new();
        let header = Header::request(RequestType::Select.code(), 5);
        rmpv::encode::write_value(&mut payload, &header.to_value()).unwrap();
        rmpv::encode::write_value(&mut payload, &Value::from(42u8)).unwrap();

        let mut prefix = Vec::new();
        rmp::encode::write_uint(&mut prefix, payload.len() as u64).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&payload);

        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut prefix = Vec::new();
        rmp::encode::write_uint(&mut prefix, MAX_FRAME_SIZE + 1).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);

        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }
}
