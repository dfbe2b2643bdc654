//! Protocol and mapper error types.

use crate::mapper::ValueKind;
use thiserror::Error;

/// Errors raised while framing or parsing wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("frame size mismatch: declared {declared} bytes, decoded {decoded}")]
    SizeMismatch { declared: usize, decoded: usize },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("invalid greeting: {0}")]
    InvalidGreeting(String),

    #[error("failed to encode value: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the value/object mapper registry.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("no value converter from {kind} to {target}")]
    ConverterNotFound {
        kind: ValueKind,
        target: &'static str,
    },

    #[error("no object converter registered for {0}")]
    ObjectConverterNotFound(&'static str),

    #[error("{target} cannot represent value {value}")]
    OutOfRange {
        target: &'static str,
        value: String,
    },

    #[error("string value is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed {kind} ext payload: {reason}")]
    InvalidExt {
        kind: &'static str,
        reason: &'static str,
    },

    #[error("expected a tuple array, found {0}")]
    NotATuple(ValueKind),
}
