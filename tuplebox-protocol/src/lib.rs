//! # tuplebox-protocol
//!
//! Wire protocol implementation for tuplebox (IPROTO binary protocol).
//!
//! This crate provides:
//! - MessagePack framing with a msgpack-uint length prefix
//! - Header/body split with integer-keyed maps
//! - Greeting (connect preamble) parsing
//! - A pluggable value/object mapper registry
//! - Protocol constants and error types

pub mod codec;
pub mod consts;
pub mod decimal;
pub mod error;
pub mod frame;
pub mod greeting;
pub mod mapper;

pub use codec::{Decoder, Encoder};
pub use consts::RequestType;
pub use decimal::Decimal;
pub use error::{MapperError, ProtocolError};
pub use frame::{Frame, Header, MAX_FRAME_SIZE};
pub use greeting::{Greeting, GREETING_SIZE};
pub use mapper::{Mapper, ResultMapper, ResultMapperFactory, ValueKind};

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 3301;
