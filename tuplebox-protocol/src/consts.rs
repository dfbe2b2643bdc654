//! IPROTO constants.
//!
//! Only the keys and codes used by this crate are listed; the full table is
//! part of the server's published binary protocol.

/// Header and body map keys.
pub mod keys {
    pub const REQUEST_TYPE: u64 = 0x00;
    pub const RESPONSE_CODE: u64 = 0x00;
    pub const SYNC: u64 = 0x01;
    pub const SCHEMA_VERSION: u64 = 0x05;
    pub const SPACE_ID: u64 = 0x10;
    pub const INDEX_ID: u64 = 0x11;
    pub const LIMIT: u64 = 0x12;
    pub const OFFSET: u64 = 0x13;
    pub const ITERATOR: u64 = 0x14;
    pub const KEY: u64 = 0x20;
    pub const TUPLE: u64 = 0x21;
    pub const FUNCTION_NAME: u64 = 0x22;
    pub const USER_NAME: u64 = 0x23;
    pub const EXPR: u64 = 0x27;
    pub const OPS: u64 = 0x28;
    pub const DATA: u64 = 0x30;
    pub const ERROR: u64 = 0x31;
}

/// Request type codes carried in the header's `REQUEST_TYPE` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestType {
    Select = 0x01,
    Insert = 0x02,
    Replace = 0x03,
    Update = 0x04,
    Delete = 0x05,
    Auth = 0x07,
    /// Reserved: Lua expression evaluation is a planned extension.
    Eval = 0x08,
    Upsert = 0x09,
    /// Reserved: remote function call is a planned extension.
    Call = 0x0a,
    Ping = 0x40,
}

impl RequestType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Response code interpretation.
pub mod response_codes {
    /// Successful response.
    pub const OK: u32 = 0x0000;
    /// Responses at or above this carry a server error in the low bits.
    pub const ERROR_BIT: u32 = 0x8000;
    /// Mask extracting the server error code from an error response.
    pub const ERROR_CODE_MASK: u32 = 0x7fff;
}

/// System spaces queried for schema metadata.
pub mod system_spaces {
    /// `_vspace`: one tuple per space.
    pub const VSPACE_ID: u32 = 281;
    /// `_vindex`: one tuple per index.
    pub const VINDEX_ID: u32 = 289;
}
