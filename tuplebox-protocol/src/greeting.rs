//! Server greeting parsing.
//!
//! Immediately after TCP connect the server sends a fixed 128-byte preamble:
//! a 64-byte version banner line followed by a 64-byte line whose first 44
//! characters are the Base64-encoded challenge salt.

use crate::error::ProtocolError;

/// Total greeting size in bytes.
pub const GREETING_SIZE: usize = 128;

/// Length of the version banner line.
const BANNER_LINE: usize = 64;

/// Length of the Base64 salt field on the second line.
const SALT_FIELD: usize = 44;

/// Parsed connect preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    version: String,
    salt: String,
}

impl Greeting {
    /// Parses the raw 128-byte greeting.
    ///
    /// The salt is kept as the Base64 string the server sent; decoding and
    /// slicing to the challenge length is the authenticator's job.
    pub fn parse(raw: &[u8; GREETING_SIZE]) -> Result<Self, ProtocolError> {
        let banner = std::str::from_utf8(&raw[..BANNER_LINE])
            .map_err(|_| ProtocolError::InvalidGreeting("banner is not UTF-8".into()))?;
        let version = banner.trim_end_matches(['\0', ' ', '\n']).to_string();
        if version.is_empty() {
            return Err(ProtocolError::InvalidGreeting("empty version banner".into()));
        }

        let salt_field = &raw[BANNER_LINE..BANNER_LINE + SALT_FIELD];
        let salt = std::str::from_utf8(salt_field)
            .map_err(|_| ProtocolError::InvalidGreeting("salt is not UTF-8".into()))?
            .trim_end()
            .to_string();
        if salt.is_empty() {
            return Err(ProtocolError::InvalidGreeting("empty salt field".into()));
        }

        Ok(Self { version, salt })
    }

    /// Server version banner, e.g. `Tarantool 2.11.0 (Binary) <uuid>`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Base64-encoded challenge salt as sent by the server.
    pub fn salt(&self) -> &str {
        &self.salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_greeting(banner: &str, salt: &str) -> [u8; GREETING_SIZE] {
        let mut raw = [b' '; GREETING_SIZE];
        raw[..banner.len()].copy_from_slice(banner.as_bytes());
        raw[BANNER_LINE - 1] = b'\n';
        raw[BANNER_LINE..BANNER_LINE + salt.len()].copy_from_slice(salt.as_bytes());
        raw[GREETING_SIZE - 1] = b'\n';
        raw
    }

    #[test]
    fn test_parse_greeting() {
        let salt = "QK2HoFZGXTXBq2vFj7soCsHqTo6PGTF575ssUBAJLAI=";
        let raw = raw_greeting("Tarantool 2.11.0 (Binary) 3fd89398", salt);

        let greeting = Greeting::parse(&raw).unwrap();
        assert_eq!(greeting.version(), "Tarantool 2.11.0 (Binary) 3fd89398");
        assert_eq!(greeting.salt(), salt);
    }

    #[test]
    fn test_empty_banner_rejected() {
        let raw = [b' '; GREETING_SIZE];
        let result = Greeting::parse(&raw);
        assert!(matches!(result, Err(ProtocolError::InvalidGreeting(_))));
    }

    #[test]
    fn test_non_utf8_banner_rejected() {
        let mut raw = raw_greeting("Tarantool 2.11.0", "c2FsdA==");
        raw[3] = 0xFF;
        let result = Greeting::parse(&raw);
        assert!(matches!(result, Err(ProtocolError::InvalidGreeting(_))));
    }
}
