//! Handshake authentication.
//!
//! The server challenges every connection with a salt in the greeting; the
//! client proves knowledge of the password by returning a scramble computed
//! from the salt, without ever transmitting the password itself.

use crate::config::Credentials;
use crate::error::ClientError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use std::fmt;
use tuplebox_protocol::ProtocolError;

/// Scramble length in bytes; also the number of salt bytes that matter.
pub const SCRAMBLE_SIZE: usize = 20;

/// Supported authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    ChapSha1,
}

impl AuthMechanism {
    /// Wire name sent in the auth request tuple.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ChapSha1 => "chap-sha1",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticator bound to a mechanism. New mechanisms become new
/// variants with their own credential capability checks.
#[derive(Debug, Clone, Copy)]
pub enum Authenticator {
    ChapSha1(ChapSha1Authenticator),
}

impl Authenticator {
    /// Selects the authenticator for `mechanism`, verifying it can work with
    /// the given credentials.
    pub fn select(
        mechanism: AuthMechanism,
        credentials: &Credentials,
    ) -> Result<Self, ClientError> {
        let candidate = match mechanism {
            AuthMechanism::ChapSha1 => Authenticator::ChapSha1(ChapSha1Authenticator),
        };
        if candidate.can_authenticate_with(credentials) {
            Ok(candidate)
        } else {
            Err(ClientError::NoSuitableAuthenticator(mechanism.to_string()))
        }
    }

    pub fn mechanism(&self) -> AuthMechanism {
        match self {
            Authenticator::ChapSha1(_) => AuthMechanism::ChapSha1,
        }
    }

    pub fn can_authenticate_with(&self, credentials: &Credentials) -> bool {
        match self {
            Authenticator::ChapSha1(inner) => inner.can_authenticate_with(credentials),
        }
    }

    /// Computes the scramble from the greeting's Base64 salt string.
    pub fn scramble(
        &self,
        salt: &str,
        credentials: &Credentials,
    ) -> Result<[u8; SCRAMBLE_SIZE], ClientError> {
        match self {
            Authenticator::ChapSha1(inner) => inner.scramble(salt, credentials),
        }
    }
}

/// The chap-sha1 mechanism:
///
/// ```text
/// step1 = SHA1(password)
/// step2 = SHA1(step1)
/// step3 = SHA1(first20(base64decode(salt)) || step2)
/// scramble = step1 XOR step3
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapSha1Authenticator;

impl ChapSha1Authenticator {
    pub fn can_authenticate_with(&self, credentials: &Credentials) -> bool {
        credentials.is_usable()
    }

    pub fn scramble(
        &self,
        salt: &str,
        credentials: &Credentials,
    ) -> Result<[u8; SCRAMBLE_SIZE], ClientError> {
        let decoded = BASE64.decode(salt.trim()).map_err(|e| {
            ProtocolError::InvalidGreeting(format!("salt is not valid base64: {e}"))
        })?;
        // The salt field does not necessarily decode to 32 bytes; only the
        // first 20 decoded bytes take part in the challenge.
        if decoded.len() < SCRAMBLE_SIZE {
            return Err(ProtocolError::InvalidGreeting(format!(
                "salt decodes to {} bytes, need at least {SCRAMBLE_SIZE}",
                decoded.len()
            ))
            .into());
        }

        let step1 = Sha1::digest(credentials.password().as_bytes());
        let step2 = Sha1::digest(&step1[..]);

        let mut hasher = Sha1::new();
        hasher.update(&decoded[..SCRAMBLE_SIZE]);
        hasher.update(&step2[..]);
        let step3 = hasher.finalize();

        let mut scramble = [0u8; SCRAMBLE_SIZE];
        for (i, out) in scramble.iter_mut().enumerate() {
            *out = step1[i] ^ step3[i];
        }
        Ok(scramble)
    }
}
