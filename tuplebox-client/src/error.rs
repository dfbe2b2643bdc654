//! Client error types.

use thiserror::Error;
use tuplebox_protocol::{MapperError, ProtocolError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("mapping error: {0}")]
    Mapper(#[from] MapperError),

    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("no authenticator accepts the configured credentials for mechanism '{0}'")]
    NoSuitableAuthenticator(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("sync {0} is already registered")]
    DuplicateSync(u64),

    #[error("server error {code:#06x}: {message}")]
    Server { code: u32, message: String },

    #[error("space '{0}' not found")]
    SpaceNotFound(String),

    #[error("index '{index}' not found in space '{space}'")]
    IndexNotFound { space: String, index: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Copies an error for broadcast to every pending completion. Parse and
    /// mapping errors collapse to `ConnectionClosed`: they are fatal for the
    /// connection and that is what a waiting caller observes.
    pub(crate) fn replicate(&self) -> ClientError {
        match self {
            ClientError::Io(e) => ClientError::Io(std::io::Error::new(e.kind(), e.to_string())),
            ClientError::Protocol(_) | ClientError::Mapper(_) => ClientError::ConnectionClosed,
            ClientError::ConnectFailed { addr, reason } => ClientError::ConnectFailed {
                addr: addr.clone(),
                reason: reason.clone(),
            },
            ClientError::AuthFailed(message) => ClientError::AuthFailed(message.clone()),
            ClientError::NoSuitableAuthenticator(mechanism) => {
                ClientError::NoSuitableAuthenticator(mechanism.clone())
            }
            ClientError::Config(message) => ClientError::Config(message.clone()),
            ClientError::NotConnected => ClientError::NotConnected,
            ClientError::ConnectionClosed => ClientError::ConnectionClosed,
            ClientError::Timeout => ClientError::Timeout,
            ClientError::Cancelled => ClientError::Cancelled,
            ClientError::DuplicateSync(sync) => ClientError::DuplicateSync(*sync),
            ClientError::Server { code, message } => ClientError::Server {
                code: *code,
                message: message.clone(),
            },
            ClientError::SpaceNotFound(name) => ClientError::SpaceNotFound(name.clone()),
            ClientError::IndexNotFound { space, index } => ClientError::IndexNotFound {
                space: space.clone(),
                index: index.clone(),
            },
            ClientError::InvalidRequest(message) => {
                ClientError::InvalidRequest(message.clone())
            }
        }
    }
}
