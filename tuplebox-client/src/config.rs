//! Client configuration.

use crate::auth::AuthMechanism;
use crate::error::ClientError;
use std::sync::Arc;
use std::time::Duration;
use tuplebox_protocol::{Mapper, DEFAULT_PORT};

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default credentials.
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "password";

/// Default timeouts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// User credentials. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether these credentials can be used for authentication: a non-blank
    /// username and a non-empty password.
    pub fn is_usable(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

/// Client configuration. Immutable after build.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub auth_mechanism: AuthMechanism,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    pub read_buffer_size: usize,
    /// Mapper used for both object-to-value and value-to-object conversion.
    pub mapper: Arc<Mapper>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// `host:port` string for diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().finish()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    host: String,
    port: u16,
    credentials: Credentials,
    auth_mechanism: AuthMechanism,
    connect_timeout: Duration,
    read_timeout: Duration,
    request_timeout: Duration,
    read_buffer_size: usize,
    mapper: Option<Arc<Mapper>>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            credentials: Credentials::new(DEFAULT_USER, DEFAULT_PASSWORD),
            auth_mechanism: AuthMechanism::ChapSha1,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            mapper: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_auth_mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.auth_mechanism = mechanism;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<Mapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ClientConfig, ClientError> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must not be 0".into()));
        }
        for (name, timeout) in [
            ("connect timeout", self.connect_timeout),
            ("read timeout", self.read_timeout),
            ("request timeout", self.request_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ClientError::Config(format!("{name} must be positive")));
            }
        }
        Ok(self.finish())
    }

    fn finish(self) -> ClientConfig {
        ClientConfig {
            host: self.host,
            port: self.port,
            credentials: self.credentials,
            auth_mechanism: self.auth_mechanism,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            request_timeout: self.request_timeout,
            read_buffer_size: self.read_buffer_size,
            mapper: self
                .mapper
                .unwrap_or_else(|| Arc::new(Mapper::with_defaults())),
        }
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.credentials.username(), DEFAULT_USER);
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
        assert_eq!(config.read_timeout, Duration::from_millis(1000));
        assert_eq!(config.request_timeout, Duration::from_millis(2000));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_buffer_size_clamping() {
        let config = ClientConfig::builder().with_read_buffer_size(10);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ClientConfig::builder().with_read_buffer_size(16 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ClientConfig::builder()
            .with_request_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_empty_host_rejected() {
        let result = ClientConfig::builder().with_host("  ").build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_credentials_usability() {
        assert!(Credentials::new("admin", "secret").is_usable());
        assert!(!Credentials::new("", "secret").is_usable());
        assert!(!Credentials::new("admin", "").is_usable());
        assert!(!Credentials::new("   ", "secret").is_usable());
    }
}
