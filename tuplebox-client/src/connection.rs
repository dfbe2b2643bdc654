//! Connection management.
//!
//! A connection runs the full lifecycle against one server: TCP connect,
//! 128-byte greeting, chap-sha1 authentication, then multiplexed
//! request/response traffic correlated by sync id.

use crate::auth::Authenticator;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::registry::RequestRegistry;
use rmpv::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tuplebox_protocol::consts::keys;
use tuplebox_protocol::{Decoder, Frame, Greeting, Header, RequestType, GREETING_SIZE};

/// How often the registry sweeps for expired deadlines.
pub(crate) const TIMEOUT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Connection lifecycle states. Only `Ready` accepts user requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Greeted,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

/// A connection to a tuplebox server.
pub struct Connection {
    config: ClientConfig,
    state: StdMutex<ConnectionState>,
    /// Write half of the stream, serializing outbound dispatch.
    writer: Mutex<Option<WriteHalf<TcpStream>>>,
    /// Read half; the read loop takes ownership of it when it starts.
    reader: Mutex<Option<ReadHalf<TcpStream>>>,
    /// Inbound frame decoder.
    decoder: Mutex<Decoder>,
    registry: RequestRegistry,
    greeting: StdMutex<Option<Greeting>>,
    /// Schema version reported by the most recent response header.
    schema_version: AtomicU64,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: StdMutex::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            registry: RequestRegistry::new(),
            greeting: StdMutex::new(None),
            schema_version: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        tracing::debug!(state = ?next, "connection state");
        *lock(&self.state) = next;
    }

    /// Returns whether the connection accepts user requests.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Server version banner from the greeting, if connected.
    pub fn server_version(&self) -> Option<String> {
        lock(&self.greeting)
            .as_ref()
            .map(|greeting| greeting.version().to_string())
    }

    /// Schema version seen in the most recent response header.
    pub fn schema_version(&self) -> u64 {
        self.schema_version.load(Ordering::Relaxed)
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Connects to the server and performs the greeting/auth handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Disconnected {
            return Err(ClientError::InvalidRequest(
                "connection has already been used".into(),
            ));
        }
        self.set_state(ConnectionState::Connecting);

        let addr = self.config.addr();
        tracing::debug!(%addr, "connecting");
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Closed);
                return Err(ClientError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.set_state(ConnectionState::Closed);
                return Err(ClientError::ConnectFailed {
                    addr,
                    reason: "connect timed out".into(),
                });
            }
        };
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.decoder.lock().await.clear();

        let greeting = self.read_greeting(&addr).await?;
        tracing::debug!(version = greeting.version(), "greeted");
        self.set_state(ConnectionState::Greeted);
        *lock(&self.greeting) = Some(greeting.clone());

        if let Err(e) = self.authenticate(&greeting).await {
            self.set_state(ConnectionState::Closed);
            return Err(e);
        }
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Reads the fixed 128-byte preamble, bounded by the read timeout.
    async fn read_greeting(&self, addr: &str) -> Result<Greeting, ClientError> {
        let mut raw = [0u8; GREETING_SIZE];
        let read = tokio::time::timeout(self.config.read_timeout, async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(ClientError::NotConnected)?;
            reader.read_exact(&mut raw).await.map_err(ClientError::Io)
        })
        .await;

        match read {
            Ok(Ok(_)) => match Greeting::parse(&raw) {
                Ok(greeting) => Ok(greeting),
                Err(e) => {
                    self.set_state(ConnectionState::Closed);
                    Err(e.into())
                }
            },
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Closed);
                Err(e)
            }
            Err(_) => {
                self.set_state(ConnectionState::Closed);
                Err(ClientError::ConnectFailed {
                    addr: addr.to_string(),
                    reason: "greeting read timed out".into(),
                })
            }
        }
    }

    /// Dispatches the auth request and reads its response directly off the
    /// socket (the read loop is not running yet). Unusable credentials skip
    /// authentication entirely; the server permits unauthenticated sessions.
    async fn authenticate(&self, greeting: &Greeting) -> Result<(), ClientError> {
        let credentials = &self.config.credentials;
        if !credentials.is_usable() {
            tracing::debug!("credentials unusable, skipping authentication");
            return Ok(());
        }

        let authenticator = Authenticator::select(self.config.auth_mechanism, credentials)?;
        self.set_state(ConnectionState::Authenticating);
        tracing::debug!(
            user = credentials.username(),
            mechanism = %authenticator.mechanism(),
            "authenticating"
        );

        let scramble = authenticator.scramble(greeting.salt(), credentials)?;
        let sync = self.registry.next_sync();
        let body = Value::Map(vec![
            (
                Value::from(keys::USER_NAME),
                Value::from(credentials.username()),
            ),
            (
                Value::from(keys::TUPLE),
                Value::Array(vec![
                    Value::from(authenticator.mechanism().as_str()),
                    Value::Binary(scramble.to_vec()),
                ]),
            ),
        ]);
        let frame = Frame::new(Header::request(RequestType::Auth.code(), sync), body);
        self.write_frame(&frame).await?;

        let response = self.read_single_frame().await?;
        if response.header.is_error() {
            let message = error_message(&response.body);
            tracing::debug!(code = response.header.server_code(), "auth rejected");
            self.set_state(ConnectionState::Closed);
            return Err(ClientError::AuthFailed(message));
        }
        Ok(())
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await.map_err(ClientError::Io)
    }

    /// Reads one frame directly, bounded by the read timeout. Handshake only;
    /// once the read loop runs, it owns the read half.
    async fn read_single_frame(&self) -> Result<Frame, ClientError> {
        tokio::time::timeout(self.config.read_timeout, async {
            let mut buf = vec![0u8; self.config.read_buffer_size];
            loop {
                if let Some(frame) = self.decoder.lock().await.decode_frame()? {
                    return Ok(frame);
                }
                let n = {
                    let mut guard = self.reader.lock().await;
                    let reader = guard.as_mut().ok_or(ClientError::NotConnected)?;
                    reader.read(&mut buf).await.map_err(ClientError::Io)?
                };
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                self.decoder.lock().await.extend(&buf[..n]);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Sends a request and waits for the matching response body.
    ///
    /// Registration, encoding, and the socket write happen under the write
    /// mutex, so sync ids appear on the wire in registration order.
    pub async fn request(&self, code: u32, body: Value) -> Result<Value, ClientError> {
        if self.state() != ConnectionState::Ready {
            return Err(ClientError::NotConnected);
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let (sync, rx) = {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;

            let sync = self.registry.next_sync();
            let rx = self.registry.register(sync, deadline)?;
            tracing::debug!(sync, code, "dispatching request");

            let frame = Frame::new(Header::request(code, sync), body);
            let encoded = frame.encode()?;
            if let Err(e) = writer.write_all(&encoded).await {
                drop(guard);
                tracing::debug!(sync, error = %e, "write failed, closing connection");
                self.fail_connection();
                return Err(ClientError::Io(e));
            }
            (sync, rx)
        };

        // Dropping this future before the response arrives cancels the
        // registry entry; a later response for this sync is dropped silently.
        let mut cancel = CancelGuard {
            registry: &self.registry,
            sync,
            armed: true,
        };
        let result = rx.await;
        cancel.armed = false;
        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Reads and routes responses. Run this on a background task; it returns
    /// when the peer closes, an I/O error occurs, or a frame fails to parse.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(ClientError::NotConnected)?;
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "read failed");
                    self.fail_connection();
                    return Err(ClientError::Io(e));
                }
            };
            if n == 0 {
                tracing::debug!("peer closed connection");
                self.fail_connection();
                return Err(ClientError::ConnectionClosed);
            }

            let mut decoder = self.decoder.lock().await;
            decoder.extend(&buf[..n]);
            loop {
                match decoder.decode_frame() {
                    Ok(Some(frame)) => self.route(frame),
                    Ok(None) => break,
                    Err(e) => {
                        drop(decoder);
                        tracing::warn!(error = %e, "malformed inbound frame, closing");
                        self.fail_connection();
                        return Err(e.into());
                    }
                }
            }
        }
    }

    /// Routes one inbound frame to its pending completion.
    fn route(&self, frame: Frame) {
        let header = frame.header;
        if let Some(version) = header.schema_version {
            self.schema_version.store(version, Ordering::Relaxed);
        }

        if header.is_error() {
            let code = header.server_code();
            let message = error_message(&frame.body);
            tracing::debug!(sync = header.sync, code, "server error response");
            self.registry.fail(header.sync, ClientError::Server { code, message });
        } else {
            tracing::debug!(sync = header.sync, "response");
            self.registry.complete(header.sync, frame.body);
        }
    }

    /// Transport failure: broadcast to every pending completion and close.
    fn fail_connection(&self) {
        self.set_state(ConnectionState::Closing);
        self.registry.shutdown(ClientError::ConnectionClosed);
        self.set_state(ConnectionState::Closed);
    }

    /// Sweeps expired request deadlines.
    pub(crate) fn tick(&self, now: Instant) {
        self.registry.tick(now);
    }

    /// Closes the connection: shuts the socket down and fails every pending
    /// completion with `ConnectionClosed`.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.set_state(ConnectionState::Closing);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();

        self.registry.shutdown(ClientError::ConnectionClosed);
        self.set_state(ConnectionState::Closed);
        tracing::debug!("connection closed");
        Ok(())
    }
}

/// Extracts the data rows from a response body, or an empty list when the
/// body carries none.
pub(crate) fn response_data(body: &Value) -> Vec<Value> {
    body.as_map()
        .and_then(|entries| {
            entries
                .iter()
                .find(|(key, _)| key.as_u64() == Some(keys::DATA))
                .and_then(|(_, data)| data.as_array())
        })
        .cloned()
        .unwrap_or_default()
}

fn error_message(body: &Value) -> String {
    body.as_map()
        .and_then(|entries| {
            entries
                .iter()
                .find(|(key, _)| key.as_u64() == Some(keys::ERROR))
                .and_then(|(_, message)| message.as_str())
        })
        .unwrap_or("unknown server error")
        .to_string()
}

struct CancelGuard<'a> {
    registry: &'a RequestRegistry,
    sync: u64,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.cancel(self.sync);
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
