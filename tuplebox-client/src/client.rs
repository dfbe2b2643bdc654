//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, TIMEOUT_TICK_INTERVAL};
use crate::error::ClientError;
use crate::metadata::Metadata;
use crate::space::Space;
use rmpv::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tuplebox_protocol::{RequestType, ResultMapperFactory};

/// Client for a single tuplebox server.
///
/// `connect` establishes the session and spawns the background read loop and
/// the request deadline ticker; both stop on `close`.
pub struct Client {
    conn: Arc<Connection>,
    metadata: Arc<Metadata>,
    result_mappers: ResultMapperFactory,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Connects with the default configuration (localhost:3301, admin).
    pub async fn connect_default() -> Result<Self, ClientError> {
        Self::connect(ClientConfig::default()).await
    }

    /// Connects to the server described by `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let conn = Arc::new(Connection::new(config));
        conn.connect().await?;

        let metadata = Arc::new(Metadata::new(conn.clone()));
        let mut tasks = Vec::with_capacity(2);

        let reader_conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(error) = reader_conn.read_loop().await {
                tracing::debug!(%error, "read loop terminated");
            }
        }));

        let ticker_conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_TICK_INTERVAL);
            loop {
                interval.tick().await;
                if ticker_conn.state() == ConnectionState::Closed {
                    break;
                }
                ticker_conn.tick(Instant::now());
            }
        }));

        Ok(Self {
            conn,
            metadata,
            result_mappers: ResultMapperFactory::new(),
            tasks: Mutex::new(tasks),
        })
    }

    /// Returns whether the connection accepts requests.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Server version banner from the greeting.
    pub fn server_version(&self) -> Option<String> {
        self.conn.server_version()
    }

    /// Schema version from the most recent response header.
    pub fn schema_version(&self) -> u64 {
        self.conn.schema_version()
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.conn.pending_count()
    }

    /// Schema metadata operations.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Per-type cache of result mappers for `select_with`.
    pub fn result_mappers(&self) -> &ResultMapperFactory {
        &self.result_mappers
    }

    /// Round-trips a ping request.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.conn
            .request(RequestType::Ping.code(), Value::Map(Vec::new()))
            .await?;
        Ok(())
    }

    /// Opens CRUD operations over the named space.
    pub async fn space(&self, name: &str) -> Result<Space, ClientError> {
        if name.trim().is_empty() {
            return Err(ClientError::InvalidRequest(
                "space name must not be empty".into(),
            ));
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let meta = self
            .metadata
            .space_by_name(name)
            .await?
            .ok_or_else(|| ClientError::SpaceNotFound(name.to_string()))?;
        Ok(Space::new(self.conn.clone(), self.metadata.clone(), meta))
    }

    /// Opens CRUD operations over the space with the given id.
    pub async fn space_by_id(&self, id: u32) -> Result<Space, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let meta = self
            .metadata
            .space_by_id(id)
            .await?
            .ok_or_else(|| ClientError::SpaceNotFound(id.to_string()))?;
        Ok(Space::new(self.conn.clone(), self.metadata.clone(), meta))
    }

    /// Closes the connection, failing every pending request, and stops the
    /// background tasks.
    pub async fn close(&self) -> Result<(), ClientError> {
        let result = self.conn.close().await;
        let tasks = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            task.abort();
        }
        result
    }
}
