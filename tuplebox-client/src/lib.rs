//! # tuplebox-client
//!
//! Async client for the tuplebox database.
//!
//! This crate provides:
//! - Connection lifecycle management (greeting, chap-sha1 auth, close)
//! - Sync-id multiplexed request/response correlation with timeouts
//! - Schema metadata caching (spaces and indexes by name and id)
//! - A typed CRUD surface over spaces

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod space;
pub mod tuple;

pub use auth::{AuthMechanism, Authenticator};
pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, Credentials};
pub use connection::{Connection, ConnectionState};
pub use error::ClientError;
pub use metadata::{IndexMetadata, Metadata, SpaceMetadata};
pub use registry::RequestRegistry;
pub use space::{IndexRef, IteratorType, SelectOptions, Space, UpdateOp};
pub use tuple::Tuple;

pub use rmpv::Value;
