//! Backend abstraction for database drivers.
//!
//! A [`Backend`] hands out two kinds of connections: pooled connections for
//! tenant operations, and dedicated unpooled connections for the locked
//! administrative handle and for provisioning.

use std::fmt::Debug;

use async_trait::async_trait;

use super::connection::Connection;
use crate::error::BackendError;

/// Identifies the type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process engine emulating PostgreSQL schema semantics.
    Memory,
    /// PostgreSQL database.
    Postgres,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A database backend with schema and `search_path` support.
///
/// # Connection ownership
///
/// Connections returned by [`acquire`](Backend::acquire) belong to a pool and
/// go back to it when dropped. Their `search_path` is unknown at checkout: a
/// previous holder may have left any tenant's schema active.
///
/// Connections returned by [`connect_dedicated`](Backend::connect_dedicated)
/// are never shared and are closed when dropped.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// The connection type for this backend.
    type Connection: Connection + 'static;

    /// Returns the kind of this backend.
    fn kind(&self) -> BackendKind;

    /// Returns the backend name for logging and errors.
    fn name(&self) -> &'static str;

    /// Checks out a pooled connection.
    async fn acquire(&self) -> Result<Self::Connection, BackendError>;

    /// Opens a fresh connection that is not part of the pool.
    async fn connect_dedicated(&self) -> Result<Self::Connection, BackendError>;

    /// Checks that the backend is reachable.
    async fn health_check(&self) -> Result<(), BackendError>;
}
