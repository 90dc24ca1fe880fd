//! Fail-closed locking of the administrative connection.
//!
//! The administrative connection is never used for tenant queries. At startup
//! its `search_path` is pointed at a schema that does not exist, so any
//! unqualified statement sent through it without an explicit scope switch
//! fails with an unknown-schema error instead of touching `public` or a
//! previous tenant's schema.

use tracing::{error, info};

use crate::core::Connection;
use crate::error::{BackendError, TenancyError, TenancyResult};
use crate::tenant::SchemaName;

/// Builds the lock statement for `lock_schema`.
pub fn lock_sql(lock_schema: &SchemaName) -> String {
    format!("SET search_path TO {}", lock_schema.quoted())
}

/// Locks connections to a nonexistent schema.
#[derive(Debug, Clone)]
pub struct ConnectionLocker {
    lock_schema: SchemaName,
}

impl ConnectionLocker {
    /// Creates a locker targeting `lock_schema`.
    pub fn new(lock_schema: SchemaName) -> Self {
        Self { lock_schema }
    }

    /// Returns the lock schema name.
    pub fn lock_schema(&self) -> &SchemaName {
        &self.lock_schema
    }

    /// Locks `connection`.
    ///
    /// Failure is reported as [`TenancyError::StartupLock`] and must abort
    /// startup.
    pub async fn lock<C>(&self, connection: &mut C) -> TenancyResult<()>
    where
        C: Connection + ?Sized,
    {
        let sql = lock_sql(&self.lock_schema);
        match connection.execute(&sql).await {
            Ok(_) => {
                info!(lock_schema = %self.lock_schema, "Locked administrative connection");
                Ok(())
            }
            Err(source) => {
                error!(
                    lock_schema = %self.lock_schema,
                    error = %source,
                    "Failed to lock administrative connection"
                );
                Err(TenancyError::StartupLock { source })
            }
        }
    }

    /// Takes ownership of `connection` and locks it.
    pub async fn lock_owned<C>(&self, mut connection: C) -> TenancyResult<LockedConnection<C>>
    where
        C: Connection,
    {
        self.lock(&mut connection).await?;
        Ok(LockedConnection {
            connection,
            lock_schema: self.lock_schema.clone(),
        })
    }
}

/// An administrative connection whose default scope is the lock schema.
#[derive(Debug)]
pub struct LockedConnection<C> {
    connection: C,
    lock_schema: SchemaName,
}

impl<C: Connection> LockedConnection<C> {
    /// Returns the schema this connection is locked to.
    pub fn lock_schema(&self) -> &SchemaName {
        &self.lock_schema
    }

    /// Executes a statement against the locked scope.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.connection.execute(sql).await
    }

    /// Runs a query against the locked scope.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<crate::core::Row>, BackendError> {
        self.connection.query(sql).await
    }

    /// Re-applies the lock after a statement changed the search path.
    pub async fn relock(&mut self) -> TenancyResult<()> {
        ConnectionLocker::new(self.lock_schema.clone())
            .lock(&mut self.connection)
            .await
    }

    /// Returns the underlying connection.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}
