//! Materializing schema objects on a scoped connection.

use async_trait::async_trait;
use tracing::debug;

use super::object::SchemaObject;
use crate::core::Connection;
use crate::error::BackendError;
use crate::tenant::SchemaName;

/// Creates schema objects inside a tenant schema.
///
/// `connection` has already been switched into `schema`; implementations
/// issue unqualified DDL.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Materializes `objects` in order, stopping at the first failure.
    async fn migrate(
        &self,
        connection: &mut dyn Connection,
        schema: &SchemaName,
        objects: &[SchemaObject],
    ) -> Result<(), BackendError>;
}

/// Runs each object's DDL statements one by one, outside any transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlMigrator;

#[async_trait]
impl Migrator for DdlMigrator {
    async fn migrate(
        &self,
        connection: &mut dyn Connection,
        schema: &SchemaName,
        objects: &[SchemaObject],
    ) -> Result<(), BackendError> {
        for object in objects {
            for statement in object.statements() {
                connection.execute(&statement).await?;
            }
            debug!(schema = %schema, object = %object.name(), "Materialized schema object");
        }
        Ok(())
    }
}
