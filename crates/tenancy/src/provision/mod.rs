//! Tenant schema provisioning.
//!
//! Provisioning runs in three phases on one dedicated connection that is
//! never shared with tenant traffic:
//!
//! 1. `CREATE SCHEMA IF NOT EXISTS` for the sanitized tenant schema
//! 2. `SET search_path` to the new schema, with the default schema as fallback
//! 3. the [`Migrator`] materializes the requested [`SchemaObject`]s
//!
//! Each phase is its own statement outside any transaction. A failure reports
//! the phase; after a `Migrate` failure the schema exists but may be
//! incomplete. Provisioning is idempotent, so the usual recovery is to retry.

mod migrator;
mod object;

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::{Backend, Connection};
use crate::error::{ProvisioningError, ProvisioningPhase, TenancyError, TenancyResult};
use crate::interceptor::search_path_sql;
use crate::tenant::{RequestContext, SchemaName, sanitize};

pub use migrator::{DdlMigrator, Migrator};
pub use object::{Column, SchemaObject, split_statements};

/// Builds the idempotent schema creation statement.
pub fn create_schema_sql(schema: &SchemaName) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted())
}

/// Builds the schema removal statement.
pub fn drop_schema_sql(schema: &SchemaName, cascade: bool) -> String {
    format!(
        "DROP SCHEMA IF EXISTS {}{}",
        schema.quoted(),
        if cascade { " CASCADE" } else { "" }
    )
}

/// Builds the catalog lookup for a schema.
pub fn schema_exists_sql(schema: &SchemaName) -> String {
    format!(
        "SELECT schema_name FROM information_schema.schemata WHERE schema_name = {}",
        schema.literal()
    )
}

/// Creates, inspects and removes tenant schemas.
pub struct TenantProvisioner<B: Backend> {
    backend: Arc<B>,
    default_schema: SchemaName,
    migrator: Arc<dyn Migrator>,
}

impl<B: Backend> Clone for TenantProvisioner<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            default_schema: self.default_schema.clone(),
            migrator: Arc::clone(&self.migrator),
        }
    }
}

impl<B: Backend> std::fmt::Debug for TenantProvisioner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantProvisioner")
            .field("backend", &self.backend)
            .field("default_schema", &self.default_schema)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TenantProvisioner<B> {
    /// Creates a provisioner using [`DdlMigrator`].
    pub fn new(backend: Arc<B>, default_schema: SchemaName) -> Self {
        Self {
            backend,
            default_schema,
            migrator: Arc::new(DdlMigrator),
        }
    }

    /// Replaces the migrator.
    pub fn with_migrator(mut self, migrator: impl Migrator + 'static) -> Self {
        self.migrator = Arc::new(migrator);
        self
    }

    /// Creates the tenant schema and its objects.
    ///
    /// Calling this again with the same arguments succeeds and creates
    /// nothing new.
    pub async fn provision(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        objects: &[SchemaObject],
    ) -> TenancyResult<SchemaName> {
        let schema = sanitize(identifier).inspect_err(|err| {
            warn!(error = %err, "Rejected tenant identifier for provisioning");
        })?;
        if schema.exceeds_identifier_limit() {
            warn!(
                schema = %schema,
                "Schema name is longer than 63 bytes; PostgreSQL truncates it"
            );
        }

        let phase_error = |phase: ProvisioningPhase| {
            let schema = schema.clone();
            move |err: TenancyError| {
                warn!(schema = %schema, %phase, error = %err, "Provisioning failed");
                TenancyError::Provisioning(ProvisioningError {
                    schema,
                    phase,
                    source: err.into(),
                })
            }
        };

        let mut conn = ctx
            .run(self.backend.connect_dedicated())
            .await
            .map_err(phase_error(ProvisioningPhase::CreateSchema))?;

        ctx.run(conn.execute(&create_schema_sql(&schema)))
            .await
            .map_err(phase_error(ProvisioningPhase::CreateSchema))?;
        info!(schema = %schema, "Created tenant schema");

        ctx.run(conn.execute(&search_path_sql(&schema, &self.default_schema)))
            .await
            .map_err(phase_error(ProvisioningPhase::SwitchScope))?;

        ctx.run(self.migrator.migrate(&mut conn, &schema, objects))
            .await
            .map_err(phase_error(ProvisioningPhase::Migrate))?;
        info!(schema = %schema, objects = objects.len(), "Provisioned tenant schema");

        Ok(schema)
    }

    /// Returns `true` if the tenant schema exists.
    pub async fn schema_exists(&self, ctx: &RequestContext, identifier: &str) -> TenancyResult<bool> {
        let schema = sanitize(identifier)?;
        let mut conn = ctx.run(self.backend.acquire()).await?;
        let rows = ctx.run(conn.query(&schema_exists_sql(&schema))).await?;
        Ok(!rows.is_empty())
    }

    /// Drops the tenant schema if it exists.
    ///
    /// Without `cascade` the drop fails while the schema still holds objects.
    pub async fn drop_tenant(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        cascade: bool,
    ) -> TenancyResult<()> {
        let schema = sanitize(identifier)?;
        let mut conn = ctx.run(self.backend.acquire()).await?;
        ctx.run(conn.execute(&drop_schema_sql(&schema, cascade)))
            .await
            .inspect_err(|err| {
                warn!(schema = %schema, error = %err, "Failed to drop tenant schema");
            })?;
        info!(schema = %schema, cascade, "Dropped tenant schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use crate::error::{BackendError, ProvisioningCause};
    use async_trait::async_trait;

    fn provisioner(backend: &MemoryBackend) -> TenantProvisioner<MemoryBackend> {
        TenantProvisioner::new(Arc::new(backend.clone()), sanitize("public").unwrap())
    }

    fn widgets() -> Vec<SchemaObject> {
        vec![
            SchemaObject::table(
                "widgets",
                vec![
                    Column::new("id", "BIGINT PRIMARY KEY").unwrap(),
                    Column::new("name", "TEXT").unwrap(),
                ],
            )
            .unwrap(),
            SchemaObject::index("widgets_name", "widgets", &["name"]).unwrap(),
        ]
    }

    struct FailingMigrator;

    #[async_trait]
    impl Migrator for FailingMigrator {
        async fn migrate(
            &self,
            _connection: &mut dyn Connection,
            _schema: &SchemaName,
            _objects: &[SchemaObject],
        ) -> Result<(), BackendError> {
            Err(BackendError::QueryError {
                message: "permission denied for schema".to_string(),
            })
        }
    }

    #[test]
    fn test_statement_builders() {
        let schema = sanitize("acme_corp").unwrap();
        assert_eq!(
            create_schema_sql(&schema),
            "CREATE SCHEMA IF NOT EXISTS \"acme_corp\""
        );
        assert_eq!(
            drop_schema_sql(&schema, true),
            "DROP SCHEMA IF EXISTS \"acme_corp\" CASCADE"
        );
        assert_eq!(
            schema_exists_sql(&schema),
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = 'acme_corp'"
        );
    }

    #[tokio::test]
    async fn test_provision_creates_schema_and_objects() {
        let backend = MemoryBackend::new();
        let ctx = RequestContext::new();
        let schema = provisioner(&backend)
            .provision(&ctx, "acme_corp", &widgets())
            .await
            .unwrap();

        assert_eq!(schema.as_str(), "acme_corp");
        assert_eq!(backend.tables("acme_corp"), vec!["widgets".to_string()]);
        assert_eq!(backend.indexes("acme_corp"), vec!["widgets_name".to_string()]);
        assert!(backend.tables("public").is_empty());
    }

    #[tokio::test]
    async fn test_provision_accepts_overlong_identifier() {
        let backend = MemoryBackend::new();
        let tenant = format!("tenant_{}", "x".repeat(60));
        let schema = provisioner(&backend)
            .provision(&RequestContext::new(), &tenant, &widgets())
            .await
            .unwrap();
        assert!(schema.exceeds_identifier_limit());
        assert_eq!(backend.tables(&tenant), vec!["widgets".to_string()]);
    }

    #[tokio::test]
    async fn test_provision_uses_dedicated_connection() {
        let backend = MemoryBackend::new();
        provisioner(&backend)
            .provision(&RequestContext::new(), "acme_corp", &widgets())
            .await
            .unwrap();
        // Nothing went back to the pool carrying the tenant search_path.
        assert_eq!(backend.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_provision_rejects_hostile_identifier() {
        let backend = MemoryBackend::new();
        let err = provisioner(&backend)
            .provision(&RequestContext::new(), "acme; DROP SCHEMA public", &widgets())
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::InvalidIdentifier(_)));
        assert!(backend.statement_log().is_empty());
    }

    #[tokio::test]
    async fn test_migration_failure_reports_phase() {
        let backend = MemoryBackend::new();
        let err = provisioner(&backend)
            .with_migrator(FailingMigrator)
            .provision(&RequestContext::new(), "acme", &widgets())
            .await
            .unwrap_err();

        let err = match err {
            TenancyError::Provisioning(err) => err,
            other => panic!("expected provisioning error, got {other:?}"),
        };
        assert_eq!(err.phase, ProvisioningPhase::Migrate);
        assert!(err.phase.schema_created());
        assert!(matches!(err.source, ProvisioningCause::Backend(_)));
        assert!(backend.schema_exists("acme"));
    }

    #[tokio::test]
    async fn test_cancelled_provisioning_issues_nothing() {
        let backend = MemoryBackend::new();
        let ctx = RequestContext::new();
        ctx.cancel();
        let err = provisioner(&backend)
            .provision(&ctx, "acme", &widgets())
            .await
            .unwrap_err();
        let err = match err {
            TenancyError::Provisioning(err) => err,
            other => panic!("expected provisioning error, got {other:?}"),
        };
        assert_eq!(err.phase, ProvisioningPhase::CreateSchema);
        assert!(matches!(err.source, ProvisioningCause::Cancelled));
        assert!(backend.statement_log().is_empty());
    }

    #[tokio::test]
    async fn test_exists_and_drop() {
        let backend = MemoryBackend::new();
        let ctx = RequestContext::new();
        let provisioner = provisioner(&backend);

        assert!(!provisioner.schema_exists(&ctx, "acme").await.unwrap());
        provisioner.provision(&ctx, "acme", &widgets()).await.unwrap();
        assert!(provisioner.schema_exists(&ctx, "acme").await.unwrap());

        let err = provisioner.drop_tenant(&ctx, "acme", false).await.unwrap_err();
        assert!(matches!(err, TenancyError::Backend(_)));
        assert!(backend.schema_exists("acme"));

        provisioner.drop_tenant(&ctx, "acme", true).await.unwrap();
        assert!(!provisioner.schema_exists(&ctx, "acme").await.unwrap());

        // Dropping a missing tenant is not an error.
        provisioner.drop_tenant(&ctx, "acme", false).await.unwrap();
        assert!(provisioner.drop_tenant(&ctx, "acme;", true).await.is_err());
    }
}
