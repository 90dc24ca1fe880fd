//! Engine bootstrap.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::{TenancyConfig, ValidatedConfig};
use crate::core::Backend;
use crate::error::{TenancyError, TenancyResult};
use crate::interceptor::{SearchPathInterceptor, SearchPathPlugin};
use crate::lock::{ConnectionLocker, LockedConnection};
use crate::provision::TenantProvisioner;
use crate::session::TenantDb;

/// A started tenancy engine.
///
/// Holds the locked administrative connection, the tenant-aware data-access
/// handle and the provisioner, all sharing one backend.
pub struct TenancyEngine<B: Backend> {
    config: ValidatedConfig,
    db: TenantDb<B>,
    provisioner: TenantProvisioner<B>,
    admin: Arc<Mutex<LockedConnection<B::Connection>>>,
}

impl<B: Backend> Clone for TenancyEngine<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
            provisioner: self.provisioner.clone(),
            admin: Arc::clone(&self.admin),
        }
    }
}

impl<B: Backend> std::fmt::Debug for TenancyEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenancyEngine")
            .field("config", &self.config)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TenancyEngine<B> {
    /// Starts the engine.
    ///
    /// Validates `config`, opens and locks the administrative connection, and
    /// installs the search path plugin. Any failure aborts startup; a lock
    /// failure is reported as [`TenancyError::StartupLock`].
    pub async fn start(backend: B, config: TenancyConfig) -> TenancyResult<Self> {
        let config = config.validate()?;
        let backend = Arc::new(backend);

        let admin = backend
            .connect_dedicated()
            .await
            .map_err(|source| TenancyError::StartupLock { source })?;
        let admin = ConnectionLocker::new(config.lock_schema.clone())
            .lock_owned(admin)
            .await?;

        let plugin = SearchPathPlugin::new(SearchPathInterceptor::with_key(
            config.tenant_key.clone(),
            config.default_schema.clone(),
        ));
        let db = TenantDb::builder(Arc::clone(&backend))
            .plugin(&plugin)?
            .build();
        let provisioner = TenantProvisioner::new(Arc::clone(&backend), config.default_schema.clone());

        info!(
            backend = backend.name(),
            tenant_key = %config.tenant_key,
            default_schema = %config.default_schema,
            "Tenancy engine started"
        );

        Ok(Self {
            config,
            db,
            provisioner,
            admin: Arc::new(Mutex::new(admin)),
        })
    }

    /// Returns the validated configuration.
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        self.db.backend()
    }

    /// Returns the tenant-aware data-access handle.
    pub fn db(&self) -> &TenantDb<B> {
        &self.db
    }

    /// Returns the provisioner.
    pub fn provisioner(&self) -> &TenantProvisioner<B> {
        &self.provisioner
    }

    /// Returns the locked administrative connection.
    pub fn admin(&self) -> &Arc<Mutex<LockedConnection<B::Connection>>> {
        &self.admin
    }
}
