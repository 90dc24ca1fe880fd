//! PostgreSQL backend implementation.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime, SslMode};
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use super::config::{PostgresConfig, PostgresSslMode};
use super::connection::PostgresConnection;
use crate::core::{Backend, BackendKind};
use crate::error::BackendError;

/// PostgreSQL backend.
///
/// Pooled connections come from `deadpool-postgres`. Dedicated connections
/// are opened directly with `tokio-postgres` using the same settings.
pub struct PostgresBackend {
    pool: Pool,
    config: PostgresConfig,
}

impl Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("dbname", &self.config.dbname)
            .field("pool_size", &self.pool.status().size)
            .finish_non_exhaustive()
    }
}

fn internal(message: String) -> BackendError {
    BackendError::Internal {
        backend_name: "postgres".to_string(),
        message,
        source: None,
    }
}

impl PostgresBackend {
    /// Creates a backend and verifies connectivity.
    pub async fn new(config: PostgresConfig) -> Result<Self, BackendError> {
        let pool = Self::create_pool(&config)?;
        let backend = Self { pool, config };
        backend.health_check().await?;
        Ok(backend)
    }

    /// Creates a backend from a connection string.
    pub async fn from_connection_string(url: &str) -> Result<Self, BackendError> {
        Self::new(PostgresConfig::from_connection_string(url)).await
    }

    /// Creates a backend from `TENANCY_PG_*` environment variables.
    pub async fn from_env() -> Result<Self, BackendError> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    fn pool_config(config: &PostgresConfig) -> Config {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        cfg.options = Some(format!("-c statement_timeout={}", config.statement_timeout_ms));
        cfg.ssl_mode = Some(match config.ssl_mode {
            PostgresSslMode::Disable => SslMode::Disable,
            PostgresSslMode::Prefer => SslMode::Prefer,
            PostgresSslMode::Require => SslMode::Require,
        });
        cfg.manager = Some(ManagerConfig {
            recycling_method: if config.reset_on_checkout {
                RecyclingMethod::Clean
            } else {
                RecyclingMethod::Fast
            },
        });
        cfg
    }

    fn create_pool(config: &PostgresConfig) -> Result<Pool, BackendError> {
        Self::pool_config(config)
            .builder(NoTls)
            .map_err(|e| internal(format!("Failed to create pool builder: {}", e)))?
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    type Connection = PostgresConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn acquire(&self) -> Result<PostgresConnection, BackendError> {
        let object = self.pool.get().await?;
        Ok(PostgresConnection::Pooled(object))
    }

    async fn connect_dedicated(&self) -> Result<PostgresConnection, BackendError> {
        let pg_config = Self::pool_config(&self.config)
            .get_pg_config()
            .map_err(|e| internal(format!("Invalid connection settings: {}", e)))?;
        let (client, connection) =
            pg_config
                .connect(NoTls)
                .await
                .map_err(|e| BackendError::ConnectionFailed {
                    backend_name: "postgres".to_string(),
                    message: e.to_string(),
                })?;

        let task = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "Dedicated PostgreSQL connection closed with error");
            }
        });
        debug!("Opened dedicated PostgreSQL connection");
        Ok(PostgresConnection::Dedicated { client, task })
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_applies_settings() {
        let config = PostgresConfig {
            statement_timeout_ms: 1500,
            reset_on_checkout: true,
            ..Default::default()
        };
        let cfg = PostgresBackend::pool_config(&config);
        assert_eq!(cfg.options.as_deref(), Some("-c statement_timeout=1500"));
        assert!(matches!(
            cfg.manager.map(|m| m.recycling_method),
            Some(RecyclingMethod::Clean)
        ));
    }

    #[test]
    fn test_pool_config_fast_recycling() {
        let config = PostgresConfig {
            reset_on_checkout: false,
            ..Default::default()
        };
        let cfg = PostgresBackend::pool_config(&config);
        assert!(matches!(
            cfg.manager.map(|m| m.recycling_method),
            Some(RecyclingMethod::Fast)
        ));
    }
}
