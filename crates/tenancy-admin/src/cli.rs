//! Command line definition.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use helios_tenancy::TenancyConfig;
use helios_tenancy::provision::SchemaObject;

/// Provision and inspect tenant schemas.
#[derive(Debug, Parser)]
#[command(name = "tenancy-admin")]
#[command(about = "Provision and inspect schema-per-tenant PostgreSQL databases")]
pub struct Cli {
    /// PostgreSQL connection string; falls back to `TENANCY_PG_*` variables.
    #[arg(long, env = "TENANCY_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "TENANCY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Schema appended after the tenant schema on every search path.
    #[arg(long, env = "TENANCY_DEFAULT_SCHEMA", default_value = "public")]
    pub default_schema: String,

    /// Nonexistent schema the administrative connection is locked to.
    #[arg(long, env = "TENANCY_LOCK_SCHEMA", default_value = "non_existent_schema_lock")]
    pub lock_schema: String,

    /// Overall deadline for the command, in seconds.
    #[arg(long, env = "TENANCY_TIMEOUT", default_value = "300")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Operator actions.
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Create a tenant schema and its objects. Safe to re-run.
    Provision {
        /// Tenant identifier.
        tenant: String,
        /// Directory of `*.sql` files applied in lexical order.
        #[arg(long)]
        objects_dir: PathBuf,
    },
    /// Report whether a tenant schema exists.
    Exists {
        /// Tenant identifier.
        tenant: String,
    },
    /// Drop a tenant schema.
    Drop {
        /// Tenant identifier.
        tenant: String,
        /// Also drop every object in the schema.
        #[arg(long)]
        cascade: bool,
    },
    /// Lock the administrative connection and check connectivity.
    Check,
}

impl Cli {
    /// Engine settings derived from the flags.
    pub fn tenancy_config(&self) -> TenancyConfig {
        TenancyConfig::default()
            .with_default_schema(self.default_schema.as_str())
            .with_lock_schema(self.lock_schema.as_str())
    }

    /// Command deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Loads the schema objects for `provision`.
pub fn load_objects(dir: &Path) -> anyhow::Result<Vec<SchemaObject>> {
    let objects = SchemaObject::from_sql_dir(dir)
        .with_context(|| format!("Failed to load schema objects from {}", dir.display()))?;
    if objects.is_empty() {
        anyhow::bail!("No .sql files found in {}", dir.display());
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "tenancy-admin",
            "provision",
            "acme_corp",
            "--objects-dir",
            "./schema",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Provision {
                tenant: "acme_corp".to_string(),
                objects_dir: PathBuf::from("./schema"),
            }
        );
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_drop_with_cascade() {
        let cli = Cli::try_parse_from(["tenancy-admin", "drop", "acme", "--cascade"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Drop {
                tenant: "acme".to_string(),
                cascade: true,
            }
        );
    }

    #[test]
    fn test_provision_requires_objects_dir() {
        assert!(Cli::try_parse_from(["tenancy-admin", "provision", "acme"]).is_err());
    }

    #[test]
    fn test_tenancy_config_from_flags() {
        let cli = Cli::try_parse_from([
            "tenancy-admin",
            "--default-schema",
            "shared",
            "--lock-schema",
            "nowhere",
            "check",
        ])
        .unwrap();
        let config = cli.tenancy_config().validate().unwrap();
        assert_eq!(config.default_schema.as_str(), "shared");
        assert_eq!(config.lock_schema.as_str(), "nowhere");
    }

    #[test]
    fn test_load_objects_orders_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("02_indexes.sql"), "CREATE INDEX IF NOT EXISTS a_idx ON a (id);").unwrap();
        std::fs::write(dir.path().join("01_tables.sql"), "CREATE TABLE IF NOT EXISTS a (id BIGINT);").unwrap();

        let objects = load_objects(dir.path()).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.name().as_str().to_string()).collect();
        assert_eq!(names, vec!["01_tables", "02_indexes"]);
    }

    #[test]
    fn test_load_objects_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_objects(dir.path()).is_err());
    }
}
