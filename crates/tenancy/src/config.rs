//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::InvalidIdentifier;
use crate::tenant::{SchemaName, TENANT_KEY, sanitize};

/// Configuration for the tenancy engine.
///
/// # Examples
///
/// ```
/// use helios_tenancy::TenancyConfig;
///
/// let config = TenancyConfig::default().with_default_schema("shared");
/// assert_eq!(config.tenant_key, "tenant_schema");
/// assert_eq!(config.validate().unwrap().default_schema.as_str(), "shared");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Request context key holding the tenant identifier.
    #[serde(default = "default_tenant_key")]
    pub tenant_key: String,

    /// Fallback schema kept on every tenant search path.
    #[serde(default = "default_default_schema")]
    pub default_schema: String,

    /// Schema name the administrative connection is locked to. Must not exist.
    #[serde(default = "default_lock_schema")]
    pub lock_schema: String,
}

fn default_tenant_key() -> String {
    TENANT_KEY.to_string()
}

fn default_default_schema() -> String {
    "public".to_string()
}

fn default_lock_schema() -> String {
    "non_existent_schema_lock".to_string()
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            tenant_key: default_tenant_key(),
            default_schema: default_default_schema(),
            lock_schema: default_lock_schema(),
        }
    }
}

/// A [`TenancyConfig`] whose schema names passed the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    /// Request context key holding the tenant identifier.
    pub tenant_key: String,
    /// Fallback schema kept on every tenant search path.
    pub default_schema: SchemaName,
    /// Schema the administrative connection is locked to.
    pub lock_schema: SchemaName,
}

impl TenancyConfig {
    /// Sets the request context key.
    pub fn with_tenant_key(mut self, key: impl Into<String>) -> Self {
        self.tenant_key = key.into();
        self
    }

    /// Sets the fallback schema.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Sets the lock schema name.
    pub fn with_lock_schema(mut self, schema: impl Into<String>) -> Self {
        self.lock_schema = schema.into();
        self
    }

    /// Runs both schema names through the sanitizer.
    pub fn validate(&self) -> Result<ValidatedConfig, InvalidIdentifier> {
        Ok(ValidatedConfig {
            tenant_key: self.tenant_key.clone(),
            default_schema: sanitize(&self.default_schema)?,
            lock_schema: sanitize(&self.lock_schema)?,
        })
    }
}
