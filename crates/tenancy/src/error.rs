//! Error types for the tenancy engine.
//!
//! Errors are organized by concern: identifier validation, scope switching,
//! provisioning, startup locking, and failures reported by the database
//! backend itself. Everything except [`TenancyError::StartupLock`] is local to
//! the single operation that produced it.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::core::OperationKind;
use crate::tenant::SchemaName;

/// The primary error type for all tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// A tenant identifier failed the schema name grammar.
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    /// The `SET search_path` command failed for the current operation.
    #[error("failed to set search_path to {schema}: {source}")]
    ScopeSwitch {
        schema: SchemaName,
        #[source]
        source: BackendError,
    },

    /// Schema creation or migration failed while provisioning a tenant.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// The administrative connection could not be locked at startup.
    #[error("failed to lock administrative connection search_path: {source}")]
    StartupLock {
        #[source]
        source: BackendError,
    },

    /// The request context was cancelled before or during the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The request context deadline elapsed before or during the operation.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// A hook could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The underlying operation failed in the backend.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TenancyError {
    /// Returns `true` if this error came from context cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TenancyError::Cancelled | TenancyError::DeadlineExceeded)
    }

    /// Returns the backend error at the root of this error, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            TenancyError::ScopeSwitch { source, .. } => Some(source),
            TenancyError::StartupLock { source } => Some(source),
            TenancyError::Provisioning(err) => err.source.as_backend(),
            TenancyError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// A tenant identifier that does not match `^[A-Za-z0-9_]+$`.
///
/// The rejected input is kept for diagnostics only and is rendered escaped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid tenant ID format: {input:?}")]
pub struct InvalidIdentifier {
    pub input: String,
}

/// The provisioning step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningPhase {
    /// `CREATE SCHEMA IF NOT EXISTS` failed; the schema may not exist.
    CreateSchema,
    /// Switching the migration connection into the new schema failed.
    SwitchScope,
    /// Materializing schema objects failed; the schema exists but may be incomplete.
    Migrate,
}

impl ProvisioningPhase {
    /// Returns `true` if the tenant schema is known to exist after a failure in this phase.
    pub fn schema_created(&self) -> bool {
        !matches!(self, ProvisioningPhase::CreateSchema)
    }
}

impl fmt::Display for ProvisioningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningPhase::CreateSchema => write!(f, "create-schema"),
            ProvisioningPhase::SwitchScope => write!(f, "switch-scope"),
            ProvisioningPhase::Migrate => write!(f, "migrate"),
        }
    }
}

/// Failure while provisioning a tenant schema.
#[derive(Error, Debug)]
#[error("provisioning {schema} failed during {phase}: {source}")]
pub struct ProvisioningError {
    pub schema: SchemaName,
    pub phase: ProvisioningPhase,
    #[source]
    pub source: ProvisioningCause,
}

/// Underlying cause of a [`ProvisioningError`].
#[derive(Error, Debug)]
pub enum ProvisioningCause {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    InvalidObject(#[from] InvalidIdentifier),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl ProvisioningCause {
    fn as_backend(&self) -> Option<&BackendError> {
        match self {
            ProvisioningCause::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TenancyError> for ProvisioningCause {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::Cancelled => ProvisioningCause::Cancelled,
            TenancyError::DeadlineExceeded => ProvisioningCause::DeadlineExceeded,
            TenancyError::InvalidIdentifier(err) => ProvisioningCause::InvalidObject(err),
            TenancyError::ScopeSwitch { source, .. } | TenancyError::StartupLock { source } => {
                ProvisioningCause::Backend(source)
            }
            TenancyError::Backend(err) => ProvisioningCause::Backend(err),
            TenancyError::Provisioning(err) => err.source,
            TenancyError::Registration(err) => {
                ProvisioningCause::Backend(BackendError::QueryError {
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Errors raised while wiring hooks into the dispatch table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A callback with the same name is already registered at this point.
    #[error("callback {name} already registered for {kind} operations")]
    DuplicateCallback { name: String, kind: OperationKind },

    /// A plugin with the same name was already initialized.
    #[error("plugin {name} already registered")]
    DuplicatePlugin { name: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted or closed.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// No schema on the search path exists, or a referenced schema is unknown.
    #[error("schema not found: {message}")]
    SchemaNotFound { message: String },

    /// A referenced relation does not exist in any schema on the search path.
    #[error("relation does not exist: {relation}")]
    UndefinedTable { relation: String },

    /// An object being created already exists.
    #[error("object already exists: {name}")]
    DuplicateObject { name: String },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BackendError {
    /// Returns `true` for the unknown-schema class of failures.
    ///
    /// A connection locked to a nonexistent schema reports one of these for any
    /// unqualified object reference.
    pub fn is_unknown_schema(&self) -> bool {
        matches!(
            self,
            BackendError::SchemaNotFound { .. } | BackendError::UndefinedTable { .. }
        )
    }
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Result type alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        let Some(db_err) = err.as_db_error() else {
            if err.is_closed() {
                return BackendError::ConnectionFailed {
                    backend_name: "postgres".to_string(),
                    message: err.to_string(),
                };
            }
            return BackendError::Internal {
                backend_name: "postgres".to_string(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            };
        };

        let message = db_err.message().to_string();
        let code = db_err.code();
        if *code == SqlState::INVALID_SCHEMA_NAME {
            BackendError::SchemaNotFound { message }
        } else if *code == SqlState::UNDEFINED_TABLE {
            BackendError::UndefinedTable { relation: message }
        } else if *code == SqlState::DUPLICATE_SCHEMA
            || *code == SqlState::DUPLICATE_TABLE
            || *code == SqlState::DUPLICATE_OBJECT
        {
            BackendError::DuplicateObject { name: message }
        } else {
            BackendError::QueryError { message }
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for BackendError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(err) => err.into(),
            deadpool_postgres::PoolError::Timeout(_) | deadpool_postgres::PoolError::Closed => {
                BackendError::PoolExhausted {
                    backend_name: "postgres".to_string(),
                }
            }
            other => BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: other.to_string(),
            },
        }
    }
}
