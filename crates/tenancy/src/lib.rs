//! Helios Tenancy
//!
//! Schema-per-tenant isolation for a shared PostgreSQL database. Every tenant
//! owns one schema; every data-access call is transparently redirected to the
//! caller's schema by switching the connection's `search_path`.
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant identifiers, the schema name sanitizer and the request context
//! - [`core`] - Backend and connection traits, operation kinds and scopes
//! - [`hooks`] - Dispatch table for the six interception points
//! - [`interceptor`] - The search path interceptor and its plugin
//! - [`lock`] - Fail-closed locking of the administrative connection
//! - [`provision`] - Tenant schema creation and migration
//! - [`session`] - Tenant-aware sessions and transactions
//! - [`engine`] - Bootstrap wiring all of the above together
//! - [`backends`] - Memory and PostgreSQL backends
//! - [`error`] - Error types for all operations
//!
//! # Isolation model
//!
//! 1. The HTTP layer places the tenant identifier into a [`RequestContext`]
//!    under the tenant key.
//! 2. Before each statement the interceptor reads it, runs it through
//!    [`sanitize`](tenant::sanitize) and issues
//!    `SET search_path TO "<tenant>", "<default>"` on the bound connection,
//!    once per statement outside transactions and once per transaction inside.
//! 3. Operations without a tenant run unscoped. The administrative
//!    connection is locked to a schema that does not exist, so forgetting to
//!    scope it fails loudly.
//!
//! # Quick Start
//!
//! ```
//! use helios_tenancy::backends::memory::MemoryBackend;
//! use helios_tenancy::provision::{Column, SchemaObject};
//! use helios_tenancy::{RequestContext, TenancyConfig, TenancyEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TenancyEngine::start(MemoryBackend::new(), TenancyConfig::default()).await?;
//!
//! let objects = vec![SchemaObject::table(
//!     "notes",
//!     vec![Column::new("id", "BIGINT")?, Column::new("body", "TEXT")?],
//! )?];
//! engine
//!     .provisioner()
//!     .provision(&RequestContext::new(), "acme_corp", &objects)
//!     .await?;
//!
//! let ctx = RequestContext::new().with_tenant("acme_corp");
//! let session = engine.db().with_context(&ctx);
//! session.create("INSERT INTO notes VALUES (1, 'hello')").await?;
//!
//! let rows = session.query("SELECT body FROM notes").await?;
//! assert_eq!(rows[0].get(0), Some("hello"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod interceptor;
pub mod lock;
pub mod provision;
pub mod session;
pub mod tenant;

pub use config::{TenancyConfig, ValidatedConfig};
pub use core::{Backend, Connection, OperationKind, OperationScope, Row};
pub use engine::TenancyEngine;
pub use error::{
    BackendError, InvalidIdentifier, ProvisioningError, ProvisioningPhase, TenancyError,
    TenancyResult,
};
pub use interceptor::{SearchPathInterceptor, SearchPathPlugin};
pub use lock::{ConnectionLocker, LockedConnection};
pub use provision::{SchemaObject, TenantProvisioner};
pub use session::{Session, TenantDb, Transaction};
pub use tenant::{RequestContext, SchemaName, TenantContextAccessor, TenantId, sanitize};
