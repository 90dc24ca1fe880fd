//! Tenant identity and request context.
//!
//! # Core Types
//!
//! - [`TenantId`] - Opaque identifier supplied by the caller
//! - [`SchemaName`] - A validated identifier, safe for SQL identifier positions
//! - [`sanitize`] - The only way to turn raw input into a [`SchemaName`]
//! - [`RequestContext`] - Immutable per-request key/value store with cancellation
//! - [`TenantContextAccessor`] - Reads the tenant out of a [`RequestContext`]
//!
//! # Examples
//!
//! ```
//! use helios_tenancy::tenant::{
//!     KeyedTenantAccessor, RequestContext, TenantContextAccessor, sanitize,
//! };
//!
//! let ctx = RequestContext::new().with_tenant("acme_corp");
//! let accessor = KeyedTenantAccessor::default();
//!
//! let tenant = accessor.current_tenant(&ctx).unwrap();
//! let schema = sanitize(tenant.as_str()).unwrap();
//! assert_eq!(schema.quoted(), "\"acme_corp\"");
//! ```

mod context;
mod id;
mod schema_name;

pub use context::{KeyedTenantAccessor, RequestContext, TENANT_KEY, TenantContextAccessor};
pub use id::TenantId;
pub use schema_name::{MAX_IDENTIFIER_LEN, SchemaName, sanitize};
