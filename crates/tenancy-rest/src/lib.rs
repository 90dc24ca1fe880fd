//! Helios Tenancy REST
//!
//! axum glue between inbound HTTP requests and the tenancy engine. The
//! middleware reads the tenant header, validates it with the schema name
//! sanitizer and attaches a [`RequestContext`](helios_tenancy::RequestContext)
//! to the request. Handlers pick it up with the [`TenantRequestContext`]
//! extractor and pass it to the data-access layer.
//!
//! # Example
//!
//! ```
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use helios_tenancy_rest::{TenantLayer, TenantRequestContext, tenant_middleware};
//!
//! async fn whoami(ctx: TenantRequestContext) -> String {
//!     ctx.tenant().unwrap_or_default().to_string()
//! }
//!
//! let app: Router = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(from_fn_with_state(TenantLayer::default(), tenant_middleware));
//! ```

#![warn(missing_docs)]

pub mod extractor;
pub mod middleware;

pub use extractor::TenantRequestContext;
pub use middleware::{TenantLayer, TenantRejection, X_TENANT_ID, tenant_middleware};
