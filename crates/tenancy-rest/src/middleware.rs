//! Tenant identification middleware.
//!
//! Requires the tenant header on every request routed through it. The value
//! is validated with [`sanitize`] before it is stored in the request context,
//! so handlers only ever see identifiers that are safe to use as schema names.

use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode, header::InvalidHeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use helios_tenancy::tenant::{RequestContext, TENANT_KEY, sanitize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::extractor::TenantRequestContext;

/// Header name for tenant identification.
pub static X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Settings for [`tenant_middleware`].
#[derive(Debug, Clone)]
pub struct TenantLayer {
    header: HeaderName,
    /// Header name as configured, for error messages.
    label: String,
    tenant_key: String,
    timeout: Option<Duration>,
}

impl Default for TenantLayer {
    fn default() -> Self {
        Self {
            header: X_TENANT_ID.clone(),
            label: "X-Tenant-ID".to_string(),
            tenant_key: TENANT_KEY.to_string(),
            timeout: None,
        }
    }
}

impl TenantLayer {
    /// Creates settings reading `X-Tenant-ID` with no request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the tenant from a different header.
    pub fn with_header(mut self, name: &str) -> Result<Self, InvalidHeaderName> {
        self.header = HeaderName::try_from(name)?;
        self.label = name.to_string();
        Ok(self)
    }

    /// Stores the tenant under a different context key.
    ///
    /// Must match the key the engine's interceptor reads.
    pub fn with_tenant_key(mut self, key: impl Into<String>) -> Self {
        self.tenant_key = key.into();
        self
    }

    /// Gives every request context a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the header name.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Returns the context key.
    pub fn tenant_key(&self) -> &str {
        &self.tenant_key
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Builds the request context for a set of headers.
    pub fn context_for(&self, headers: &HeaderMap) -> Result<TenantRequestContext, TenantRejection> {
        let raw = match headers.get(&self.header) {
            None => return Err(TenantRejection::MissingHeader(self.label.clone())),
            Some(value) => value.to_str().map_err(|_| TenantRejection::InvalidTenant)?,
        };
        if raw.is_empty() {
            return Err(TenantRejection::MissingHeader(self.label.clone()));
        }
        let schema = sanitize(raw).map_err(|_| TenantRejection::InvalidTenant)?;

        let mut ctx = RequestContext::new().with_value(self.tenant_key.as_str(), schema.as_str());
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(request_id) = headers.get(&X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
            ctx = ctx.with_correlation_id(request_id);
        }
        Ok(TenantRequestContext::new(ctx, self.tenant_key.clone()))
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantRejection {
    /// The tenant header is absent or empty.
    #[error("{0} header is required")]
    MissingHeader(String),

    /// The tenant header failed the schema name grammar.
    #[error("invalid tenant ID format")]
    InvalidTenant,
}

impl IntoResponse for TenantRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Middleware function for tenant extraction.
///
/// Use with `axum::middleware::from_fn_with_state`. The context is cancelled
/// if the client goes away before the response is produced.
pub async fn tenant_middleware(
    State(layer): State<TenantLayer>,
    mut request: Request,
    next: Next,
) -> Response {
    let tenant = match layer.context_for(request.headers()) {
        Ok(tenant) => tenant,
        Err(rejection) => {
            warn!(path = %request.uri().path(), error = %rejection, "Rejected request");
            return rejection.into_response();
        }
    };
    debug!(tenant = tenant.tenant().unwrap_or_default(), "Extracted tenant ID");

    let guard = tenant.context().cancellation_token().clone().drop_guard();
    request.extensions_mut().insert(tenant);
    let response = next.run(request).await;
    let _ = guard.disarm();
    response
}
