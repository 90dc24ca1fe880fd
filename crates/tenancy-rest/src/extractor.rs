//! Request context extractor.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use helios_tenancy::tenant::RequestContext;

/// Axum extractor for the context attached by
/// [`tenant_middleware`](crate::middleware::tenant_middleware).
///
/// Rejects with `500 Internal Server Error` when the middleware is not
/// installed on the route.
#[derive(Debug, Clone)]
pub struct TenantRequestContext {
    context: RequestContext,
    tenant_key: String,
}

impl TenantRequestContext {
    /// Wraps a context whose tenant lives under `tenant_key`.
    pub fn new(context: RequestContext, tenant_key: impl Into<String>) -> Self {
        Self {
            context,
            tenant_key: tenant_key.into(),
        }
    }

    /// Returns the request context.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Returns the validated tenant identifier.
    pub fn tenant(&self) -> Option<&str> {
        self.context.value(&self.tenant_key)
    }

    /// Consumes the extractor and returns the request context.
    pub fn into_context(self) -> RequestContext {
        self.context
    }
}

impl<S> FromRequestParts<S> for TenantRequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TenantRequestContext>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "tenant middleware is not installed",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    async fn handler(ctx: TenantRequestContext) -> String {
        ctx.tenant().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_missing_middleware_is_server_error() {
        let app: Router = Router::new().route("/", get(handler));
        let response = app
            .oneshot(http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_tenant_reads_configured_key() {
        let ctx = RequestContext::new().with_value("org", "acme");
        let extracted = TenantRequestContext::new(ctx, "org");
        assert_eq!(extracted.tenant(), Some("acme"));
        assert_eq!(extracted.into_context().value("org"), Some("acme"));
    }
}
