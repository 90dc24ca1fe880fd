//! Request-scoped context and the tenant accessor.
//!
//! A [`RequestContext`] is created per inbound request by the HTTP layer and
//! passed explicitly through every downstream call. It carries an immutable
//! key/value map (holding at most one tenant identifier under the tenant key)
//! together with cancellation and deadline signaling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::id::TenantId;
use crate::error::TenancyError;

/// The well-known key under which the tenant identifier is stored.
pub const TENANT_KEY: &str = "tenant_schema";

/// Immutable request-scoped key/value store with cancellation.
///
/// Deriving a context with [`with_value`](Self::with_value) returns a new
/// context; the original is untouched. Derived contexts share the same
/// cancellation token.
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::{RequestContext, TENANT_KEY};
///
/// let base = RequestContext::new();
/// let scoped = base.with_tenant("acme");
///
/// assert_eq!(base.value(TENANT_KEY), None);
/// assert_eq!(scoped.value(TENANT_KEY), Some("acme"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    values: Arc<HashMap<String, String>>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    correlation_id: Option<String>,
}

impl RequestContext {
    /// Creates an empty context with a fresh cancellation token and no deadline.
    pub fn new() -> Self {
        Self {
            values: Arc::new(HashMap::new()),
            cancellation: CancellationToken::new(),
            deadline: None,
            correlation_id: None,
        }
    }

    /// Creates an empty context driven by an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            ..Self::new()
        }
    }

    /// Returns a derived context with `key` set to `value`.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.into(), value.into());
        Self {
            values: Arc::new(values),
            ..self.clone()
        }
    }

    /// Returns a derived context carrying `tenant` under [`TENANT_KEY`].
    pub fn with_tenant(&self, tenant: impl Into<String>) -> Self {
        self.with_value(TENANT_KEY, tenant)
    }

    /// Returns a derived context that expires at `deadline`.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Returns a derived context that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a derived context with the given correlation ID for tracing.
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self.clone()
        }
    }

    /// Looks up a value by key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns the deadline, if set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancellation token shared by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels this context and every context derived from the same token.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` if the context is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), TenancyError> {
        if self.cancellation.is_cancelled() {
            return Err(TenancyError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(TenancyError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Runs `fut` to completion unless the context is cancelled or expires first.
    ///
    /// The context is checked before `fut` is polled, so an already-cancelled
    /// context never starts the work.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, TenancyError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<TenancyError>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(TenancyError::Cancelled),
            _ = deadline => Err(TenancyError::DeadlineExceeded),
            result = fut => result.map_err(Into::into),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the tenant identifier out of a [`RequestContext`].
///
/// Returning `None` is a legitimate outcome (administrative or
/// pre-authentication flows). Implementations never inspect connection state.
pub trait TenantContextAccessor: Send + Sync {
    /// Returns the tenant carried by `ctx`, if any.
    fn current_tenant(&self, ctx: &RequestContext) -> Option<TenantId>;
}

/// Accessor reading a fixed context key.
///
/// Empty values are reported as absent.
#[derive(Debug, Clone)]
pub struct KeyedTenantAccessor {
    key: String,
}

impl KeyedTenantAccessor {
    /// Creates an accessor for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the key this accessor reads.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for KeyedTenantAccessor {
    fn default() -> Self {
        Self::new(TENANT_KEY)
    }
}

impl TenantContextAccessor for KeyedTenantAccessor {
    fn current_tenant(&self, ctx: &RequestContext) -> Option<TenantId> {
        ctx.value(&self.key)
            .filter(|v| !v.is_empty())
            .map(TenantId::new)
    }
}
