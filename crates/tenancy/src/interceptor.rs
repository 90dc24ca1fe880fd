//! Search path interception.
//!
//! [`SearchPathInterceptor`] is registered at every interception point by
//! [`SearchPathPlugin`]. For each operation it resolves the tenant from the
//! request context and switches the bound connection's `search_path` to that
//! tenant's schema, at most once per [`OperationScope`](crate::core::OperationScope).
//!
//! Per scope the marker moves `unset -> switched` and never back. Operations
//! without a context or without a tenant stay `unset` and run unscoped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{RegistrationError, TenancyError, TenancyResult};
use crate::hooks::{Callback, CallbackRegistry, OperationState, Plugin};
use crate::tenant::{KeyedTenantAccessor, SchemaName, TenantContextAccessor, sanitize};

/// Callback name registered at each interception point.
pub const SEARCH_PATH_CALLBACK: &str = "multitenancy:set_search_path";

/// Plugin name under which the interceptor is installed.
pub const SEARCH_PATH_PLUGIN: &str = "multitenancy";

/// Builds the scope switch statement for `schema` with `default_schema` as fallback.
pub fn search_path_sql(schema: &SchemaName, default_schema: &SchemaName) -> String {
    format!(
        "SET search_path TO {}, {}",
        schema.quoted(),
        default_schema.quoted()
    )
}

/// Switches each operation's connection into the caller's tenant schema.
pub struct SearchPathInterceptor {
    accessor: Arc<dyn TenantContextAccessor>,
    default_schema: SchemaName,
}

impl std::fmt::Debug for SearchPathInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchPathInterceptor")
            .field("default_schema", &self.default_schema)
            .finish_non_exhaustive()
    }
}

impl SearchPathInterceptor {
    /// Creates an interceptor reading the tenant through `accessor`.
    pub fn new(accessor: Arc<dyn TenantContextAccessor>, default_schema: SchemaName) -> Self {
        Self {
            accessor,
            default_schema,
        }
    }

    /// Creates an interceptor reading the tenant from `key`.
    pub fn with_key(key: impl Into<String>, default_schema: SchemaName) -> Self {
        Self::new(Arc::new(KeyedTenantAccessor::new(key)), default_schema)
    }

    /// Returns the fallback schema.
    pub fn default_schema(&self) -> &SchemaName {
        &self.default_schema
    }
}

#[async_trait]
impl Callback for SearchPathInterceptor {
    fn name(&self) -> &str {
        SEARCH_PATH_CALLBACK
    }

    async fn before(&self, state: &mut OperationState<'_>) -> TenancyResult<()> {
        let Some(ctx) = state.context else {
            debug!(kind = %state.kind, "No request context, running unscoped");
            return Ok(());
        };

        let Some(tenant) = self.accessor.current_tenant(ctx) else {
            debug!(kind = %state.kind, "No tenant in context, running unscoped");
            return Ok(());
        };

        if state.scope.is_switched() {
            debug!(kind = %state.kind, "search_path already set for this scope");
            return Ok(());
        }

        let schema = sanitize(tenant.as_str()).inspect_err(|err| {
            warn!(kind = %state.kind, error = %err, "Rejected tenant identifier");
        })?;
        if schema.exceeds_identifier_limit() {
            warn!(
                kind = %state.kind,
                schema = %schema,
                "Schema name is longer than 63 bytes; PostgreSQL truncates it"
            );
        }

        let sql = search_path_sql(&schema, &self.default_schema);
        let connection = &mut *state.connection;
        ctx.run(async {
            connection
                .execute(&sql)
                .await
                .map_err(|source| TenancyError::ScopeSwitch {
                    schema: schema.clone(),
                    source,
                })
        })
        .await
        .inspect_err(|err| {
            warn!(kind = %state.kind, schema = %schema, error = %err, "Failed to set search_path");
        })?;

        state.scope.mark_switched();
        debug!(kind = %state.kind, schema = %schema, "Set search_path");
        Ok(())
    }
}

/// Installs one shared [`SearchPathInterceptor`] at all six interception points.
#[derive(Debug, Clone)]
pub struct SearchPathPlugin {
    interceptor: Arc<SearchPathInterceptor>,
}

impl SearchPathPlugin {
    /// Creates the plugin around an interceptor.
    pub fn new(interceptor: SearchPathInterceptor) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    /// Returns the shared interceptor.
    pub fn interceptor(&self) -> &Arc<SearchPathInterceptor> {
        &self.interceptor
    }
}

impl Plugin for SearchPathPlugin {
    fn name(&self) -> &str {
        SEARCH_PATH_PLUGIN
    }

    fn initialize(&self, registry: &mut CallbackRegistry) -> Result<(), RegistrationError> {
        registry.register_all(self.interceptor.clone())
    }
}
