//! Data-access handles that route every statement through the hooks.
//!
//! A [`TenantDb`] owns the backend and the callback registry. Sessions are
//! cheap views over it bound to one request context:
//!
//! - outside a transaction every statement checks out its own connection and
//!   gets a fresh [`OperationScope`], so the search path is switched per
//!   statement
//! - a [`Transaction`] holds one connection and one scope for its lifetime,
//!   so the search path is switched at most once for all its statements
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_tenancy::backends::memory::MemoryBackend;
//! use helios_tenancy::interceptor::{SearchPathInterceptor, SearchPathPlugin};
//! use helios_tenancy::session::TenantDb;
//! use helios_tenancy::tenant::{RequestContext, sanitize};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryBackend::new());
//! backend.create_schema("acme");
//!
//! let plugin = SearchPathPlugin::new(SearchPathInterceptor::with_key(
//!     "tenant_schema",
//!     sanitize("public")?,
//! ));
//! let db = TenantDb::builder(backend.clone()).plugin(&plugin)?.build();
//!
//! let ctx = RequestContext::new().with_tenant("acme");
//! db.with_context(&ctx).raw("CREATE TABLE notes (body TEXT)").await?;
//!
//! assert_eq!(backend.tables("acme"), vec!["notes".to_string()]);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{Backend, Connection, OperationKind, OperationScope, Row};
use crate::error::{BackendError, RegistrationError, TenancyError, TenancyResult};
use crate::hooks::{Callback, CallbackRegistry, OperationState, Plugin};
use crate::tenant::RequestContext;

enum Outcome {
    Affected(u64),
    Rows(Vec<Row>),
}

impl Outcome {
    fn affected(self) -> u64 {
        match self {
            Outcome::Affected(count) => count,
            Outcome::Rows(rows) => rows.len() as u64,
        }
    }

    fn rows(self) -> Vec<Row> {
        match self {
            Outcome::Affected(_) => Vec::new(),
            Outcome::Rows(rows) => rows,
        }
    }
}

/// Races `fut` against the context, if there is one.
async fn round_trip<F, T>(ctx: Option<&RequestContext>, fut: F) -> TenancyResult<T>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match ctx {
        Some(ctx) => ctx.run(fut).await,
        None => fut.await.map_err(TenancyError::from),
    }
}

/// Runs the hooks for `kind`, then the statement, on one connection and scope.
async fn dispatch<C>(
    registry: &CallbackRegistry,
    kind: OperationKind,
    ctx: Option<&RequestContext>,
    scope: &mut OperationScope,
    connection: &mut C,
    sql: &str,
) -> TenancyResult<Outcome>
where
    C: Connection,
{
    if let Some(ctx) = ctx {
        ctx.check()?;
    }

    let mut state = OperationState {
        kind,
        context: ctx,
        scope: &mut *scope,
        connection: &mut *connection,
    };
    registry.run_before(&mut state).await?;

    round_trip(ctx, async {
        if kind.returns_rows() {
            connection.query(sql).await.map(Outcome::Rows)
        } else {
            connection.execute(sql).await.map(Outcome::Affected)
        }
    })
    .await
}

/// Entry point for tenant-aware data access.
pub struct TenantDb<B: Backend> {
    backend: Arc<B>,
    registry: Arc<CallbackRegistry>,
}

impl<B: Backend> Clone for TenantDb<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<B: Backend> std::fmt::Debug for TenantDb<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantDb")
            .field("backend", &self.backend)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Builder for [`TenantDb`].
pub struct TenantDbBuilder<B: Backend> {
    backend: Arc<B>,
    registry: CallbackRegistry,
}

impl<B: Backend> TenantDbBuilder<B> {
    /// Installs a plugin.
    pub fn plugin(mut self, plugin: &dyn Plugin) -> Result<Self, RegistrationError> {
        self.registry.use_plugin(plugin)?;
        Ok(self)
    }

    /// Registers a single callback at one interception point.
    pub fn callback(
        mut self,
        kind: OperationKind,
        callback: Arc<dyn Callback>,
    ) -> Result<Self, RegistrationError> {
        self.registry.register(kind, callback)?;
        Ok(self)
    }

    /// Finishes the handle. Registration is closed from here on.
    pub fn build(self) -> TenantDb<B> {
        TenantDb {
            backend: self.backend,
            registry: Arc::new(self.registry),
        }
    }
}

impl<B: Backend> TenantDb<B> {
    /// Starts building a handle over `backend`.
    pub fn builder(backend: Arc<B>) -> TenantDbBuilder<B> {
        TenantDbBuilder {
            backend,
            registry: CallbackRegistry::new(),
        }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the callback registry.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Returns a session bound to `ctx`.
    pub fn with_context(&self, ctx: &RequestContext) -> Session<B> {
        Session {
            db: self.clone(),
            context: Some(ctx.clone()),
        }
    }

    /// Returns a session without a request context.
    ///
    /// Hooks see no context and leave the connection's search path alone.
    pub fn unscoped(&self) -> Session<B> {
        Session {
            db: self.clone(),
            context: None,
        }
    }
}

/// Statement-level access bound to one request context.
pub struct Session<B: Backend> {
    db: TenantDb<B>,
    context: Option<RequestContext>,
}

impl<B: Backend> Clone for Session<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            context: self.context.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Session<B> {
    /// Returns the request context, if any.
    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    async fn run(&self, kind: OperationKind, sql: &str) -> TenancyResult<Outcome> {
        let ctx = self.context.as_ref();
        let mut connection = round_trip(ctx, self.db.backend.acquire()).await?;
        let mut scope = OperationScope::statement();
        dispatch(&self.db.registry, kind, ctx, &mut scope, &mut connection, sql).await
    }

    /// Runs an insert statement.
    pub async fn create(&self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Create, sql).await.map(Outcome::affected)
    }

    /// Runs a query and returns all rows.
    pub async fn query(&self, sql: &str) -> TenancyResult<Vec<Row>> {
        self.run(OperationKind::Query, sql).await.map(Outcome::rows)
    }

    /// Runs an update statement.
    pub async fn update(&self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Update, sql).await.map(Outcome::affected)
    }

    /// Runs a delete statement.
    pub async fn delete(&self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Delete, sql).await.map(Outcome::affected)
    }

    /// Runs an arbitrary statement.
    pub async fn raw(&self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Raw, sql).await.map(Outcome::affected)
    }

    /// Runs a query and returns its first row.
    pub async fn row(&self, sql: &str) -> TenancyResult<Option<Row>> {
        self.run(OperationKind::Row, sql)
            .await
            .map(|outcome| outcome.rows().into_iter().next())
    }

    /// Starts a transaction on a freshly checked-out connection.
    pub async fn begin(&self) -> TenancyResult<Transaction<B>> {
        let ctx = self.context.as_ref();
        let mut connection = round_trip(ctx, self.db.backend.acquire()).await?;
        round_trip(ctx, connection.execute("BEGIN")).await?;
        debug!("Began transaction");
        Ok(Transaction {
            db: self.db.clone(),
            context: self.context.clone(),
            connection: Some(connection),
            scope: OperationScope::transaction(),
        })
    }
}

/// A transaction with one connection and one [`OperationScope`].
///
/// Dropping an active transaction rolls it back in the background.
pub struct Transaction<B: Backend> {
    db: TenantDb<B>,
    context: Option<RequestContext>,
    /// Taken on commit, rollback or drop.
    connection: Option<B::Connection>,
    scope: OperationScope,
}

impl<B: Backend> std::fmt::Debug for Transaction<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("context", &self.context)
            .field("scope", &self.scope)
            .field("active", &self.connection.is_some())
            .finish()
    }
}

impl<B: Backend> Transaction<B> {
    /// Returns `true` once the search path has been switched in this transaction.
    pub fn is_scope_switched(&self) -> bool {
        self.scope.is_switched()
    }

    async fn run(&mut self, kind: OperationKind, sql: &str) -> TenancyResult<Outcome> {
        let connection = self.connection.as_mut().ok_or_else(inactive)?;
        dispatch(
            &self.db.registry,
            kind,
            self.context.as_ref(),
            &mut self.scope,
            connection,
            sql,
        )
        .await
    }

    /// Runs an insert statement.
    pub async fn create(&mut self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Create, sql).await.map(Outcome::affected)
    }

    /// Runs a query and returns all rows.
    pub async fn query(&mut self, sql: &str) -> TenancyResult<Vec<Row>> {
        self.run(OperationKind::Query, sql).await.map(Outcome::rows)
    }

    /// Runs an update statement.
    pub async fn update(&mut self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Update, sql).await.map(Outcome::affected)
    }

    /// Runs a delete statement.
    pub async fn delete(&mut self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Delete, sql).await.map(Outcome::affected)
    }

    /// Runs an arbitrary statement.
    pub async fn raw(&mut self, sql: &str) -> TenancyResult<u64> {
        self.run(OperationKind::Raw, sql).await.map(Outcome::affected)
    }

    /// Runs a query and returns its first row.
    pub async fn row(&mut self, sql: &str) -> TenancyResult<Option<Row>> {
        self.run(OperationKind::Row, sql)
            .await
            .map(|outcome| outcome.rows().into_iter().next())
    }

    /// Commits the transaction and returns the connection to the pool.
    pub async fn commit(mut self) -> TenancyResult<()> {
        self.finish("COMMIT").await
    }

    /// Rolls the transaction back and returns the connection to the pool.
    pub async fn rollback(mut self) -> TenancyResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, sql: &'static str) -> TenancyResult<()> {
        let mut connection = self.connection.take().ok_or_else(inactive)?;
        // Completion is not raced against cancellation so the connection is
        // never returned mid-transaction.
        connection.execute(sql).await?;
        debug!(statement = sql, "Finished transaction");
        Ok(())
    }
}

fn inactive() -> TenancyError {
    TenancyError::Backend(BackendError::Internal {
        backend_name: "session".to_string(),
        message: "transaction is no longer active".to_string(),
        source: None,
    })
}

impl<B: Backend> Drop for Transaction<B> {
    fn drop(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        warn!("Transaction dropped without explicit commit or rollback");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = connection.execute("ROLLBACK").await {
                        warn!(error = %err, "Failed to roll back dropped transaction");
                    }
                });
            }
            Err(_) => drop(connection),
        }
    }
}
