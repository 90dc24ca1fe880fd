//! In-process backend emulating PostgreSQL schema semantics.
//!
//! The memory backend implements the parts of PostgreSQL this crate depends
//! on, so isolation behavior can be exercised without a server:
//!
//! - schemas, with `public` present at startup
//! - a per-connection `search_path` that survives pool checkouts
//! - unqualified name resolution through the search path
//! - `CREATE SCHEMA/TABLE/INDEX [IF NOT EXISTS]`, `DROP SCHEMA ... [CASCADE]`
//! - `SET`/`SHOW search_path` and transaction control statements
//! - single-table `INSERT`, `SELECT`, `UPDATE` and `DELETE`, with comparison
//!   filters joined by `AND`/`OR`, `ORDER BY` and `LIMIT`
//!
//! SQL is parsed with `sqlparser`'s PostgreSQL dialect. One call may carry
//! several `;`-separated statements, as with the simple query protocol.
//!
//! Transaction control statements are tracked but not transactional: writes
//! are visible immediately and `ROLLBACK` does not undo them.
//!
//! # Example
//!
//! ```
//! use helios_tenancy::backends::memory::MemoryBackend;
//! use helios_tenancy::core::{Backend, Connection};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let mut conn = backend.acquire().await?;
//! conn.execute("CREATE SCHEMA acme").await?;
//! conn.execute("SET search_path TO acme, public").await?;
//! conn.execute("CREATE TABLE widgets (id INT)").await?;
//!
//! assert_eq!(backend.tables("acme"), vec!["widgets".to_string()]);
//! # Ok(())
//! # }
//! ```

mod catalog;
mod connection;
mod statement;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::core::{Backend, BackendKind};
use crate::error::BackendError;

use catalog::Catalog;
use connection::Session;

pub use connection::MemoryConnection;

const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Statements kept by the statement log before the oldest are dropped.
pub const DEFAULT_STATEMENT_LOG_CAPACITY: usize = 10_000;

/// A statement as received by the memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    /// Physical connection id.
    pub connection_id: u64,
    /// Statement text.
    pub sql: String,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Session>,
    in_use: usize,
}

/// State shared by the backend and every connection it handed out.
#[derive(Debug)]
pub(crate) struct Shared {
    catalog: RwLock<Catalog>,
    pool: Mutex<PoolState>,
    log: Mutex<VecDeque<LoggedStatement>>,
    log_capacity: AtomicUsize,
    next_id: AtomicU64,
    max_connections: usize,
    reset_on_checkout: bool,
}

impl Shared {
    fn next_session(&self) -> Session {
        Session::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn log(&self, connection_id: u64, sql: &str) {
        let capacity = self.log_capacity.load(Ordering::Relaxed);
        let mut log = self.log.lock();
        while log.len() >= capacity.max(1) {
            log.pop_front();
        }
        log.push_back(LoggedStatement {
            connection_id,
            sql: sql.to_string(),
        });
    }

    pub(crate) fn release(&self, mut session: Session, pooled: bool) {
        if !pooled {
            return;
        }
        // An abandoned transaction is rolled back server-side.
        session.in_transaction = false;
        let mut pool = self.pool.lock();
        pool.in_use = pool.in_use.saturating_sub(1);
        pool.idle.push(session);
    }
}

/// Memory backend with a LIFO connection pool.
///
/// The most recently returned connection is handed out first, so a stale
/// `search_path` left by a previous checkout is observable.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a backend with an empty `public` schema.
    pub fn new() -> Self {
        Self::with_options(DEFAULT_MAX_CONNECTIONS, false)
    }

    /// Creates a backend with a pool limit and checkout reset policy.
    ///
    /// With `reset_on_checkout`, every pooled checkout starts from the default
    /// `search_path`.
    pub fn with_options(max_connections: usize, reset_on_checkout: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog: RwLock::new(Catalog::default()),
                pool: Mutex::new(PoolState::default()),
                log: Mutex::new(VecDeque::new()),
                log_capacity: AtomicUsize::new(DEFAULT_STATEMENT_LOG_CAPACITY),
                next_id: AtomicU64::new(0),
                max_connections,
                reset_on_checkout,
            }),
        }
    }

    /// Creates a schema directly in the catalog. Returns `false` if it existed.
    pub fn create_schema(&self, name: &str) -> bool {
        self.shared
            .catalog
            .write()
            .create_schema(name, true)
            .unwrap_or(false)
    }

    /// Returns `true` if the schema exists.
    pub fn schema_exists(&self, name: &str) -> bool {
        self.shared.catalog.read().schema_exists(name)
    }

    /// Returns all schema names, sorted.
    pub fn schemas(&self) -> Vec<String> {
        self.shared.catalog.read().schema_names()
    }

    /// Returns the tables of a schema, sorted.
    pub fn tables(&self, schema: &str) -> Vec<String> {
        self.shared.catalog.read().table_names(schema)
    }

    /// Returns the indexes of a schema, sorted.
    pub fn indexes(&self, schema: &str) -> Vec<String> {
        self.shared.catalog.read().index_names(schema)
    }

    /// Statements received so far across all connections, oldest first.
    ///
    /// The log is a test aid. It keeps at most
    /// [`DEFAULT_STATEMENT_LOG_CAPACITY`] entries unless changed with
    /// [`set_statement_log_capacity`](Self::set_statement_log_capacity), and
    /// drops the oldest entries beyond that.
    pub fn statement_log(&self) -> Vec<LoggedStatement> {
        self.shared.log.lock().iter().cloned().collect()
    }

    /// Sets how many statements the log keeps, trimming it if needed.
    pub fn set_statement_log_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        self.shared.log_capacity.store(capacity, Ordering::Relaxed);
        let mut log = self.shared.log.lock();
        while log.len() > capacity {
            log.pop_front();
        }
    }

    /// Number of logged statements starting with `prefix`, ignoring case.
    pub fn count_statements(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_lowercase();
        self.shared
            .log
            .lock()
            .iter()
            .filter(|s| s.sql.trim_start().to_ascii_lowercase().starts_with(&prefix))
            .count()
    }

    /// Clears the statement log.
    pub fn clear_statement_log(&self) {
        self.shared.log.lock().clear();
    }

    /// Number of pooled connections currently checked out.
    pub fn connections_in_use(&self) -> usize {
        self.shared.pool.lock().in_use
    }

    /// Number of idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.shared.pool.lock().idle.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Connection = MemoryConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn acquire(&self) -> Result<MemoryConnection, BackendError> {
        let session = {
            let mut pool = self.shared.pool.lock();
            let session = match pool.idle.pop() {
                Some(mut session) => {
                    if self.shared.reset_on_checkout {
                        session.reset();
                    }
                    session
                }
                None if pool.in_use + pool.idle.len() < self.shared.max_connections => {
                    self.shared.next_session()
                }
                None => {
                    return Err(BackendError::PoolExhausted {
                        backend_name: self.name().to_string(),
                    });
                }
            };
            pool.in_use += 1;
            session
        };
        debug!(connection = session.id, "Checked out memory connection");
        Ok(MemoryConnection::new(session, Arc::clone(&self.shared), true))
    }

    async fn connect_dedicated(&self) -> Result<MemoryConnection, BackendError> {
        let session = self.shared.next_session();
        debug!(connection = session.id, "Opened dedicated memory connection");
        Ok(MemoryConnection::new(session, Arc::clone(&self.shared), false))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Connection;

    #[tokio::test]
    async fn test_pool_reuses_connection_with_stale_search_path() {
        let backend = MemoryBackend::new();
        backend.create_schema("acme");

        let first_id = {
            let mut conn = backend.acquire().await.unwrap();
            conn.execute("SET search_path TO acme").await.unwrap();
            conn.id()
        };

        let conn = backend.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        assert_eq!(conn.search_path(), vec!["acme".to_string()]);
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_reset_on_checkout_restores_default_path() {
        let backend = MemoryBackend::with_options(4, true);
        {
            let mut conn = backend.acquire().await.unwrap();
            conn.execute("SET search_path TO acme").await.unwrap();
        }
        let conn = backend.acquire().await.unwrap();
        assert_eq!(conn.search_path(), vec!["public".to_string()]);
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let backend = MemoryBackend::with_options(1, false);
        let held = backend.acquire().await.unwrap();
        let err = backend.acquire().await.unwrap_err();
        assert!(matches!(err, BackendError::PoolExhausted { .. }));
        assert_eq!(backend.connections_in_use(), 1);

        drop(held);
        assert_eq!(backend.connections_in_use(), 0);
        assert_eq!(backend.idle_connections(), 1);
        assert!(backend.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_dedicated_connections_are_not_pooled() {
        let backend = MemoryBackend::with_options(1, false);
        let dedicated = backend.connect_dedicated().await.unwrap();
        assert!(!dedicated.is_pooled());
        let pooled = backend.acquire().await.unwrap();
        assert_ne!(dedicated.id(), pooled.id());
        drop(dedicated);
        assert_eq!(backend.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_unqualified_access_through_search_path() {
        let backend = MemoryBackend::new();
        let mut conn = backend.acquire().await.unwrap();
        conn.execute("CREATE SCHEMA \"Acme\"").await.unwrap();
        conn.execute("SET search_path TO \"Acme\", \"public\"")
            .await
            .unwrap();
        conn.execute("CREATE TABLE widgets (id INT, name TEXT)")
            .await
            .unwrap();
        conn.execute("INSERT INTO widgets VALUES (1, 'bolt')")
            .await
            .unwrap();

        assert_eq!(backend.tables("Acme"), vec!["widgets".to_string()]);
        assert!(backend.tables("acme").is_empty());

        let rows = conn.query("SELECT name FROM widgets WHERE id = 1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some("bolt"));

        let shown = conn.query("SHOW search_path").await.unwrap();
        assert_eq!(shown[0].get(0), Some("\"Acme\", public"));
    }

    #[tokio::test]
    async fn test_statement_log_is_global() {
        let backend = MemoryBackend::new();
        {
            let mut a = backend.acquire().await.unwrap();
            let mut b = backend.connect_dedicated().await.unwrap();
            a.execute("SELECT 1").await.unwrap();
            b.execute("SET search_path TO x").await.unwrap();
        }
        let log = backend.statement_log();
        assert_eq!(log.len(), 2);
        assert_ne!(log[0].connection_id, log[1].connection_id);
        assert_eq!(backend.count_statements("set search_path"), 1);

        backend.clear_statement_log();
        assert!(backend.statement_log().is_empty());
    }

    #[tokio::test]
    async fn test_failed_statements_are_logged() {
        let backend = MemoryBackend::new();
        let mut conn = backend.acquire().await.unwrap();
        assert!(conn.execute("SELECT * FROM missing").await.is_err());
        assert_eq!(conn.statements(), vec!["SELECT * FROM missing".to_string()]);
    }

    #[tokio::test]
    async fn test_statement_log_keeps_newest_entries() {
        let backend = MemoryBackend::new();
        backend.set_statement_log_capacity(3);
        let mut conn = backend.acquire().await.unwrap();
        for n in 1..=5 {
            conn.execute(&format!("SELECT {n}")).await.unwrap();
        }
        let sql: Vec<_> = backend.statement_log().into_iter().map(|s| s.sql).collect();
        assert_eq!(sql, vec!["SELECT 3", "SELECT 4", "SELECT 5"]);

        backend.set_statement_log_capacity(1);
        assert_eq!(backend.statement_log().len(), 1);
        assert_eq!(backend.statement_log()[0].sql, "SELECT 5");
    }

    #[tokio::test]
    async fn test_range_filters_and_ordering() {
        let backend = MemoryBackend::new();
        let mut conn = backend.acquire().await.unwrap();
        conn.execute("CREATE TABLE t (id INT, label TEXT)").await.unwrap();
        conn.execute("INSERT INTO t VALUES (3, 'c'), (-1, 'neg'), (10, 'j'), (1, 'a')")
            .await
            .unwrap();

        let rows = conn.query("SELECT id FROM t WHERE id > 0").await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|r| r.get(0)).collect();
        assert_eq!(ids, vec!["3", "10", "1"]);

        let rows = conn.query("SELECT id FROM t ORDER BY id").await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|r| r.get(0)).collect();
        assert_eq!(ids, vec!["-1", "1", "3", "10"]);

        let rows = conn
            .query("SELECT label FROM t WHERE id >= 1 AND id <> 3 ORDER BY id DESC LIMIT 1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("label"), Some("j"));

        let updated = conn.execute("UPDATE t SET label = 'small' WHERE id < 2").await.unwrap();
        assert_eq!(updated, 2);
        let deleted = conn.execute("DELETE FROM t WHERE label = 'small' OR id = 10").await.unwrap();
        assert_eq!(deleted, 3);
        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0].get_by_name("count"), Some("1"));
    }

    #[tokio::test]
    async fn test_multi_statement_text_runs_in_order() {
        let backend = MemoryBackend::new();
        backend.create_schema("acme");
        let mut conn = backend.acquire().await.unwrap();
        let affected = conn
            .execute("SET search_path TO acme; CREATE TABLE t (x INT); INSERT INTO t VALUES (1), (2)")
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(backend.tables("acme"), vec!["t".to_string()]);
        assert_eq!(backend.statement_log().len(), 1);

        let err = conn
            .execute("INSERT INTO t VALUES (3); SELECT * FROM missing; INSERT INTO t VALUES (4)")
            .await
            .unwrap_err();
        assert!(err.is_unknown_schema());
        let rows = conn.query("SELECT x FROM t ORDER BY x").await.unwrap();
        assert_eq!(rows.len(), 3);
    }
}
