//! Memory connections and their session state.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::Shared;
use super::statement::{self, Command};
use crate::core::{Connection, Row};
use crate::error::BackendError;

/// Session state of one physical connection.
///
/// This survives a return to the pool, as it would on a real server.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub id: u64,
    pub search_path: Vec<String>,
    pub in_transaction: bool,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            search_path: default_search_path(),
            in_transaction: false,
        }
    }

    pub fn reset(&mut self) {
        self.search_path = default_search_path();
        self.in_transaction = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(0)
    }
}

pub(crate) fn default_search_path() -> Vec<String> {
    vec!["public".to_string()]
}

/// Renders a search path the way `SHOW search_path` does.
fn render_search_path(path: &[String]) -> String {
    path.iter()
        .map(|name| {
            let plain = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if plain {
                name.clone()
            } else {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A connection to a [`MemoryBackend`](super::MemoryBackend).
///
/// Pooled connections go back to the backend's idle list on drop with their
/// `search_path` untouched.
pub struct MemoryConnection {
    session: Session,
    shared: Arc<Shared>,
    pooled: bool,
    statements: Vec<String>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("session", &self.session)
            .field("pooled", &self.pooled)
            .finish_non_exhaustive()
    }
}

impl MemoryConnection {
    pub(crate) fn new(session: Session, shared: Arc<Shared>, pooled: bool) -> Self {
        Self {
            session,
            shared,
            pooled,
            statements: Vec::new(),
        }
    }

    /// Physical connection id, stable across pool checkouts.
    pub fn id(&self) -> u64 {
        self.session.id
    }

    /// Returns `true` if this connection returns to the pool on drop.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Current `search_path`.
    pub fn search_path(&self) -> Vec<String> {
        self.session.search_path.clone()
    }

    /// Returns `true` between `BEGIN` and `COMMIT`/`ROLLBACK`.
    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction
    }

    /// Statements sent during this checkout, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.clone()
    }

    /// Number of statements in this checkout starting with `prefix`, ignoring case.
    pub fn count_statements(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_lowercase();
        self.statements
            .iter()
            .filter(|s| s.trim_start().to_ascii_lowercase().starts_with(&prefix))
            .count()
    }

    /// Runs every statement in `sql` in order, like the simple query
    /// protocol. Counts add up and rows accumulate; the first error stops the
    /// batch.
    fn run(&mut self, sql: &str) -> Result<(u64, Vec<Row>), BackendError> {
        self.statements.push(sql.to_string());
        let id = self.id();
        self.shared.log(id, sql);
        trace!(connection = id, sql, "memory statement");

        let mut count = 0;
        let mut rows = Vec::new();
        for command in statement::parse(sql)? {
            let (affected, mut returned) = self.apply(command)?;
            count += affected;
            rows.append(&mut returned);
        }
        Ok((count, rows))
    }

    fn apply(&mut self, command: Command) -> Result<(u64, Vec<Row>), BackendError> {
        let search_path = self.session.search_path.clone();

        match command {
            Command::SetSearchPath(schemas) => {
                self.session.search_path = schemas;
                Ok((0, Vec::new()))
            }
            Command::ResetSearchPath => {
                self.session.search_path = default_search_path();
                Ok((0, Vec::new()))
            }
            Command::ShowSearchPath => Ok((
                1,
                vec![Row::new(
                    vec!["search_path".to_string()],
                    vec![Some(render_search_path(&search_path))],
                )],
            )),
            Command::SetOther => Ok((0, Vec::new())),
            Command::Begin => {
                self.session.in_transaction = true;
                Ok((0, Vec::new()))
            }
            Command::Commit | Command::Rollback => {
                self.session.in_transaction = false;
                Ok((0, Vec::new()))
            }
            Command::SelectValues(values) => {
                let (labels, cells) = values.into_iter().unzip();
                Ok((1, vec![Row::new(labels, cells)]))
            }
            Command::CreateSchema {
                name,
                if_not_exists,
            } => {
                self.shared.catalog.write().create_schema(&name, if_not_exists)?;
                Ok((0, Vec::new()))
            }
            Command::DropSchema {
                name,
                if_exists,
                cascade,
            } => {
                self.shared
                    .catalog
                    .write()
                    .drop_schema(&name, if_exists, cascade)?;
                Ok((0, Vec::new()))
            }
            Command::CreateTable {
                table,
                if_not_exists,
                columns,
            } => {
                self.shared.catalog.write().create_table(
                    &table,
                    if_not_exists,
                    &columns,
                    &search_path,
                )?;
                Ok((0, Vec::new()))
            }
            Command::DropTable { table, if_exists } => {
                self.shared
                    .catalog
                    .write()
                    .drop_table(&table, if_exists, &search_path)?;
                Ok((0, Vec::new()))
            }
            Command::CreateIndex {
                name,
                if_not_exists,
                table,
            } => {
                self.shared.catalog.write().create_index(
                    &name,
                    if_not_exists,
                    &table,
                    &search_path,
                )?;
                Ok((0, Vec::new()))
            }
            Command::Insert {
                table,
                columns,
                rows,
            } => {
                let count = self.shared.catalog.write().insert(
                    &table,
                    columns.as_deref(),
                    &rows,
                    &search_path,
                )?;
                Ok((count, Vec::new()))
            }
            Command::Select(query) => {
                let rows = self.shared.catalog.read().select(&query, &search_path)?;
                Ok((rows.len() as u64, rows))
            }
            Command::Update {
                table,
                assignments,
                filter,
            } => {
                let count = self.shared.catalog.write().update(
                    &table,
                    &assignments,
                    filter.as_ref(),
                    &search_path,
                )?;
                Ok((count, Vec::new()))
            }
            Command::Delete { table, filter } => {
                let count = self
                    .shared
                    .catalog
                    .write()
                    .delete(&table, filter.as_ref(), &search_path)?;
                Ok((count, Vec::new()))
            }
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.run(sql).map(|(count, _)| count)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        self.run(sql).map(|(_, rows)| rows)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let session = std::mem::take(&mut self.session);
        self.shared.release(session, self.pooled);
    }
}
