//! Connection trait and result rows.

use async_trait::async_trait;

use crate::error::BackendError;

/// A single checked-out database connection.
///
/// Statements are plain SQL text. Identifier positions are only ever filled
/// with validated [`SchemaName`](crate::tenant::SchemaName)s by this crate.
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError>;

    /// Executes a statement and returns the rows it produced.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, BackendError>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Box<C> {
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        (**self).execute(sql).await
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        (**self).query(sql).await
    }
}

/// A result row with textual values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Creates a row from column names and values.
    ///
    /// Missing values are padded with `NULL`.
    pub fn new(columns: Vec<String>, mut values: Vec<Option<String>>) -> Self {
        values.resize(columns.len(), None);
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the value at `index`, or `None` for `NULL` or out of range.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Returns the value of the named column.
    pub fn get_by_name(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.get(idx))
    }
}
