//! PostgreSQL connections.

use async_trait::async_trait;
use deadpool_postgres::Object;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, SimpleQueryMessage};

use crate::core::{Connection, Row};
use crate::error::BackendError;

/// A pooled or dedicated PostgreSQL connection.
///
/// Statements go through the simple query protocol, so one call may carry
/// several `;`-separated statements.
pub enum PostgresConnection {
    /// Checked out of the pool; returned on drop.
    Pooled(Object),
    /// Opened outside the pool; closed on drop.
    Dedicated {
        /// The client half.
        client: Client,
        /// Task driving the connection half.
        task: JoinHandle<()>,
    },
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostgresConnection::Pooled(_) => f.write_str("PostgresConnection::Pooled"),
            PostgresConnection::Dedicated { .. } => f.write_str("PostgresConnection::Dedicated"),
        }
    }
}

impl PostgresConnection {
    fn client(&self) -> &Client {
        match self {
            PostgresConnection::Pooled(object) => &***object,
            PostgresConnection::Dedicated { client, .. } => client,
        }
    }

    /// Returns `true` if this connection returns to the pool on drop.
    pub fn is_pooled(&self) -> bool {
        matches!(self, PostgresConnection::Pooled(_))
    }

    async fn simple_query(&self, sql: &str) -> Result<Vec<SimpleQueryMessage>, BackendError> {
        Ok(self.client().simple_query(sql).await?)
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if let PostgresConnection::Dedicated { task, .. } = self {
            task.abort();
        }
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        let messages = self.simple_query(sql).await?;
        Ok(messages
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(count) => *count,
                _ => 0,
            })
            .sum())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        let messages = self.simple_query(sql).await?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let columns = row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>();
                let values = (0..columns.len())
                    .map(|idx| row.get(idx).map(str::to_string))
                    .collect();
                rows.push(Row::new(columns, values));
            }
        }
        Ok(rows)
    }
}
