//! Schema object descriptors.

use std::path::Path;

use serde::Serialize;

use crate::error::InvalidIdentifier;
use crate::tenant::{SchemaName, sanitize};

/// A column in a [`SchemaObject::Table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    name: SchemaName,
    sql_type: String,
}

impl Column {
    /// Creates a column.
    ///
    /// The name must match the identifier grammar. The type may only contain
    /// ASCII letters, digits, `_`, spaces, parentheses and commas, which
    /// covers forms such as `VARCHAR(64) NOT NULL` or `NUMERIC(10, 2)`.
    pub fn new(name: &str, sql_type: &str) -> Result<Self, InvalidIdentifier> {
        let valid_type = !sql_type.trim().is_empty()
            && sql_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','));
        if !valid_type {
            return Err(InvalidIdentifier {
                input: sql_type.to_string(),
            });
        }
        Ok(Self {
            name: sanitize(name)?,
            sql_type: sql_type.trim().to_string(),
        })
    }

    /// Column name.
    pub fn name(&self) -> &SchemaName {
        &self.name
    }

    /// Column type, including constraints.
    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }
}

/// An object materialized inside a tenant schema during provisioning.
///
/// Table and index DDL is unqualified and uses `IF NOT EXISTS`, so objects
/// land in the schema at the head of the connection's `search_path` and
/// repeated provisioning is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaObject {
    /// A table.
    Table {
        /// Table name.
        name: SchemaName,
        /// Column definitions.
        columns: Vec<Column>,
    },
    /// An index on a table.
    Index {
        /// Index name.
        name: SchemaName,
        /// Indexed table.
        table: SchemaName,
        /// Indexed columns.
        columns: Vec<SchemaName>,
        /// Whether the index is unique.
        unique: bool,
    },
    /// Verbatim SQL, possibly several statements.
    ///
    /// Raw SQL comes from operator-controlled files and should be written to
    /// be idempotent.
    Raw {
        /// Descriptive name.
        name: SchemaName,
        /// SQL text.
        sql: String,
    },
}

impl SchemaObject {
    /// Describes a table.
    pub fn table(name: &str, columns: Vec<Column>) -> Result<Self, InvalidIdentifier> {
        Ok(SchemaObject::Table {
            name: sanitize(name)?,
            columns,
        })
    }

    /// Describes a non-unique index.
    pub fn index(name: &str, table: &str, columns: &[&str]) -> Result<Self, InvalidIdentifier> {
        Ok(SchemaObject::Index {
            name: sanitize(name)?,
            table: sanitize(table)?,
            columns: columns
                .iter()
                .map(|c| sanitize(c))
                .collect::<Result<_, _>>()?,
            unique: false,
        })
    }

    /// Describes a unique index.
    pub fn unique_index(
        name: &str,
        table: &str,
        columns: &[&str],
    ) -> Result<Self, InvalidIdentifier> {
        match Self::index(name, table, columns)? {
            SchemaObject::Index {
                name,
                table,
                columns,
                ..
            } => Ok(SchemaObject::Index {
                name,
                table,
                columns,
                unique: true,
            }),
            other => Ok(other),
        }
    }

    /// Wraps verbatim SQL.
    pub fn raw(name: &str, sql: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        Ok(SchemaObject::Raw {
            name: sanitize(name)?,
            sql: sql.into(),
        })
    }

    /// Loads every `*.sql` file in `dir`, in lexical file name order.
    ///
    /// Each file becomes a [`SchemaObject::Raw`] named after its file stem.
    pub fn from_sql_dir(dir: impl AsRef<Path>) -> std::io::Result<Vec<SchemaObject>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let sql = std::fs::read_to_string(&path)?;
                SchemaObject::raw(&stem, sql).map_err(|err| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{}: {}", path.display(), err),
                    )
                })
            })
            .collect()
    }

    /// Object name.
    pub fn name(&self) -> &SchemaName {
        match self {
            SchemaObject::Table { name, .. }
            | SchemaObject::Index { name, .. }
            | SchemaObject::Raw { name, .. } => name,
        }
    }

    /// Statements materializing this object.
    pub fn statements(&self) -> Vec<String> {
        match self {
            SchemaObject::Table { name, columns } => {
                let columns = columns
                    .iter()
                    .map(|c| format!("{} {}", c.name.quoted(), c.sql_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    name.quoted(),
                    columns
                )]
            }
            SchemaObject::Index {
                name,
                table,
                columns,
                unique,
            } => {
                let columns = columns
                    .iter()
                    .map(SchemaName::quoted)
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    name.quoted(),
                    table.quoted(),
                    columns
                )]
            }
            SchemaObject::Raw { sql, .. } => split_statements(sql),
        }
    }
}

/// Splits SQL text on top-level semicolons.
///
/// Semicolons inside quoted strings, quoted identifiers, dollar-quoted bodies
/// (`$$ ... $$`, `$tag$ ... $tag$`) and comments do not split. Comments are
/// dropped, as are empty statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut rest = sql;

    while let Some(c) = rest.chars().next() {
        let len = match c {
            '\'' | '"' => quoted_len(rest, c),
            '$' if !continues_word(&current) => dollar_quoted_len(rest).unwrap_or(1),
            '-' if rest.starts_with("--") => {
                let end = rest.find('\n').unwrap_or(rest.len());
                current.push(' ');
                rest = &rest[end..];
                continue;
            }
            '/' if rest.starts_with("/*") => {
                current.push(' ');
                rest = &rest[block_comment_len(rest)..];
                continue;
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
                rest = &rest[1..];
                continue;
            }
            _ => c.len_utf8(),
        };
        current.push_str(&rest[..len]);
        rest = &rest[len..];
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let statement = text.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

/// Length of a quoted token starting at `text`, through the closing quote.
/// A doubled quote reads as two adjacent tokens, which splits the same way.
fn quoted_len(text: &str, quote: char) -> usize {
    text[1..]
        .find(quote)
        .map_or(text.len(), |end| end + 2)
}

/// `$` inside an identifier such as `a$b` does not open a dollar quote.
fn continues_word(current: &str) -> bool {
    current
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Length of a dollar-quoted string starting at `text`, or `None` when the
/// `$` is not an opening delimiter (for example a `$1` parameter).
fn dollar_quoted_len(text: &str) -> Option<usize> {
    let tag_len = text[1..]
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len() - 1);
    let tag = &text[1..1 + tag_len];
    if tag.starts_with(|c: char| c.is_ascii_digit()) || !text[1 + tag_len..].starts_with('$') {
        return None;
    }
    let delimiter = &text[..tag_len + 2];
    let body = &text[delimiter.len()..];
    Some(
        body.find(delimiter)
            .map_or(text.len(), |end| delimiter.len() + end + delimiter.len()),
    )
}

/// Length of a possibly nested block comment starting at `text`.
fn block_comment_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    text.len()
}
