//! Schema name validation.
//!
//! [`sanitize`] is the single chokepoint between caller-supplied tenant
//! identifiers and identifier positions in generated SQL. A [`SchemaName`] can
//! only be obtained through it.

use std::fmt;

use serde::Serialize;

use crate::error::InvalidIdentifier;

/// PostgreSQL's identifier limit (`NAMEDATALEN - 1`), in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A tenant identifier proven to match `^[A-Za-z0-9_]+$`.
///
/// This is the only form ever interpolated into `SET search_path` or DDL
/// statements. The inner value is exactly the input that was validated.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    /// Returns the schema name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name as a double-quoted SQL identifier.
    ///
    /// Quoting keeps mixed-case names intact; the grammar guarantees there is
    /// nothing inside that needs escaping.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Returns the name as a single-quoted SQL string literal.
    pub fn literal(&self) -> String {
        format!("'{}'", self.0)
    }

    /// Returns `true` if PostgreSQL would truncate this name to
    /// [`MAX_IDENTIFIER_LEN`] bytes.
    pub fn exceeds_identifier_limit(&self) -> bool {
        self.0.len() > MAX_IDENTIFIER_LEN
    }
}

impl fmt::Debug for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchemaName").field(&self.0).finish()
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validates a raw identifier into a [`SchemaName`].
///
/// Accepts only non-empty strings made of ASCII letters, digits and `_`.
/// The accepted value is returned unchanged.
///
/// There is no length limit. PostgreSQL truncates identifiers longer than
/// [`MAX_IDENTIFIER_LEN`] bytes, so two tenants sharing their first 63 bytes
/// resolve to the same schema. Rejecting long names here would break tenants
/// whose ids are already in use, so callers that build SQL log a warning
/// instead (see [`SchemaName::exceeds_identifier_limit`]).
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::sanitize;
///
/// assert_eq!(sanitize("acme_corp").unwrap().as_str(), "acme_corp");
/// assert!(sanitize("acme; DROP SCHEMA public").is_err());
/// assert!(sanitize("").is_err());
/// ```
pub fn sanitize(raw: &str) -> Result<SchemaName, InvalidIdentifier> {
    if !raw.is_empty() && raw.bytes().all(is_identifier_byte) {
        Ok(SchemaName(raw.to_string()))
    } else {
        Err(InvalidIdentifier {
            input: raw.to_string(),
        })
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
