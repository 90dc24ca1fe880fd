//! Tenant identifier type.
//!
//! This module defines [`TenantId`], the opaque token a caller supplies to name
//! a tenant (typically taken from a request header). No structure is assumed;
//! it only becomes usable in SQL after passing through [`sanitize`](super::sanitize).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::schema_name::{SchemaName, sanitize};
use crate::error::InvalidIdentifier;

/// An opaque tenant identifier supplied by the caller.
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::TenantId;
///
/// let tenant = TenantId::new("acme_corp");
/// assert_eq!(tenant.as_str(), "acme_corp");
/// assert!(tenant.to_schema_name().is_ok());
///
/// let hostile = TenantId::new("acme; DROP SCHEMA public");
/// assert!(hostile.to_schema_name().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates this identifier into a [`SchemaName`].
    pub fn to_schema_name(&self) -> Result<SchemaName, InvalidIdentifier> {
        sanitize(&self.0)
    }

    /// Consumes the tenant ID and returns the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TenantId").field(&self.0).finish()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TenantId::new(s))
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId(s.to_string())
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
