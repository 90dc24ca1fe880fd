//! Core abstractions over the underlying data-access layer.
//!
//! - [`Backend`] - Source of pooled and dedicated connections
//! - [`Connection`] - Executes SQL text
//! - [`OperationKind`] - The six interception points
//! - [`OperationScope`] - Per-statement or per-transaction switch marker

pub mod backend;
pub mod connection;
pub mod operation;

pub use backend::{Backend, BackendKind};
pub use connection::{Connection, Row};
pub use operation::{OperationKind, OperationScope};
