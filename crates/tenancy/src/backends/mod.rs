//! Database backend implementations.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | always | In-process engine emulating PostgreSQL schemas, used in tests |
//! | PostgreSQL | `postgres` | `deadpool-postgres` pool plus dedicated `tokio-postgres` connections |

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;
