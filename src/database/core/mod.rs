//! Core database infrastructure
//!
//! - `DatabaseConn`: SQLite connection wrapper (read-write or read-only)
//! - `SchemaManager`: schema initialization and version checks
//! - `SchemaStatus`: schema state enumeration

mod connection;
mod schema;

pub use connection::DatabaseConn;
pub use schema::{SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};
