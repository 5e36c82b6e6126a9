//! Database module
//!
//! Time-series storage for harvested results documents:
//!
//! - **core**: SQLite connection wrapper and schema management
//! - **store**: the [`SnapshotStore`] trait and its key types
//! - **snapshots**: the SQLite-backed store used in production
//! - **memory**: an in-memory store with identical semantics
//!
//! # Layout
//!
//! ```text
//! partitions                   snapshots
//! ┌──────────────────────┐     ┌──────────────────────┬──────────────┬─────────┐
//! │ path (PK)            │ ◄── │ path                 │ observed_at  │ payload │
//! │ ES/CA02/50/50297     │     │ ES/CA02/50/50297     │ 8-byte key   │ JSON    │
//! └──────────────────────┘     └──────────────────────┴──────────────┴─────────┘
//! ```
//!
//! One partition exists per hierarchical path. Each harvested document is a
//! new snapshot under the observation instant; history is never pruned.
//!
//! # Usage
//!
//! ```rust,ignore
//! use escrutinio::database::{ObservedAt, SnapshotSelector, SnapshotStore, SqliteSnapshotStore};
//!
//! let store = SqliteSnapshotStore::open(Path::new("congreso.sqlite3"))?;
//! store.put("ES/CA02", ObservedAt::now(), br#"{"results":{}}"#)?;
//!
//! let latest = store.get("ES/CA02", SnapshotSelector::Latest)?;
//! ```

pub mod core;
mod memory;
mod snapshots;
mod store;

pub use core::{DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};
pub use memory::MemorySnapshotStore;
pub use snapshots::{SnapshotRepository, SqliteSnapshotStore};
pub use store::{ObservedAt, PartitionStats, SnapshotSelector, SnapshotStore, StoredSnapshot};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
