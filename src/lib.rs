#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Escrutinio - an election-results harvester
//!
//! Escrutinio walks the administrative division tree of an election night
//! (country, regions, provinces, islands, municipalities, districts), fetches
//! the published results document of every division on a schedule and keeps
//! each one as a timestamped snapshot in an embedded time-series store. The
//! accumulated history can be inspected over HTTP or flattened into CSV.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Division tree, snapshot store, results model, CSV export | `rusqlite`, `oneio`, `csv` |
//! | `retrieval` | Traversal stream, scheduler, harvester, HTTP fetcher | `tokio`, `ureq`, `rand` |
//! | `server` | HTTP status server | All above + `axum`, `tower-http` |
//! | `cli` | Full CLI binary | All above + `clap`, `tabled` |
//!
//! ```toml
//! # Store and export only
//! escrutinio = { version = "0.1", default-features = false }
//!
//! # Harvesting without the CLI
//! escrutinio = { version = "0.1", default-features = false, features = ["retrieval"] }
//! ```
//!
//! # Architecture
//!
//! - **[`division`]**: division tree, dataset loader and traversal stream
//! - **[`database`]**: snapshot store trait, SQLite and in-memory stores
//! - **`retrieval`**: jittered per-node fetch scheduler and the cycle loop
//! - **`server`**: read-only HTTP status endpoints
//! - **[`results`]**: typed view of a results document
//! - **[`export`]**: CSV export of stored snapshots
//! - **[`config`]**: configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use escrutinio::{EscrutinioConfig, TreeLoader, SqliteSnapshotStore};
//! use escrutinio::retrieval::{HttpFetcher, RetrievalScheduler};
//!
//! let config = EscrutinioConfig::new(&None)?;
//! let tree = TreeLoader::new(config.division_source(), &config.results_url_template).load()?;
//! let store = SqliteSnapshotStore::open(&config.sqlite_path())?;
//!
//! let scheduler = RetrievalScheduler::new(
//!     Arc::new(tree),
//!     Arc::new(HttpFetcher::new(config.fetch_timeout)),
//!     Arc::new(store),
//!     config.scheduler_config(),
//! );
//! let report = scheduler.run_cycle(CancellationToken::new()).await;
//! println!("{}", report);
//! ```

pub mod config;
pub mod database;
pub mod division;
pub mod export;
pub mod results;

#[cfg(feature = "retrieval")]
pub mod retrieval;

#[cfg(feature = "server")]
pub mod server;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, EscrutinioConfig};

// =============================================================================
// Division tree
// =============================================================================

pub use division::{
    DivisionNode, DivisionSource, DivisionTree, Level, LoadSummary, NodeId, NodeRef, RawRecord,
    RemoteDivisionSource, StaticDivisionSource, TreeLoadError, TreeLoader,
};

#[cfg(feature = "retrieval")]
pub use division::Traversal;

// =============================================================================
// Database
// =============================================================================

pub use database::{
    DatabaseConn, MemorySnapshotStore, ObservedAt, PartitionStats, SchemaManager, SchemaStatus,
    SnapshotSelector, SnapshotStore, SqliteSnapshotStore, StoredSnapshot, SCHEMA_VERSION,
};

// =============================================================================
// Results and export
// =============================================================================

pub use export::{CsvExporter, ExportColumns, ExportSummary};
pub use results::{ResultSummary, ResultsDocument};

// =============================================================================
// Retrieval and server
// =============================================================================

#[cfg(feature = "retrieval")]
pub use retrieval::{
    CycleReport, Fetcher, Harvester, HttpFetcher, RetrievalScheduler, SchedulerConfig,
};

#[cfg(feature = "server")]
pub use server::{start_server, ServerConfig, ServerState};
