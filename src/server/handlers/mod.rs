//! HTTP endpoint handlers
//!
//! - `stats` - partition summary (`/stats`)
//! - `snapshot` - latest payload of one path (`/testread`, `/latest/*path`)
//! - `backup` - SQLite image of the whole store (`/dbbackup`)

pub mod backup;
pub mod snapshot;
pub mod stats;

pub use backup::backup_handler;
pub use snapshot::{latest_handler, testread_handler};
pub use stats::{render_stats_text, stats_handler, StatsQuery};
