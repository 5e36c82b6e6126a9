//! Snapshot store abstraction
//!
//! A store holds one partition per hierarchical path and, inside it, one
//! snapshot per observation instant. Partitions are created on first write and
//! snapshots are never deleted.

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::Path;

// =============================================================================
// ObservedAt
// =============================================================================

/// Observation instant with nanosecond resolution (UTC)
///
/// The storage key is the big-endian nanosecond count with its sign bit
/// flipped, so comparing keys byte by byte matches chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservedAt(i64);

impl ObservedAt {
    pub const KEY_LEN: usize = 8;

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_unix_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Instants past the nanosecond range (year 2262) saturate
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self(datetime.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn unix_nanos(&self) -> i64 {
        self.0
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }

    pub fn to_key(&self) -> [u8; Self::KEY_LEN] {
        ((self.0 as u64) ^ (1 << 63)).to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::KEY_LEN] = key.try_into().map_err(|_| {
            anyhow!(
                "Invalid snapshot key: expected {} bytes, got {}",
                Self::KEY_LEN,
                key.len()
            )
        })?;
        Ok(Self((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64))
    }
}

impl fmt::Display for ObservedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.datetime().to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

impl Serialize for ObservedAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Which snapshot of a partition to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSelector {
    /// The snapshot with the greatest key
    Latest,
    /// The snapshot stored under exactly this instant
    At(ObservedAt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub path: String,
    pub observed_at: ObservedAt,
    pub payload: Vec<u8>,
}

/// Per-partition summary, computed without reading payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub path: String,
    pub snapshot_count: u64,
    pub first_observed: Option<ObservedAt>,
    pub last_observed: Option<ObservedAt>,
}

// =============================================================================
// SnapshotStore
// =============================================================================

/// Append-only time-series store keyed by path and observation instant
///
/// Implementations must accept concurrent `put`s from many tasks.
pub trait SnapshotStore: Send + Sync {
    /// Store `payload` under `(path, observed_at)`, creating the partition if
    /// needed. A colliding key is overwritten.
    fn put(&self, path: &str, observed_at: ObservedAt, payload: &[u8]) -> Result<()>;

    /// Read one snapshot; `Ok(None)` when the partition or key is absent
    fn get(&self, path: &str, selector: SnapshotSelector) -> Result<Option<StoredSnapshot>>;

    /// Every partition with its snapshot count, sorted by path
    fn partitions(&self) -> Result<Vec<PartitionStats>>;

    /// Every snapshot of one partition, oldest first
    fn snapshots(&self, path: &str) -> Result<Vec<StoredSnapshot>>;

    /// Visit all snapshots, grouped by path and oldest first within a path
    fn for_each_snapshot(
        &self,
        visit: &mut dyn FnMut(StoredSnapshot) -> Result<()>,
    ) -> Result<()>;

    /// Write a consistent SQLite image of the store to `dest`
    ///
    /// `dest` must not exist. Returns the number of snapshots copied.
    fn backup_into(&self, dest: &Path) -> Result<u64> {
        super::snapshots::copy_into_new_store(self, dest)
    }
}
