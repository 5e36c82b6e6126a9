//! SQLite-backed snapshot store
//!
//! All access goes through a single connection guarded by a mutex, except
//! backups of file-backed stores which read through a connection of their
//! own. Each `put` runs in its own transaction; the WAL journal lets other
//! connections read while the harvester writes.

use super::core::{DatabaseConn, SchemaManager, SchemaStatus};
use super::store::{ObservedAt, PartitionStats, SnapshotSelector, SnapshotStore, StoredSnapshot};
use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

// =============================================================================
// Repository
// =============================================================================

/// Repository for partition and snapshot rows
pub struct SnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn ensure_partition(&self, path: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO partitions (path) VALUES (?1)",
                [path],
            )
            .map_err(|e| anyhow!("Failed to create partition '{}': {}", path, e))?;
        Ok(())
    }

    /// Insert a snapshot, replacing the payload of a colliding key
    pub fn insert(&self, path: &str, observed_at: ObservedAt, payload: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO snapshots (path, observed_at, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path, observed_at) DO UPDATE SET payload = excluded.payload",
                rusqlite::params![path, &observed_at.to_key()[..], payload],
            )
            .map_err(|e| anyhow!("Failed to insert snapshot for '{}': {}", path, e))?;
        Ok(())
    }

    pub fn latest(&self, path: &str) -> Result<Option<StoredSnapshot>> {
        self.conn
            .query_row(
                "SELECT path, observed_at, payload FROM snapshots
                 WHERE path = ?1 ORDER BY observed_at DESC LIMIT 1",
                [path],
                row_to_raw,
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read latest snapshot for '{}': {}", path, e))?
            .map(RawSnapshot::decode)
            .transpose()
    }

    pub fn at(&self, path: &str, observed_at: ObservedAt) -> Result<Option<StoredSnapshot>> {
        self.conn
            .query_row(
                "SELECT path, observed_at, payload FROM snapshots
                 WHERE path = ?1 AND observed_at = ?2",
                rusqlite::params![path, &observed_at.to_key()[..]],
                row_to_raw,
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read snapshot {} for '{}': {}", observed_at, path, e))?
            .map(RawSnapshot::decode)
            .transpose()
    }

    pub fn list(&self, path: &str) -> Result<Vec<StoredSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT path, observed_at, payload FROM snapshots
                 WHERE path = ?1 ORDER BY observed_at",
            )
            .map_err(|e| anyhow!("Failed to prepare snapshot query: {}", e))?;

        let rows = stmt
            .query_map([path], row_to_raw)
            .map_err(|e| anyhow!("Failed to query snapshots for '{}': {}", path, e))?;

        let mut snapshots = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| anyhow!("Failed to read snapshot row: {}", e))?;
            snapshots.push(raw.decode()?);
        }
        Ok(snapshots)
    }

    pub fn for_each(&self, visit: &mut dyn FnMut(StoredSnapshot) -> Result<()>) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, observed_at, payload FROM snapshots ORDER BY path, observed_at")
            .map_err(|e| anyhow!("Failed to prepare snapshot query: {}", e))?;

        let rows = stmt
            .query_map([], row_to_raw)
            .map_err(|e| anyhow!("Failed to query snapshots: {}", e))?;

        for row in rows {
            let raw = row.map_err(|e| anyhow!("Failed to read snapshot row: {}", e))?;
            visit(raw.decode()?)?;
        }
        Ok(())
    }

    /// Partition summaries from the key index only
    pub fn partition_stats(&self) -> Result<Vec<PartitionStats>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.path, COUNT(s.observed_at), MIN(s.observed_at), MAX(s.observed_at)
                 FROM partitions AS p LEFT JOIN snapshots AS s ON s.path = p.path
                 GROUP BY p.path ORDER BY p.path",
            )
            .map_err(|e| anyhow!("Failed to prepare partition query: {}", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                ))
            })
            .map_err(|e| anyhow!("Failed to query partitions: {}", e))?;

        let mut stats = Vec::new();
        for row in rows {
            let (path, snapshot_count, first, last) =
                row.map_err(|e| anyhow!("Failed to read partition row: {}", e))?;
            stats.push(PartitionStats {
                path,
                snapshot_count: snapshot_count.max(0) as u64,
                first_observed: first.as_deref().map(ObservedAt::from_key).transpose()?,
                last_observed: last.as_deref().map(ObservedAt::from_key).transpose()?,
            });
        }
        Ok(stats)
    }

    pub fn snapshot_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to count snapshots: {}", e))?;
        Ok(count.max(0) as u64)
    }
}

/// Snapshot row with its key still encoded
struct RawSnapshot {
    path: String,
    key: Vec<u8>,
    payload: Vec<u8>,
}

impl RawSnapshot {
    fn decode(self) -> Result<StoredSnapshot> {
        Ok(StoredSnapshot {
            observed_at: ObservedAt::from_key(&self.key)?,
            path: self.path,
            payload: self.payload,
        })
    }
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        path: row.get(0)?,
        key: row.get(1)?,
        payload: row.get(2)?,
    })
}

// =============================================================================
// Store
// =============================================================================

/// Production [`SnapshotStore`] over a single SQLite file
pub struct SqliteSnapshotStore {
    db: Mutex<DatabaseConn>,
    path: Option<PathBuf>,
    read_only: bool,
}

impl SqliteSnapshotStore {
    /// Open (or create) a store for reading and writing
    ///
    /// An outdated or damaged schema is completed in place; existing
    /// snapshots are never dropped.
    pub fn open(path: &Path) -> Result<Self> {
        let db = DatabaseConn::open_path(path)?;
        Self::prepare_schema(&db)?;
        info!("Opened snapshot store at {}", path.display());

        Ok(Self {
            db: Mutex::new(db),
            path: Some(path.to_path_buf()),
            read_only: false,
        })
    }

    /// Open an existing store without write access
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let db = DatabaseConn::open_read_only(path)?;
        let schema = SchemaManager::new(&db.conn);
        match schema.check_status()? {
            SchemaStatus::Current | SchemaStatus::NeedsMigration { .. } => {}
            SchemaStatus::NotInitialized => {
                return Err(anyhow!(
                    "Snapshot store at '{}' is not initialized",
                    path.display()
                ))
            }
            status => {
                return Err(anyhow!(
                    "Snapshot store at '{}' cannot be read: {:?}",
                    path.display(),
                    status
                ))
            }
        }
        info!("Opened snapshot store at {} (read-only)", path.display());

        Ok(Self {
            db: Mutex::new(db),
            path: Some(path.to_path_buf()),
            read_only: true,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = DatabaseConn::open_in_memory()?;
        Self::prepare_schema(&db)?;

        Ok(Self {
            db: Mutex::new(db),
            path: None,
            read_only: false,
        })
    }

    fn prepare_schema(db: &DatabaseConn) -> Result<()> {
        let schema = SchemaManager::new(&db.conn);
        match schema.check_status()? {
            SchemaStatus::Current => Ok(()),
            SchemaStatus::NotInitialized => {
                info!("Initializing snapshot store schema");
                schema.initialize()
            }
            SchemaStatus::NeedsMigration { from, to } => {
                info!("Upgrading snapshot store schema from v{} to v{}", from, to);
                schema.initialize()
            }
            SchemaStatus::Corrupted => {
                warn!("Snapshot store schema is incomplete, recreating missing tables");
                schema.initialize()
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => Err(anyhow!(
                "Snapshot store schema v{} is newer than supported v{}",
                database_version,
                required_version
            )),
        }
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Total number of snapshots across all partitions
    pub fn snapshot_count(&self) -> Result<u64> {
        let db = self.lock()?;
        SnapshotRepository::new(&db.conn).snapshot_count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DatabaseConn>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("Snapshot store connection lock poisoned"))
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn put(&self, path: &str, observed_at: ObservedAt, payload: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(anyhow!("Cannot write to a read-only snapshot store"));
        }

        let db = self.lock()?;
        let tx = db.transaction()?;
        {
            let repo = SnapshotRepository::new(&tx);
            repo.ensure_partition(path)?;
            repo.insert(path, observed_at, payload)?;
        }
        tx.commit()
            .map_err(|e| anyhow!("Failed to commit snapshot for '{}': {}", path, e))
    }

    fn get(&self, path: &str, selector: SnapshotSelector) -> Result<Option<StoredSnapshot>> {
        let db = self.lock()?;
        let repo = SnapshotRepository::new(&db.conn);
        match selector {
            SnapshotSelector::Latest => repo.latest(path),
            SnapshotSelector::At(observed_at) => repo.at(path, observed_at),
        }
    }

    fn partitions(&self) -> Result<Vec<PartitionStats>> {
        let db = self.lock()?;
        SnapshotRepository::new(&db.conn).partition_stats()
    }

    fn snapshots(&self, path: &str) -> Result<Vec<StoredSnapshot>> {
        let db = self.lock()?;
        SnapshotRepository::new(&db.conn).list(path)
    }

    fn for_each_snapshot(
        &self,
        visit: &mut dyn FnMut(StoredSnapshot) -> Result<()>,
    ) -> Result<()> {
        let db = self.lock()?;
        SnapshotRepository::new(&db.conn).for_each(visit)
    }

    /// File-backed stores are copied through a connection of their own, so
    /// the copy never holds the handle's lock and `put`/`get` keep going.
    fn backup_into(&self, dest: &Path) -> Result<u64> {
        match &self.path {
            Some(path) => {
                let source = DatabaseConn::open_read_only(path)?;
                write_image(dest, |visit| {
                    SnapshotRepository::new(&source.conn).for_each(visit)
                })
            }
            None => copy_into_new_store(self, dest),
        }
    }
}

// =============================================================================
// Backup
// =============================================================================

/// Copy every snapshot of `source` into a new SQLite store at `dest`
///
/// The copy is written in a single transaction from a single read of the
/// source, so the image is consistent even while the source is being written.
pub(crate) fn copy_into_new_store<S: SnapshotStore + ?Sized>(
    source: &S,
    dest: &Path,
) -> Result<u64> {
    write_image(dest, |visit| source.for_each_snapshot(visit))
}

fn write_image<F>(dest: &Path, read: F) -> Result<u64>
where
    F: FnOnce(&mut dyn FnMut(StoredSnapshot) -> Result<()>) -> Result<()>,
{
    if dest.exists() {
        return Err(anyhow!(
            "Backup destination '{}' already exists",
            dest.display()
        ));
    }

    let target = SqliteSnapshotStore::open(dest)?;
    let db = target.lock()?;
    let tx = db.transaction()?;
    let mut copied = 0u64;
    {
        let repo = SnapshotRepository::new(&tx);
        let mut last_path: Option<String> = None;
        read(&mut |snapshot| {
            if last_path.as_deref() != Some(snapshot.path.as_str()) {
                repo.ensure_partition(&snapshot.path)?;
                last_path = Some(snapshot.path.clone());
            }
            repo.insert(&snapshot.path, snapshot.observed_at, &snapshot.payload)?;
            copied += 1;
            Ok(())
        })?;
    }
    tx.commit()
        .map_err(|e| anyhow!("Failed to commit backup to '{}': {}", dest.display(), e))?;

    // standalone image: no -wal/-shm companions once closed
    let _: String = db
        .conn
        .query_row("PRAGMA journal_mode=DELETE", [], |row| row.get(0))
        .map_err(|e| anyhow!("Failed to finalize backup journal mode: {}", e))?;

    info!("Backed up {} snapshots to {}", copied, dest.display());
    Ok(copied)
}
