//! Database connection management
//!
//! Thin wrapper around the SQLite connection backing the snapshot store.

use anyhow::{anyhow, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// How long a read-only connection waits on a locked database
const READ_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Core database connection wrapper
///
/// Writer connections run in WAL mode so that readers (including read-only
/// connections from other processes) never block appends.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p.display(), e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Some(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Open an existing database file without write access
    ///
    /// The file must already exist; any statement that writes fails.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            anyhow!(
                "Failed to open database at '{}' read-only: {}",
                path.display(),
                e
            )
        })?;

        conn.busy_timeout(READ_BUSY_TIMEOUT)
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;
        conn.execute("PRAGMA query_only=ON", [])
            .map_err(|e| anyhow!("Failed to enable query-only mode: {}", e))?;

        Ok(DatabaseConn { conn })
    }

    fn configure(&self) -> Result<()> {
        // WAL keeps readers unblocked while the harvester appends
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;

        self.conn
            .execute("PRAGMA synchronous=NORMAL", [])
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| anyhow!("Failed to enable foreign keys: {}", e))?;

        Ok(())
    }

    /// Begin an unchecked transaction
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .map_err(|e| anyhow!("Failed to begin transaction: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let foreign_keys: i64 = db
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let tx = db.transaction().unwrap();
        tx.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        tx.commit().unwrap();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM test_table", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");

        let writer = DatabaseConn::open_path(&path).unwrap();
        writer
            .conn
            .execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        writer
            .conn
            .execute("INSERT INTO test_table (id) VALUES (1), (2)", [])
            .unwrap();

        let reader = DatabaseConn::open_read_only(&path).unwrap();
        let count: u32 = reader
            .conn
            .query_row("SELECT COUNT(*) FROM test_table", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert!(reader
            .conn
            .execute("INSERT INTO test_table (id) VALUES (3)", [])
            .is_err());
    }

    #[test]
    fn test_read_only_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatabaseConn::open_read_only(&dir.path().join("missing.sqlite3")).is_err());
    }
}
