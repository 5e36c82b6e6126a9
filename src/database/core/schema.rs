//! Database schema management
//!
//! The store keeps one row per partition (hierarchical path) and one row per
//! observed snapshot. Snapshot keys are the 8-byte `ObservedAt` encoding, so
//! the `(path, observed_at)` unique index orders each partition
//! chronologically.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Current schema version
/// Increment this when making breaking schema changes
pub const SCHEMA_VERSION: u32 = 1;

/// Schema definitions for all tables in the snapshot store
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// Tracks schema version and other store-wide metadata
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS escrutinio_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    pub const PARTITIONS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS partitions (
            path TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    pub const SNAPSHOTS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            path TEXT NOT NULL REFERENCES partitions(path),
            observed_at BLOB NOT NULL,
            payload BLOB NOT NULL,
            UNIQUE (path, observed_at)
        );
    "#;

    pub const REQUIRED_TABLES: &'static [&'static str] =
        &["escrutinio_meta", "partitions", "snapshots"];
}

/// Schema manager for the snapshot store
///
/// Handles schema initialization and version checking.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create all tables if they don't exist and record the schema version
    ///
    /// Never drops anything: snapshots already in the file are kept.
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute(SchemaDefinitions::META_TABLE, [])
            .map_err(|e| anyhow!("Failed to create meta table: {}", e))?;

        self.conn
            .execute(SchemaDefinitions::PARTITIONS_TABLE, [])
            .map_err(|e| anyhow!("Failed to create partitions table: {}", e))?;

        self.conn
            .execute(SchemaDefinitions::SNAPSHOTS_TABLE, [])
            .map_err(|e| anyhow!("Failed to create snapshots table: {}", e))?;

        self.set_meta("schema_version", &SCHEMA_VERSION.to_string())?;

        Ok(())
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        if !self.table_exists("escrutinio_meta")? {
            return Ok(SchemaStatus::NotInitialized);
        }

        let current_version = self.get_schema_version()?;

        if current_version == SCHEMA_VERSION {
            if self.verify_integrity()? {
                Ok(SchemaStatus::Current)
            } else {
                Ok(SchemaStatus::Corrupted)
            }
        } else if current_version < SCHEMA_VERSION {
            Ok(SchemaStatus::NeedsMigration {
                from: current_version,
                to: SCHEMA_VERSION,
            })
        } else {
            Ok(SchemaStatus::Incompatible {
                database_version: current_version,
                required_version: SCHEMA_VERSION,
            })
        }
    }

    fn get_schema_version(&self) -> Result<u32> {
        let version = self
            .get_meta("schema_version")?
            .unwrap_or_else(|| "0".to_string());

        version
            .parse()
            .map_err(|e| anyhow!("Invalid schema version: {}", e))
    }

    fn verify_integrity(&self) -> Result<bool> {
        for table in SchemaDefinitions::REQUIRED_TABLES {
            if !self.table_exists(table)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO escrutinio_meta (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))",
                [key, value],
            )
            .map_err(|e| anyhow!("Failed to set meta value: {}", e))?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result: Result<String, _> = self.conn.query_row(
            "SELECT value FROM escrutinio_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to get meta value: {}", e)),
        }
    }
}

/// Status of the database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database is not initialized (fresh database)
    NotInitialized,

    /// Schema is current and valid
    Current,

    /// Schema needs migration from an older version
    NeedsMigration { from: u32, to: u32 },

    /// Database is from a newer version (incompatible)
    Incompatible {
        database_version: u32,
        required_version: u32,
    },

    /// Schema is corrupted (missing tables)
    Corrupted,
}
