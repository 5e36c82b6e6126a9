//! In-memory snapshot store
//!
//! Same semantics as the SQLite store, kept in ordered maps. Used by tests and
//! by embedders that do not need persistence.

use super::store::{ObservedAt, PartitionStats, SnapshotSelector, SnapshotStore, StoredSnapshot};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard};

type Partitions = BTreeMap<String, BTreeMap<ObservedAt, Vec<u8>>>;

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    partitions: RwLock<Partitions>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Partitions>> {
        self.partitions
            .read()
            .map_err(|_| anyhow!("Snapshot store lock poisoned"))
    }
}

fn snapshot(path: &str, observed_at: &ObservedAt, payload: &[u8]) -> StoredSnapshot {
    StoredSnapshot {
        path: path.to_string(),
        observed_at: *observed_at,
        payload: payload.to_vec(),
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, path: &str, observed_at: ObservedAt, payload: &[u8]) -> Result<()> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| anyhow!("Snapshot store lock poisoned"))?;
        partitions
            .entry(path.to_string())
            .or_default()
            .insert(observed_at, payload.to_vec());
        Ok(())
    }

    fn get(&self, path: &str, selector: SnapshotSelector) -> Result<Option<StoredSnapshot>> {
        let partitions = self.read()?;
        let Some(partition) = partitions.get(path) else {
            return Ok(None);
        };

        let found = match selector {
            SnapshotSelector::Latest => partition.iter().next_back(),
            SnapshotSelector::At(observed_at) => partition.get_key_value(&observed_at),
        };
        Ok(found.map(|(observed_at, payload)| snapshot(path, observed_at, payload)))
    }

    fn partitions(&self) -> Result<Vec<PartitionStats>> {
        let partitions = self.read()?;
        Ok(partitions
            .iter()
            .map(|(path, snapshots)| PartitionStats {
                path: path.clone(),
                snapshot_count: snapshots.len() as u64,
                first_observed: snapshots.keys().next().copied(),
                last_observed: snapshots.keys().next_back().copied(),
            })
            .collect())
    }

    fn snapshots(&self, path: &str) -> Result<Vec<StoredSnapshot>> {
        let partitions = self.read()?;
        Ok(partitions
            .get(path)
            .map(|partition| {
                partition
                    .iter()
                    .map(|(observed_at, payload)| snapshot(path, observed_at, payload))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn for_each_snapshot(
        &self,
        visit: &mut dyn FnMut(StoredSnapshot) -> Result<()>,
    ) -> Result<()> {
        let partitions = self.read()?;
        for (path, partition) in partitions.iter() {
            for (observed_at, payload) in partition {
                visit(snapshot(path, observed_at, payload))?;
            }
        }
        Ok(())
    }
}
