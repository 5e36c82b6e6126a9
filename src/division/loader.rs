//! Division tree loader
//!
//! Retrieves the six level datasets and resolves them into a [`DivisionTree`].
//! Datasets are fetched concurrently (one worker per level), then attached
//! strictly in level order on a single thread, so the result only depends on
//! the datasets' contents.

use super::{DivisionTree, Level, RawRecord};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fmt;
use std::thread;
use tracing::{info, warn};

// =============================================================================
// Sources
// =============================================================================

/// Supplies the records of one administrative level
///
/// Each level is retrieved independently and may fail independently.
pub trait DivisionSource: Sync {
    fn load(&self, level: Level) -> Result<Vec<RawRecord>>;
}

/// Division datasets read from URLs or local files
///
/// Locations are handed to `oneio`, so plain paths, `http(s)://` URLs and
/// compressed files all work.
#[derive(Debug, Clone)]
pub struct RemoteDivisionSource {
    locations: [String; 6],
}

impl RemoteDivisionSource {
    /// Use `<base>/<stem>.json` for every level, e.g. `<base>/municipio.json`
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            locations: Level::ALL.map(|level| format!("{}/{}.json", base, level.dataset_stem())),
        }
    }

    /// Override the location of one level
    pub fn with_location(mut self, level: Level, location: impl Into<String>) -> Self {
        self.locations[level.index()] = location.into();
        self
    }

    pub fn location(&self, level: Level) -> &str {
        &self.locations[level.index()]
    }
}

impl DivisionSource for RemoteDivisionSource {
    fn load(&self, level: Level) -> Result<Vec<RawRecord>> {
        let location = self.location(level);
        info!("Loading {} dataset from {}...", level, location);

        let records: Vec<RawRecord> = oneio::read_json_struct(location)
            .map_err(|e| anyhow!("Failed to read {} dataset from {}: {}", level, location, e))?;

        info!("Loaded {} {} records", records.len(), level);
        Ok(records)
    }
}

/// In-memory division datasets
///
/// Levels that were never set load as empty.
#[derive(Debug, Clone, Default)]
pub struct StaticDivisionSource {
    records: HashMap<Level, Vec<RawRecord>>,
}

impl StaticDivisionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level, records: Vec<RawRecord>) -> Self {
        self.records.insert(level, records);
        self
    }
}

impl DivisionSource for StaticDivisionSource {
    fn load(&self, level: Level) -> Result<Vec<RawRecord>> {
        Ok(self.records.get(&level).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Per-level counts of attached and skipped records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    attached: [usize; 6],
    skipped: [usize; 6],
}

impl LoadSummary {
    pub fn attached(&self, level: Level) -> usize {
        self.attached[level.index()]
    }

    /// Records dropped because their parent could not be resolved
    pub fn skipped(&self, level: Level) -> usize {
        self.skipped[level.index()]
    }

    pub fn total_attached(&self) -> usize {
        self.attached.iter().sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.iter().sum()
    }
}

/// Failure to retrieve one of the level datasets
///
/// Carries the tree built from the levels that precede the failed one, for
/// diagnostics only: it is never a complete tree.
#[derive(Debug)]
pub struct TreeLoadError {
    pub level: Level,
    pub source: anyhow::Error,
    pub partial: DivisionTree,
}

impl fmt::Display for TreeLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to load {} dataset ({} nodes loaded before failure): {}",
            self.level,
            self.partial.len(),
            self.source
        )
    }
}

impl std::error::Error for TreeLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = &*self.source;
        Some(source)
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Builds a [`DivisionTree`] from a [`DivisionSource`]
pub struct TreeLoader<S> {
    source: S,
    url_template: String,
}

impl<S: DivisionSource> TreeLoader<S> {
    pub fn new(source: S, url_template: impl Into<String>) -> Self {
        Self {
            source,
            url_template: url_template.into(),
        }
    }

    /// Load the tree, dropping records with unresolvable parents
    pub fn load(&self) -> Result<DivisionTree, TreeLoadError> {
        self.load_with_summary().map(|(tree, _)| tree)
    }

    /// Load the tree and report how many records were attached or skipped
    pub fn load_with_summary(&self) -> Result<(DivisionTree, LoadSummary), TreeLoadError> {
        let empty = DivisionTree::new(self.url_template.as_str()).map_err(|e| TreeLoadError {
            level: Level::Country,
            source: e,
            partial: empty_tree(),
        })?;

        let datasets = self.fetch_all();

        let mut tree = empty;
        let mut summary = LoadSummary::default();
        for (level, dataset) in Level::ALL.into_iter().zip(datasets) {
            let records = match dataset {
                Ok(records) => records,
                Err(source) => {
                    return Err(TreeLoadError {
                        level,
                        source,
                        partial: tree,
                    })
                }
            };
            attach_level(&mut tree, &mut summary, level, records);
        }

        info!(
            "Division tree loaded: {} nodes attached, {} records skipped",
            summary.total_attached(),
            summary.total_skipped()
        );
        Ok((tree, summary))
    }

    /// Retrieve all six datasets, one worker thread per level
    fn fetch_all(&self) -> Vec<Result<Vec<RawRecord>>> {
        let source = &self.source;
        thread::scope(|s| {
            let workers: Vec<_> = Level::ALL
                .into_iter()
                .map(|level| s.spawn(move || source.load(level)))
                .collect();

            Level::ALL
                .into_iter()
                .zip(workers)
                .map(|(level, worker)| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("{} dataset worker panicked", level)))
                })
                .collect()
        })
    }
}

fn attach_level(
    tree: &mut DivisionTree,
    summary: &mut LoadSummary,
    level: Level,
    records: Vec<RawRecord>,
) {
    for record in records {
        let parent = if level.parent_levels().is_empty() {
            None
        } else {
            match tree.resolve_parent(level, &record.parent_id) {
                Some(parent) => Some(parent),
                None => {
                    warn!(
                        "Unknown parent ID '{}' for {} {} ({}), skipping",
                        record.parent_id, level, record.id, record.name
                    );
                    summary.skipped[level.index()] += 1;
                    continue;
                }
            }
        };
        tree.insert(level, record, parent);
        summary.attached[level.index()] += 1;
    }

    info!(
        "Attached {} {} nodes ({} skipped)",
        summary.attached(level),
        level,
        summary.skipped(level)
    );
}

/// Tree used as the partial result when even the template is unusable
fn empty_tree() -> DivisionTree {
    DivisionTree {
        nodes: Vec::new(),
        levels: Default::default(),
        url_template: String::new(),
    }
}
