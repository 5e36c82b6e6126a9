//! CSV export of every stored snapshot
//!
//! One row per snapshot: the location columns derived from the snapshot's
//! path, the progress and count columns of the document, then one cell per
//! party for each enabled column block.

use crate::config::DEFAULT_INSULAR_PROVINCES;
use crate::database::SnapshotStore;
use crate::results::{number_cell, ResultsDocument};
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use tracing::{info, warn};

const DELIMITER: u8 = b';';

pub const LOCATION_HEADERS: [&str; 6] = [
    "Pais",
    "Comunidad",
    "Provincia",
    "Isla",
    "Municipio",
    "Distrito",
];

const DOCUMENT_HEADERS: [&str; 10] = [
    "timestamp",
    "progress_total",
    "progress_processed",
    "census",
    "counted_census",
    "counted_percent",
    "voters",
    "abstention",
    "blank",
    "null",
];

/// Which per-party column blocks to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportColumns {
    pub votes: bool,
    pub percentage: bool,
    pub seats: bool,
}

impl Default for ExportColumns {
    fn default() -> Self {
        Self {
            votes: true,
            percentage: true,
            seats: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: usize,
    /// Snapshots whose payload was not a results document
    pub skipped: usize,
    pub parties: usize,
}

pub struct CsvExporter {
    columns: ExportColumns,
    insular_provinces: HashSet<String>,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            columns: ExportColumns::default(),
            insular_provinces: DEFAULT_INSULAR_PROVINCES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, columns: ExportColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_insular_provinces<I, S>(mut self, provinces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insular_provinces = provinces.into_iter().map(Into::into).collect();
        self
    }

    /// Sorted set of party acronyms found in the store's decodable snapshots
    pub fn party_order(&self, store: &dyn SnapshotStore) -> Result<Vec<String>> {
        let mut acronyms = BTreeSet::new();
        store.for_each_snapshot(&mut |snapshot| {
            if let Ok(doc) = ResultsDocument::from_slice(&snapshot.payload) {
                for party in doc.results.parties {
                    acronyms.insert(party.acronym);
                }
            }
            Ok(())
        })?;
        Ok(acronyms.into_iter().collect())
    }

    pub fn header(&self, parties: &[String]) -> Vec<String> {
        let mut header: Vec<String> = LOCATION_HEADERS
            .iter()
            .chain(DOCUMENT_HEADERS.iter())
            .map(|h| h.to_string())
            .collect();

        for (enabled, prefix) in self.party_blocks() {
            if enabled {
                header.extend(parties.iter().map(|p| format!("{}:{}", prefix, p)));
            }
        }
        header
    }

    /// Split a path into the six location columns
    ///
    /// Below the province, paths of insular provinces go island, municipality,
    /// district; other provinces skip the island column.
    pub fn location_columns(&self, path: &str) -> [String; 6] {
        let mut columns: [String; 6] = Default::default();
        let segments: Vec<&str> = path.split('/').collect();

        for (column, segment) in columns.iter_mut().zip(segments.iter().take(3)) {
            *column = segment.to_string();
        }

        let insular = segments
            .get(2)
            .is_some_and(|province| self.insular_provinces.contains(*province));
        let first_below = if insular { 3 } else { 4 };
        for (column, segment) in columns[first_below..]
            .iter_mut()
            .zip(segments.iter().skip(3))
        {
            *column = segment.to_string();
        }

        columns
    }

    pub fn row(&self, path: &str, doc: &ResultsDocument, parties: &[String]) -> Vec<String> {
        let results = &doc.results;
        let mut row: Vec<String> = self.location_columns(path).into_iter().collect();
        row.extend([
            doc.timestamp_secs().to_string(),
            doc.progress.total.to_string(),
            doc.progress.processed.to_string(),
            results.census.to_string(),
            results.counted_census.to_string(),
            number_cell(&results.counted_percent),
            results.voters.to_string(),
            results.abstention.to_string(),
            results.blank.to_string(),
            results.null.to_string(),
        ]);

        let found: Vec<_> = parties.iter().map(|p| results.party(p)).collect();
        if self.columns.votes {
            row.extend(found.iter().map(|p| {
                p.map(|p| p.votes.presential.to_string())
                    .unwrap_or_default()
            }));
        }
        if self.columns.percentage {
            row.extend(
                found
                    .iter()
                    .map(|p| p.map(|p| number_cell(&p.votes.percent)).unwrap_or_default()),
            );
        }
        if self.columns.seats {
            row.extend(
                found
                    .iter()
                    .map(|p| p.map(|p| p.seats.to_string()).unwrap_or_default()),
            );
        }
        row
    }

    /// Write the header and one row per decodable snapshot
    pub fn export<W: Write>(&self, store: &dyn SnapshotStore, writer: W) -> Result<ExportSummary> {
        let parties = self.party_order(store)?;
        info!("Exporting snapshots with {} parties", parties.len());

        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(writer);
        csv_writer
            .write_record(self.header(&parties))
            .map_err(|e| anyhow!("Failed to write CSV header: {}", e))?;

        let mut summary = ExportSummary {
            parties: parties.len(),
            ..Default::default()
        };
        store.for_each_snapshot(&mut |snapshot| {
            match ResultsDocument::from_slice(&snapshot.payload) {
                Ok(doc) => {
                    csv_writer
                        .write_record(self.row(&snapshot.path, &doc, &parties))
                        .map_err(|e| anyhow!("Failed to write CSV row: {}", e))?;
                    summary.rows += 1;
                }
                Err(e) => {
                    warn!(
                        "Skipping snapshot {} of {}: {}",
                        snapshot.observed_at, snapshot.path, e
                    );
                    summary.skipped += 1;
                }
            }
            Ok(())
        })?;

        csv_writer
            .flush()
            .map_err(|e| anyhow!("Failed to flush CSV output: {}", e))?;

        info!(
            "Exported {} rows ({} snapshots skipped)",
            summary.rows, summary.skipped
        );
        Ok(summary)
    }

    fn party_blocks(&self) -> [(bool, &'static str); 3] {
        [
            (self.columns.votes, "votes"),
            (self.columns.percentage, "percentage"),
            (self.columns.seats, "seats"),
        ]
    }
}
