use anyhow::{anyhow, Result};
use clap::Args;
use escrutinio::{EscrutinioConfig, PartitionStats, SnapshotStore};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Arguments for the Stats command
#[derive(Args)]
pub struct StatsArgs {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PartitionRow {
    path: String,
    snapshots: u64,
    first_observed: String,
    last_observed: String,
}

impl From<&PartitionStats> for PartitionRow {
    fn from(stats: &PartitionStats) -> Self {
        let instant = |o: &Option<escrutinio::ObservedAt>| {
            o.map(|t| t.datetime().format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        };
        Self {
            path: stats.path.clone(),
            snapshots: stats.snapshot_count,
            first_observed: instant(&stats.first_observed),
            last_observed: instant(&stats.last_observed),
        }
    }
}

pub fn run(config: &EscrutinioConfig, args: StatsArgs) -> Result<()> {
    let store = super::open_store_read_only(config)?;
    let partitions = store.partitions()?;

    if args.json {
        let json = serde_json::to_string_pretty(&partitions)
            .map_err(|e| anyhow!("Failed to serialize to JSON: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    let total: u64 = partitions.iter().map(|p| p.snapshot_count).sum();
    let rows: Vec<PartitionRow> = partitions.iter().map(PartitionRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} partitions, {} snapshots", partitions.len(), total);
    Ok(())
}
