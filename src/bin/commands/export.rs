use anyhow::{anyhow, Result};
use clap::Args;
use escrutinio::{CsvExporter, EscrutinioConfig, ExportColumns};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// Arguments for the Export command
#[derive(Args)]
pub struct ExportArgs {
    /// Output file, stdout when omitted
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Leave out the per-party vote columns
    #[clap(long)]
    pub no_votes: bool,

    /// Leave out the per-party percentage columns
    #[clap(long)]
    pub no_percentage: bool,

    /// Leave out the per-party seat columns
    #[clap(long)]
    pub no_seats: bool,
}

pub fn run(config: &EscrutinioConfig, args: ExportArgs) -> Result<()> {
    let ExportArgs {
        output,
        no_votes,
        no_percentage,
        no_seats,
    } = args;

    let store = super::open_store_read_only(config)?;
    let exporter = CsvExporter::new()
        .with_columns(ExportColumns {
            votes: !no_votes,
            percentage: !no_percentage,
            seats: !no_seats,
        })
        .with_insular_provinces(config.insular_provinces.iter().cloned());

    let summary = match &output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;
            exporter.export(&store, BufWriter::new(file))?
        }
        None => exporter.export(&store, std::io::stdout().lock())?,
    };

    eprintln!(
        "Exported {} rows with {} parties ({} snapshots skipped)",
        summary.rows, summary.parties, summary.skipped
    );
    Ok(())
}
