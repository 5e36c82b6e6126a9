use anyhow::Result;
use clap::Args;
use escrutinio::database::{DatabaseConn, SchemaManager, SchemaStatus};
use escrutinio::{EscrutinioConfig, SqliteSnapshotStore, SCHEMA_VERSION};

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also inspect the snapshot store (schema version, snapshot count)
    #[clap(short, long)]
    pub verbose: bool,
}

pub fn run(config: &EscrutinioConfig, args: ConfigArgs) -> Result<()> {
    println!("Config File:        {}", EscrutinioConfig::config_file_path());
    println!("{}", config.summary());

    if !args.verbose {
        return Ok(());
    }

    let sqlite_path = config.sqlite_path();
    if !sqlite_path.exists() {
        println!("Store Status:       not created yet");
        return Ok(());
    }

    let status = DatabaseConn::open_read_only(&sqlite_path)
        .and_then(|db| SchemaManager::new(&db.conn).check_status());
    let status_text = match status {
        Ok(SchemaStatus::Current) => format!("ready (schema v{})", SCHEMA_VERSION),
        Ok(SchemaStatus::NeedsMigration { from, to }) => {
            format!("schema v{} will be upgraded to v{}", from, to)
        }
        Ok(SchemaStatus::NotInitialized) => "not initialized".to_string(),
        Ok(SchemaStatus::Incompatible {
            database_version,
            required_version,
        }) => format!(
            "incompatible (schema v{}, supported v{})",
            database_version, required_version
        ),
        Ok(SchemaStatus::Corrupted) => "damaged, missing tables".to_string(),
        Err(e) => format!("unreadable: {}", e),
    };
    println!("Store Status:       {}", status_text);

    if let Ok(store) = SqliteSnapshotStore::open_read_only(&sqlite_path) {
        match store.snapshot_count() {
            Ok(count) => println!("Snapshots:          {}", count),
            Err(e) => eprintln!("ERROR: {}", e),
        }
    }
    Ok(())
}
