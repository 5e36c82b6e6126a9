use anyhow::{anyhow, Result};
use clap::Args;
use escrutinio::database::ensure_data_dir;
use escrutinio::retrieval::{Harvester, HttpFetcher, RetrievalScheduler};
use escrutinio::server::{bind_listener, serve, ServerState};
use escrutinio::{EscrutinioConfig, SnapshotStore, SqliteSnapshotStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments for the Retrieve command
#[derive(Args)]
pub struct RetrieveArgs {
    /// Run a single retrieval cycle and exit
    #[clap(long)]
    pub once: bool,

    /// Do not start the status server
    #[clap(long)]
    pub no_server: bool,
}

pub fn run(config: &EscrutinioConfig, args: RetrieveArgs) -> Result<()> {
    let RetrieveArgs { once, no_server } = args;

    let tree = Arc::new(super::load_tree(config)?);
    if tree.is_empty() {
        return Err(anyhow!("Division tree is empty, nothing to retrieve"));
    }

    ensure_data_dir(&config.data_dir)?;
    let sqlite_path = config.sqlite_path();
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::open(&sqlite_path)?);

    let scheduler = Arc::new(RetrievalScheduler::new(
        Arc::clone(&tree),
        Arc::new(HttpFetcher::new(config.fetch_timeout)),
        store,
        config.scheduler_config(),
    ));
    let harvester = Harvester::new(Arc::clone(&scheduler), config.cycle_interval)?;

    let runtime = super::runtime()?;
    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        super::cancel_on_ctrl_c(shutdown.clone());

        if once {
            let report = scheduler.run_cycle(shutdown.child_token()).await;
            println!("{}", report);
            return Ok(());
        }

        // the server reads through its own connection so requests never
        // queue behind the harvester's writes
        let server = if no_server {
            None
        } else {
            let reader = SqliteSnapshotStore::open_read_only(&sqlite_path)?;
            let state = ServerState::new(Arc::new(reader))
                .with_readback_path(config.readback_path.as_str())
                .with_backup_name(config.database_file.as_str());
            let listener = bind_listener(&config.server_config()).await?;
            Some(tokio::spawn(serve(listener, state, shutdown.clone())))
        };

        let cycles = harvester.run(shutdown.clone()).await;
        shutdown.cancel();

        if let Some(server) = server {
            server
                .await
                .map_err(|e| anyhow!("Status server task failed: {}", e))??;
        }

        info!("Retrieval stopped after {} cycles", cycles);
        Ok::<(), anyhow::Error>(())
    })
}
