pub mod config;
pub mod export;
pub mod retrieve;
pub mod serve;
pub mod stats;
pub mod urls;

use anyhow::{anyhow, Result};
use escrutinio::{DivisionTree, EscrutinioConfig, SqliteSnapshotStore, TreeLoader};

/// Load the division tree from the configured datasets
///
/// A failed dataset is fatal: nothing is harvested from a partial tree.
pub(crate) fn load_tree(config: &EscrutinioConfig) -> Result<DivisionTree> {
    TreeLoader::new(
        config.division_source(),
        config.results_url_template.as_str(),
    )
    .load()
    .map_err(|e| anyhow!("Division tree unavailable, {}", e))
}

/// Open the configured store without write access
pub(crate) fn open_store_read_only(config: &EscrutinioConfig) -> Result<SqliteSnapshotStore> {
    let path = config.sqlite_path();
    if !path.exists() {
        return Err(anyhow!(
            "No snapshot store at {}, run `escrutinio retrieve` first",
            path.display()
        ));
    }
    SqliteSnapshotStore::open_read_only(&path)
}

/// Build a multi-threaded runtime for the async commands
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("Failed to start async runtime: {}", e))
}

/// Cancel `token` on the first Ctrl-C
pub(crate) fn cancel_on_ctrl_c(token: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, shutting down");
                token.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}
