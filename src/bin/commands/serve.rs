use anyhow::Result;
use clap::Args;
use escrutinio::server::{start_server, ServerState};
use escrutinio::EscrutinioConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Arguments for the Serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind to, overriding `http_address`
    #[clap(long)]
    pub address: Option<String>,

    /// Port to listen on, overriding `http_port`
    #[clap(short, long)]
    pub port: Option<u16>,
}

pub fn run(config: &EscrutinioConfig, args: ServeArgs) -> Result<()> {
    let store = super::open_store_read_only(config)?;
    let state = ServerState::new(Arc::new(store))
        .with_readback_path(config.readback_path.as_str())
        .with_backup_name(config.database_file.as_str());

    let mut server_config = config.server_config();
    if let Some(address) = args.address {
        server_config = server_config.with_address(address);
    }
    if let Some(port) = args.port {
        server_config = server_config.with_port(port);
    }

    let runtime = super::runtime()?;
    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        super::cancel_on_ctrl_c(shutdown.clone());
        start_server(state, server_config, shutdown).await
    })
}
