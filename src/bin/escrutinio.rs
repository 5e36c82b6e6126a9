use clap::{Parser, Subcommand};
use escrutinio::*;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::export::ExportArgs;
use commands::retrieve::RetrieveArgs;
use commands::serve::ServeArgs;
use commands::stats::StatsArgs;
use commands::urls::UrlsArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.escrutinio/escrutinio.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the division tree and harvest results documents until Ctrl-C.
    Retrieve(RetrieveArgs),

    /// Print the results URL of every node in the division tree.
    Urls(UrlsArgs),

    /// Show per-path snapshot counts of the local store.
    Stats(StatsArgs),

    /// Serve the status endpoints over an existing store.
    Serve(ServeArgs),

    /// Export every stored snapshot as CSV.
    Export(ExportArgs),

    /// Show the effective configuration.
    Config(ConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match EscrutinioConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Retrieve(args) => commands::retrieve::run(&config, args),
        Commands::Urls(args) => commands::urls::run(&config, args),
        Commands::Stats(args) => commands::stats::run(&config, args),
        Commands::Serve(args) => commands::serve::run(&config, args),
        Commands::Export(args) => commands::export::run(&config, args),
        Commands::Config(args) => commands::config::run(&config, args),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
