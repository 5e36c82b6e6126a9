use anyhow::{anyhow, Result};
use clap::Args;
use escrutinio::EscrutinioConfig;
use std::io::Write;

/// Arguments for the Urls command
#[derive(Args)]
pub struct UrlsArgs {
    /// Print node paths instead of URLs
    #[clap(long)]
    pub paths: bool,
}

pub fn run(config: &EscrutinioConfig, args: UrlsArgs) -> Result<()> {
    let tree = super::load_tree(config)?;

    let mut lines: Vec<String> = tree
        .nodes()
        .map(|id| if args.paths { tree.path(id) } else { tree.url(id) })
        .collect();
    lines.sort();

    let mut stdout = std::io::stdout().lock();
    for line in lines {
        if let Err(e) = writeln!(stdout, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(anyhow!("Failed to write output: {}", e));
        }
    }
    Ok(())
}
