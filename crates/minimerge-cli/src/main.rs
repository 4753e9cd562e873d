//! minimerge - build and install minitage packages

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use minimerge_cli::cmd;
use minimerge_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Some(Commands::List { installed }) => cmd::list::list(cli.config.as_deref(), *installed),
        Some(Commands::Migrate { renames, offline }) => {
            cmd::migrate::migrate(cli.config.as_deref(), renames, *offline)
        }
        Some(Commands::Completions { shell }) => {
            cmd::completions::completions(*shell);
            Ok(())
        }
        None => cmd::merge::merge(&cli),
    }
}
