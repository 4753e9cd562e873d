//! Command modules - one file per CLI command

pub mod completions;
pub mod list;
pub mod merge;
pub mod migrate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use minimerge_core::{Config, Engine, MergeOptions, Minilays};

use crate::ui::TerminalReporter;

/// Load the configuration and discover the minilays it points at.
pub(crate) fn load(config: Option<&Path>) -> Result<(Config, Minilays)> {
    let config = Config::locate(config).context("Failed to load configuration")?;
    let minilays = Minilays::discover(&config).context("Failed to discover minilays")?;
    if minilays.is_empty() {
        tracing::warn!("No minilay found under {}", config.prefix.display());
    }
    Ok((config, minilays))
}

/// An engine reporting to `reporter`.
pub(crate) fn engine(
    config: Option<&Path>,
    options: impl FnOnce(&Config) -> MergeOptions,
    reporter: Arc<TerminalReporter>,
) -> Result<Engine> {
    let (config, minilays) = load(config)?;
    let options = options(&config);
    Ok(Engine::new(config, minilays, options, reporter)?)
}
