use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use minimerge_core::migrate::rename_dependencies;
use minimerge_core::{MergeOptions, Reporter};
use minimerge_schema::Action;

use crate::parse_renames;
use crate::ui::TerminalReporter;

/// Rewrite dependencies as `renames` say, then regenerate the environment
/// files of the rewritten packages that are installed.
pub fn migrate(config: Option<&Path>, renames: &[String], offline: bool) -> Result<()> {
    let renames = parse_renames(renames)?;
    let reporter = Arc::new(TerminalReporter::new());
    let mut engine = super::engine(
        config,
        |config| MergeOptions {
            action: Action::GenerateEnv,
            nodeps: true,
            offline: offline || config.offline,
            ..MergeOptions::default()
        },
        Arc::clone(&reporter),
    )?;

    reporter.section("Migrating");
    let rewritten = rename_dependencies(engine.minilays_mut(), &renames)
        .context("Failed to rewrite minibuilds")?;
    if rewritten.is_empty() {
        reporter.info("No minibuild depends on the renamed packages");
        return Ok(());
    }
    for name in &rewritten {
        reporter.done(name, "dependencies rewritten");
    }

    let mut installed = Vec::new();
    for name in rewritten {
        let mb = engine.minilays_mut().find(name.as_str())?;
        if engine.is_installed(&mb)? {
            installed.push(name);
        }
    }
    if installed.is_empty() {
        return Ok(());
    }
    engine.run(Action::GenerateEnv, &installed)?;
    Ok(())
}
