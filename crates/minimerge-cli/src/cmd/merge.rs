//! The default command: merge packages.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Result, bail};
use minimerge_core::Reporter;

use crate::ui::TerminalReporter;
use crate::{Cli, CliError};

/// Sync, plan and run a merge as the flags say.
pub fn merge(cli: &Cli) -> Result<()> {
    let args = &cli.merge;
    let reporter = Arc::new(TerminalReporter::new());
    let mut engine = super::engine(
        cli.config.as_deref(),
        |config| args.options(config, cli.verbose),
        Arc::clone(&reporter),
    )?;

    if args.sync {
        let report = engine.sync();
        if !report.is_success() {
            reporter.warning(&format!(
                "{} minilay(s) could not be synced",
                report.failed.len()
            ));
        }
        if args.packages.is_empty() {
            return Ok(());
        }
    }

    let names = args.package_names();
    let action = args.action();

    if args.pretend {
        // Planning errors are part of the report, not a failure
        let plan = engine.pretend(&names);
        reporter.print_plan(&plan);
        return Ok(());
    }

    if args.ask {
        let plan = engine.pretend(&names);
        reporter.print_plan(&plan);
        if let Some(error) = plan.error {
            bail!(error);
        }
        if plan.is_empty() {
            return Ok(());
        }
        let stdin = std::io::stdin();
        if !confirm(&mut stdin.lock(), &mut std::io::stdout())? {
            reporter.info("Nothing done");
            return Err(CliError::Aborted.into());
        }
        reporter.plan_already_shown();
    }

    engine.run(action, &names)?;
    Ok(())
}

/// Ask `Continue? (y|n)` until the answer is one of them.
///
/// End of input counts as no.
pub(crate) fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    loop {
        write!(output, "Continue? (y|n) ")?;
        output.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => {}
        }
    }
}
