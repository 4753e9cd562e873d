//! Terminal implementation of the engine's [`Reporter`].

use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::style::Stylize;
use minimerge_core::Reporter;
use minimerge_core::engine::Plan;
use minimerge_schema::{Action, PackageName, VariantTag};

use super::table;
use super::theme::{RULE_WIDTH, Theme, pluralize};

/// Prints engine progress to stdout.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    theme: Theme,
    plan_shown: AtomicBool,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not print the next plan, it has already been shown.
    pub fn plan_already_shown(&self) {
        self.plan_shown.store(true, Ordering::Relaxed);
    }

    /// Print an error message.
    pub fn error(&self, msg: &str) {
        println!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        );
    }

    /// Print `plan` even if it was shown before.
    pub fn print_plan(&self, plan: &Plan) {
        println!();
        println!(
            "{} {}",
            "Action:".with(self.theme.colors.header),
            plan.action.as_str().bold()
        );
        if !plan.variants.is_empty() {
            let tags: Vec<&str> = plan.variants.iter().map(VariantTag::as_str).collect();
            println!(
                "{} {}",
                "Variants:".with(self.theme.colors.header),
                tags.join(", ")
            );
        }
        if let Some(error) = &plan.error {
            self.error(&format!("Cannot compute the plan: {error}"));
            return;
        }
        if plan.is_empty() {
            self.info("Nothing to do");
            return;
        }
        println!();
        println!("{}", table::plan_table(plan));
        println!();
        println!("{}", table::legend().with(self.theme.colors.secondary));
    }
}

impl Reporter for TerminalReporter {
    fn section(&self, title: &str) {
        println!();
        println!("{} {}", title.bold(), "─".repeat(RULE_WIDTH).with(self.theme.colors.header));
    }

    fn plan(&self, plan: &Plan) {
        if self.plan_shown.swap(false, Ordering::Relaxed) {
            return;
        }
        self.print_plan(plan);
    }

    fn fetching(&self, name: &PackageName, uri: &str) {
        println!(
            "  {} {} {} {}",
            self.theme.icons.active.with(self.theme.colors.warning),
            name.as_str().with(self.theme.colors.package_name),
            "fetching".with(self.theme.colors.secondary),
            uri.with(self.theme.colors.secondary)
        );
    }

    fn updating(&self, name: &PackageName, uri: &str) {
        println!(
            "  {} {} {} {}",
            self.theme.icons.active.with(self.theme.colors.warning),
            name.as_str().with(self.theme.colors.package_name),
            "updating".with(self.theme.colors.secondary),
            uri.with(self.theme.colors.secondary)
        );
    }

    fn building(&self, name: &PackageName, action: Action, variants: &[VariantTag]) {
        let mut line = format!(
            "  {} {} {}",
            self.theme.icons.active.with(self.theme.colors.warning),
            name.as_str().with(self.theme.colors.package_name),
            action.as_str().with(self.theme.colors.secondary)
        );
        if !variants.is_empty() {
            let tags: Vec<&str> = variants.iter().map(VariantTag::as_str).collect();
            line.push_str(&format!(" ({})", tags.join(", ")).with(self.theme.colors.secondary).to_string());
        }
        println!("{line}");
    }

    fn done(&self, name: &PackageName, detail: &str) {
        println!(
            "  {} {} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            name.as_str().with(self.theme.colors.package_name),
            detail.with(self.theme.colors.secondary)
        );
    }

    fn failed(&self, name: &PackageName, reason: &str) {
        println!(
            "  {} {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            name.as_str().with(self.theme.colors.package_name),
            reason.with(self.theme.colors.error)
        );
    }

    fn info(&self, msg: &str) {
        println!("  {} {}", self.theme.icons.info, msg);
    }

    fn success(&self, msg: &str) {
        println!(
            "{} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            msg.with(self.theme.colors.success)
        );
    }

    fn warning(&self, msg: &str) {
        println!(
            "{} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        );
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        println!();
        self.success(&format!(
            "{} processed ({action}) in {elapsed_secs:.1}s",
            pluralize(count, "package")
        ));
    }
}
