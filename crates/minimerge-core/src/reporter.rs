//! Reporter trait for dependency injection
//!
//! The engine reports progress through this trait so that it does not
//! depend on the terminal UI of the command line.

use minimerge_schema::{Action, PackageName, VariantTag};

use crate::engine::Plan;

/// Receives progress events from the engine.
pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Fetching", "Building").
    fn section(&self, title: &str);

    /// Show the computed work list before anything runs.
    fn plan(&self, plan: &Plan);

    /// Sources of `name` are being fetched from `uri`.
    fn fetching(&self, name: &PackageName, uri: &str);

    /// The working copy of `name` is being updated from `uri`.
    fn updating(&self, name: &PackageName, uri: &str);

    /// `name` is handed to its maker. `variants` is empty for packages
    /// built once.
    fn building(&self, name: &PackageName, action: Action, variants: &[VariantTag]);

    /// An operation on `name` completed.
    fn done(&self, name: &PackageName, detail: &str);

    /// An operation on `name` failed.
    fn failed(&self, name: &PackageName, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Final summary of a run.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn plan(&self, plan: &Plan) {
        (**self).plan(plan);
    }
    fn fetching(&self, name: &PackageName, uri: &str) {
        (**self).fetching(name, uri);
    }
    fn updating(&self, name: &PackageName, uri: &str) {
        (**self).updating(name, uri);
    }
    fn building(&self, name: &PackageName, action: Action, variants: &[VariantTag]) {
        (**self).building(name, action, variants);
    }
    fn done(&self, name: &PackageName, detail: &str) {
        (**self).done(name, detail);
    }
    fn failed(&self, name: &PackageName, reason: &str) {
        (**self).failed(name, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn plan(&self, _: &Plan) {}
    fn fetching(&self, _: &PackageName, _: &str) {}
    fn updating(&self, _: &PackageName, _: &str) {}
    fn building(&self, _: &PackageName, _: Action, _: &[VariantTag]) {}
    fn done(&self, _: &PackageName, _: &str) {}
    fn failed(&self, _: &PackageName, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
