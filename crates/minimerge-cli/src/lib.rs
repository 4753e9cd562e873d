//! minimerge - build and install minitage packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Packages are described by minibuilds found in minilays. `minimerge`
//! resolves their dependencies, fetches their sources and drives their
//! install method, recording what was done under the prefix.
//!
//! # Directory Layout
//!
//! ```text
//! <prefix>/
//! ├── minilays/              # Catalogs of minibuilds
//! ├── etc/minimerge.toml     # Configuration
//! └── <category>/<name>/
//!     └── .minitage/
//!         ├── markers/       # fetch, install, install-<variant>, ...
//!         └── minibuild      # Snapshot of the installed descriptor
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use minimerge_core::{Config, FetchOrder, MergeOptions};
use minimerge_schema::{Action, PackageName};
use thiserror::Error;

/// Errors raised by the command line itself.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    #[error("Invalid rename '{0}', expected OLD=NEW")]
    InvalidRename(String),

    #[error("Aborted")]
    Aborted,
}

#[derive(Debug, Parser)]
#[command(name = "minimerge")]
#[command(author, version, about = "minimerge - build and install minitage packages")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "MINIMERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub merge: MergeArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags of a merge, the default mode of the command line.
#[derive(Debug, Default, Args)]
pub struct MergeArgs {
    /// Packages to merge
    pub packages: Vec<String>,

    /// Remove the packages
    #[arg(long = "rm", conflicts_with_all = ["reinstall", "generate_env"])]
    pub delete: bool,

    /// Rebuild the packages even if they are installed
    #[arg(short = 'R', long, conflicts_with = "generate_env")]
    pub reinstall: bool,

    /// Only write the environment file of each package
    #[arg(short = 'E', long)]
    pub generate_env: bool,

    /// Update the minilays before merging
    #[arg(short, long)]
    pub sync: bool,

    /// Update the sources of installed packages and build them again
    #[arg(short = 'U', long)]
    pub update: bool,

    /// Run install methods in newest mode
    #[arg(short, long)]
    pub upgrade: bool,

    /// Act on the named packages only, not their dependencies
    #[arg(short = 'N', long)]
    pub nodeps: bool,

    /// Skip every package before this one
    #[arg(short, long, value_name = "PACKAGE")]
    pub jump: Option<String>,

    /// Fetch sources, build nothing
    #[arg(short = 'F', long)]
    pub fetch_only: bool,

    /// Fetch every package before building any
    #[arg(short, long)]
    pub fetch_first: bool,

    /// Never touch the network
    #[arg(short, long)]
    pub offline: bool,

    /// Show what would be done and stop
    #[arg(short, long)]
    pub pretend: bool,

    /// Show what would be done and ask before doing it
    #[arg(short, long)]
    pub ask: bool,

    /// Merge the dependencies of the packages, not the packages
    #[arg(long)]
    pub only_dependencies: bool,

    /// Build variant consumers for every known variant
    #[arg(long)]
    pub all_variants: bool,

    /// Run install methods in debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Install prebuilt packages when available, sources otherwise
    #[arg(short = 'k', long, conflicts_with = "offline")]
    pub use_binaries: bool,
}

impl MergeArgs {
    pub fn action(&self) -> Action {
        if self.delete {
            Action::Delete
        } else if self.reinstall {
            Action::Reinstall
        } else if self.generate_env {
            Action::GenerateEnv
        } else {
            Action::Install
        }
    }

    /// Engine options, `config` filling in the offline and debug defaults.
    pub fn options(&self, config: &Config, verbose: bool) -> MergeOptions {
        MergeOptions {
            action: self.action(),
            update: self.update,
            upgrade: self.upgrade,
            offline: self.offline || config.offline,
            debug: self.debug || config.debug,
            verbose,
            nodeps: self.nodeps,
            jump: self.jump.as_deref().map(PackageName::new),
            fetch_only: self.fetch_only,
            fetch_order: if self.fetch_first {
                FetchOrder::FetchFirst
            } else {
                FetchOrder::JustInTime
            },
            only_dependencies: self.only_dependencies,
            all_variants: self.all_variants,
            pretend: self.pretend,
            ask: self.ask,
            use_binaries: self.use_binaries,
        }
    }

    pub fn package_names(&self) -> Vec<PackageName> {
        self.packages.iter().map(PackageName::new).collect()
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the packages of every minilay
    List {
        /// Only show installed packages
        #[arg(long)]
        installed: bool,
    },
    /// Rename dependencies in every minibuild, then regenerate environments
    Migrate {
        /// Renames as OLD=NEW
        #[arg(required = true, value_name = "OLD=NEW")]
        renames: Vec<String>,
        /// Never touch the network
        #[arg(short, long)]
        offline: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Parse `OLD=NEW` pairs.
///
/// # Example
///
/// ```
/// use minimerge_cli::parse_renames;
///
/// let renames = parse_renames(&["libxml2-2.6=libxml2-2.7".to_string()]).unwrap();
/// assert_eq!(renames.len(), 1);
/// assert!(parse_renames(&["libxml2-2.6".to_string()]).is_err());
/// ```
pub fn parse_renames(
    pairs: &[String],
) -> Result<std::collections::BTreeMap<PackageName, PackageName>, CliError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => {
                Ok((PackageName::new(old.trim()), PackageName::new(new.trim())))
            }
            _ => Err(CliError::InvalidRename(pair.clone())),
        })
        .collect()
}
