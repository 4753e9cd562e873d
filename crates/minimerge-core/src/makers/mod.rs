//! Makers: build, rebuild and remove packages.

mod buildout;
mod environment;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minimerge_schema::VariantTag;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::minibuild::Minibuild;

pub use buildout::BuildoutMaker;
pub use environment::BuildEnvironment;

/// Errors raised by makers.
#[derive(Error, Debug)]
pub enum MakeError {
    /// A build failed.
    #[error("Build in {} failed: {reason}", .path.display())]
    Make {
        /// Install directory.
        path: PathBuf,
        /// Tool output or cause.
        reason: String,
    },

    /// A rebuild failed.
    #[error("Rebuild in {} failed: {reason}", .path.display())]
    Reinstall {
        /// Install directory.
        path: PathBuf,
        /// Tool output or cause.
        reason: String,
    },

    /// The install directory cannot be removed.
    #[error("Cannot remove {}: {source}", .path.display())]
    Delete {
        /// Install directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A tool the maker needs cannot be found.
    #[error("'{0}' was not found in PATH")]
    NotInPath(String),

    /// No maker handles this `install_method`.
    #[error("No maker registered for install method '{0}'")]
    Unknown(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a maker needs besides the directory to build in.
#[derive(Debug, Clone)]
pub struct MakeOptions {
    /// Package being built.
    pub minibuild: Arc<Minibuild>,
    /// Never touch the network.
    pub offline: bool,
    /// Run in debug mode.
    pub debug: bool,
    /// Show the tool output.
    pub verbose: bool,
    /// Pick up the newest upstream versions instead of the pinned ones.
    pub newest: bool,
    /// Whether the package is built once per variant.
    pub consumer: bool,
    /// Variants to build, for variant consumers.
    pub variants: Vec<VariantTag>,
    /// Environment of the build, from the dependencies.
    pub env: BuildEnvironment,
}

/// A way of building packages, selected by `install_method`.
pub trait Maker: fmt::Debug + Send + Sync {
    /// The `install_method` this maker handles.
    fn name(&self) -> &str;

    /// Build the package whose sources are in `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MakeError`] if the build fails.
    fn install(&self, path: &Path, opts: &MakeOptions) -> Result<(), MakeError>;

    /// Rebuild an installed package from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`MakeError`] if the rebuild fails.
    fn reinstall(&self, path: &Path, opts: &MakeOptions) -> Result<(), MakeError>;

    /// Remove the package. The install directory is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`MakeError::Delete`] if the directory cannot be removed.
    fn delete(&self, path: &Path, _opts: &MakeOptions) -> Result<(), MakeError> {
        if path.is_dir() {
            info!("Removing {}", path.display());
            std::fs::remove_dir_all(path).map_err(|source| MakeError::Delete {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// The file inside the install directory describing the build, if the
    /// maker needs one. Sources missing it have to be fetched again.
    fn build_descriptor(&self, _minibuild: &Minibuild) -> Option<PathBuf> {
        None
    }
}

/// Makers by install method.
#[derive(Debug, Default)]
pub struct MakerRegistry {
    makers: BTreeMap<String, Box<dyn Maker>>,
}

impl MakerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shipped makers.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(BuildoutMaker::new(config.maker("buildout"))));
        registry
    }

    /// Add or replace a maker under its own name.
    pub fn register(&mut self, maker: Box<dyn Maker>) {
        self.makers.insert(maker.name().to_string(), maker);
    }

    /// The maker for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`MakeError::Unknown`] if none is registered.
    pub fn get(&self, method: &str) -> Result<&dyn Maker, MakeError> {
        self.makers
            .get(method)
            .map(|m| &**m)
            .ok_or_else(|| MakeError::Unknown(method.to_string()))
    }
}
