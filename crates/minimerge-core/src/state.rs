//! Install state persisted under each package's `.minitage` directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minimerge_schema::{Marker, VariantTag};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::config::Variables;
use crate::minibuild::{Minibuild, MinibuildError};
use crate::paths;

/// Errors raised while reading or writing install state.
#[derive(Error, Debug)]
pub enum StateError {
    /// Meta packages and packages without category have no install directory.
    #[error("Package {0} has no install directory")]
    NoInstallPath(String),

    /// A state file cannot be read or written.
    #[error("Cannot access install state {path}: {source}")]
    Io {
        /// State file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The recorded minibuild is invalid.
    #[error("Invalid install snapshot: {0}")]
    Snapshot(#[source] MinibuildError),
}

/// Reads and writes markers and snapshots below a prefix.
#[derive(Debug, Clone)]
pub struct StateStore {
    prefix: PathBuf,
    consumer_category: String,
    variables: Arc<Variables>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl StateStore {
    /// A store rooted at `prefix`. Packages of `consumer_category` are
    /// installed once per variant.
    pub fn new(prefix: impl Into<PathBuf>, consumer_category: impl Into<String>, variables: Arc<Variables>) -> Self {
        Self {
            prefix: prefix.into(),
            consumer_category: consumer_category.into(),
            variables,
        }
    }

    /// Root of the installation tree.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// `<prefix>/<category>/<name>`, or `None` for meta-packages and
    /// packages without a category.
    pub fn install_path(&self, mb: &Minibuild) -> Option<PathBuf> {
        if mb.is_meta() {
            return None;
        }
        let category = mb.category.as_deref()?;
        Some(self.prefix.join(category).join(mb.name.as_str()))
    }

    fn marker_path(&self, mb: &Minibuild, marker: &Marker) -> Option<PathBuf> {
        self.install_path(mb)
            .map(|p| paths::markers_dir(&p).join(marker.file_name()))
    }

    /// Whether `marker` is set for `mb`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] for any failure other than a missing file.
    pub fn is_marked(&self, mb: &Minibuild, marker: &Marker) -> Result<bool, StateError> {
        let Some(path) = self.marker_path(mb, marker) else {
            return Ok(false);
        };
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Text stored in `marker`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] for any failure other than a missing file.
    pub fn mark(&self, mb: &Minibuild, marker: &Marker) -> Result<Option<String>, StateError> {
        let Some(path) = self.marker_path(mb, marker) else {
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Set `marker` for `mb` with `text` as its content.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NoInstallPath`] for meta-packages and
    /// [`StateError::Io`] if the marker cannot be written.
    pub fn set_mark(&self, mb: &Minibuild, marker: &Marker, text: &str) -> Result<(), StateError> {
        let path = self
            .marker_path(mb, marker)
            .ok_or_else(|| StateError::NoInstallPath(mb.name.to_string()))?;
        write_atomic(&path, text.as_bytes())?;
        debug!("Marked {} as {}", mb.name, marker);
        Ok(())
    }

    /// Whether `mb` is installed.
    ///
    /// A variant consumer is installed only when every variant in
    /// `variants` has its `install-<variant>` marker; with no variant at
    /// all it counts as not installed. Anything else needs the `install`
    /// marker.
    ///
    /// # Errors
    ///
    /// Propagates marker read failures.
    pub fn is_installed(&self, mb: &Minibuild, variants: &[VariantTag]) -> Result<bool, StateError> {
        if mb.category.as_deref() == Some(self.consumer_category.as_str()) {
            if variants.is_empty() {
                return Ok(false);
            }
            for tag in variants {
                if !self.is_marked(mb, &Marker::InstallVariant(tag.clone()))? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        self.is_marked(mb, &Marker::Install)
    }

    /// The minibuild as it was when the package was last built.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the snapshot cannot be looked up, and
    /// [`StateError::Snapshot`] if it cannot be read or parsed.
    pub fn installed_minibuild(&self, mb: &Minibuild) -> Result<Option<Minibuild>, StateError> {
        let Some(install) = self.install_path(mb) else {
            return Ok(None);
        };
        let path = paths::snapshot_path(&install);
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        }
        Minibuild::load_as(&path, &mb.name, &self.variables)
            .map(Some)
            .map_err(StateError::Snapshot)
    }

    /// Revision recorded at install time, `None` if never installed.
    ///
    /// An installed package without a snapshot reports its current
    /// revision.
    ///
    /// # Errors
    ///
    /// See [`StateStore::installed_minibuild`].
    pub fn installed_revision(&self, mb: &Minibuild, variants: &[VariantTag]) -> Result<Option<u32>, StateError> {
        if !self.is_installed(mb, variants)? {
            return Ok(None);
        }
        Ok(Some(
            self.installed_minibuild(mb)?
                .map_or(mb.revision, |snapshot| snapshot.revision),
        ))
    }

    /// Whether the minibuild's revision is greater than the installed one.
    ///
    /// # Errors
    ///
    /// See [`StateStore::installed_minibuild`].
    pub fn has_new_revision(&self, mb: &Minibuild, variants: &[VariantTag]) -> Result<bool, StateError> {
        Ok(self
            .installed_revision(mb, variants)?
            .is_some_and(|installed| mb.revision > installed))
    }

    /// Record the descriptor `mb` was built from.
    ///
    /// # Errors
    ///
    /// Returns an error for meta-packages or if the snapshot cannot be
    /// written.
    pub fn record_snapshot(&self, mb: &Minibuild) -> Result<(), StateError> {
        let install = self
            .install_path(mb)
            .ok_or_else(|| StateError::NoInstallPath(mb.name.to_string()))?;
        write_atomic(&paths::snapshot_path(&install), mb.text().as_bytes())
    }
}

/// Write `content` to a temporary file next to `path`, then rename it.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    tmp.write_all(content).map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| io_error(path)(e.error))?;
    Ok(())
}
