//! Fetchers: obtain and refresh package sources.

mod scm;
mod static_file;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Config;
use crate::io::extract::ExtractError;
use crate::minibuild::SourceLocator;

pub use scm::{Scm, ScmFetcher};
pub use static_file::StaticFetcher;

/// Errors raised by fetchers.
#[derive(Error, Debug)]
pub enum FetchError {
    /// A fresh fetch failed.
    #[error("Fetch of {uri} into {} failed: {reason}", .dest.display())]
    Fetch {
        /// Source uri.
        uri: String,
        /// Destination directory.
        dest: PathBuf,
        /// Tool output or cause.
        reason: String,
    },

    /// Updating an existing working copy failed.
    #[error("Update of {} from {uri} failed: {reason}", .dest.display())]
    Update {
        /// Source uri.
        uri: String,
        /// Working copy.
        dest: PathBuf,
        /// Tool output or cause.
        reason: String,
    },

    /// The tool of a fetcher cannot be found.
    #[error("'{0}' was not found in PATH")]
    NotInPath(String),

    /// A downloaded file does not match its md5.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .file.display())]
    Checksum {
        /// Downloaded file.
        file: PathBuf,
        /// md5 from the minibuild.
        expected: String,
        /// md5 of the file.
        actual: String,
    },

    /// An HTTP request failed.
    #[error("Download of {uri} failed: {source}")]
    Http {
        /// Requested uri.
        uri: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// No fetcher handles this `src_type`.
    #[error("No fetcher registered for '{0}'")]
    Unknown(String),

    /// A downloaded archive cannot be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-fetch settings derived from a minibuild's `src_*` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Revision, tag or branch from `-r<rev>` in `src_opts`.
    pub revision: Option<String>,
    /// Remaining `src_opts` words, passed to the tool as-is.
    pub args: Vec<String>,
    /// Expected md5 of a downloaded file.
    pub md5: Option<String>,
}

impl FetchOptions {
    /// Split `src_opts` into a revision and extra arguments.
    pub fn from_source(source: &SourceLocator) -> Self {
        let mut revision = None;
        let mut args = Vec::new();
        let mut words = source.options.split_whitespace();
        while let Some(word) = words.next() {
            if word == "-r" {
                revision = words.next().map(str::to_string);
            } else if let Some(rev) = word.strip_prefix("-r") {
                revision = Some(rev.to_string());
            } else {
                args.push(word.to_string());
            }
        }
        Self {
            revision,
            args,
            md5: source.md5.clone(),
        }
    }
}

/// A way of obtaining sources.
pub trait Fetcher: fmt::Debug + Send + Sync {
    /// The `src_type` this fetcher handles.
    fn name(&self) -> &str;

    /// Obtain `uri` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the sources cannot be obtained.
    fn fetch(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError>;

    /// Refresh an existing working copy at `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the working copy cannot be updated.
    fn update(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError>;

    /// Whether the working copy at `dest` tracks another uri than `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the working copy cannot be inspected.
    fn has_uri_changed(&self, dest: &Path, uri: &str) -> Result<bool, FetchError> {
        Ok(self
            .recorded_uri(dest)?
            .is_some_and(|recorded| recorded.trim_end_matches('/') != uri.trim_end_matches('/')))
    }

    /// The uri the working copy at `dest` was obtained from, if known.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the working copy cannot be inspected.
    fn recorded_uri(&self, _dest: &Path) -> Result<Option<String>, FetchError> {
        Ok(None)
    }

    /// Metadata directory marking a working copy of this fetcher, e.g. `.git`.
    fn metadata_dir(&self) -> Option<&str> {
        None
    }
}

/// Fetchers by `src_type`.
#[derive(Debug, Default)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<String, Box<dyn Fetcher>>,
}

impl FetcherRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shipped fetchers: `git`, `hg`, `svn`, `bzr` and `static`.
    ///
    /// Tools are searched in `<prefix>/bin`, in the `parts/part/bin`
    /// directories of installed dependencies, then in `PATH`. Explicit
    /// paths from the `[fetchers]` table win.
    pub fn with_defaults(config: &Config) -> Self {
        let search_path = tool_search_path(&config.prefix);
        let mut registry = Self::new();
        for scm in [Scm::Git, Scm::Mercurial, Scm::Subversion, Scm::Bazaar] {
            let fetcher = ScmFetcher::new(scm, config.fetchers.get(scm.src_type()).cloned())
                .with_search_path(search_path.clone());
            registry.register(Box::new(fetcher));
        }
        registry.register(Box::new(StaticFetcher::new()));
        registry
    }

    /// Add or replace a fetcher under its own name.
    pub fn register(&mut self, fetcher: Box<dyn Fetcher>) {
        self.fetchers.insert(fetcher.name().to_string(), fetcher);
    }

    /// The fetcher for `src_type`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unknown`] if none is registered.
    pub fn get(&self, src_type: &str) -> Result<&dyn Fetcher, FetchError> {
        self.fetchers
            .get(src_type)
            .map(|f| &**f)
            .ok_or_else(|| FetchError::Unknown(src_type.to_string()))
    }

    /// Every registered fetcher, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Fetcher> {
        self.fetchers.values().map(|f| &**f)
    }
}

fn tool_search_path(prefix: &Path) -> Option<OsString> {
    let mut dirs: Vec<PathBuf> = vec![prefix.join("bin")];
    if let Ok(entries) = std::fs::read_dir(prefix.join("dependencies")) {
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path().join("parts").join("part").join("bin"))
            .filter(|p| p.is_dir())
            .collect();
        found.sort();
        dirs.extend(found);
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    std::env::join_paths(dirs).ok()
}
