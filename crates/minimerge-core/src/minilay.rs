//! Minilays: directories of minibuilds, searched in priority order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minimerge_schema::PackageName;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, Variables};
use crate::minibuild::{Minibuild, MinibuildError};
use crate::paths;

/// Errors raised while reading minilays.
#[derive(Error, Debug)]
pub enum MinilayError {
    /// The minilay directory is missing.
    #[error("Minilay directory does not exist: {0}")]
    InvalidPath(PathBuf),

    /// No minibuild has this name.
    #[error("Package not found: {0}")]
    PackageNotFound(PackageName),

    /// The directory cannot be listed.
    #[error("Cannot read minilay {path}: {source}")]
    Io {
        /// Minilay directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A minibuild of the minilay is invalid.
    #[error(transparent)]
    Minibuild(#[from] MinibuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    NotLoaded,
    Loaded,
}

/// A single minilay directory.
///
/// Minibuilds are parsed on first access, one at a time through
/// [`Minilay::get`] or all at once through [`Minilay::load_all`].
#[derive(Debug)]
pub struct Minilay {
    path: PathBuf,
    variables: Arc<Variables>,
    entries: BTreeMap<PackageName, Arc<Minibuild>>,
    state: LoadState,
}

/// Whether a directory entry is not a minibuild.
fn is_ignored(file_name: &str) -> bool {
    file_name.starts_with('.')
        || file_name.to_lowercase().starts_with("readme")
        || file_name.ends_with(".svn")
        || file_name.ends_with(".sav")
        || file_name.ends_with("ignore")
}

impl Minilay {
    /// Open the minilay at `path`. Nothing is parsed yet.
    ///
    /// # Errors
    ///
    /// Returns [`MinilayError::InvalidPath`] if `path` is not a directory.
    pub fn open(path: impl Into<PathBuf>, variables: Arc<Variables>) -> Result<Self, MinilayError> {
        let path = path.into();
        if !path.is_dir() {
            return Err(MinilayError::InvalidPath(path));
        }
        Ok(Self {
            path,
            variables,
            entries: BTreeMap::new(),
            state: LoadState::NotLoaded,
        })
    }

    /// A fully loaded minilay backed by no directory.
    pub fn in_memory(path: impl Into<PathBuf>, minibuilds: impl IntoIterator<Item = Minibuild>) -> Self {
        Self {
            path: path.into(),
            variables: Arc::new(Variables::new()),
            entries: minibuilds
                .into_iter()
                .map(|mb| (mb.name.clone(), Arc::new(mb)))
                .collect(),
            state: LoadState::Loaded,
        }
    }

    /// Directory of this minilay.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Variables minibuilds of this minilay are parsed with.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Parse every minibuild of the directory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse error.
    pub fn load_all(&mut self) -> Result<(), MinilayError> {
        if self.state == LoadState::Loaded {
            return Ok(());
        }
        let read_err = |source| MinilayError::Io {
            path: self.path.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.path).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if is_ignored(&file_name) || !entry.path().is_file() {
                continue;
            }
            names.push(file_name);
        }
        for name in names {
            self.load_entry(&name)?;
        }
        self.state = LoadState::Loaded;
        debug!("Loaded {} minibuilds from {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// Parse the minibuild `name` if it exists and is not loaded yet.
    fn ensure_loaded(&mut self, name: &str) -> Result<(), MinilayError> {
        if self.state == LoadState::Loaded || self.entries.contains_key(name) {
            return Ok(());
        }
        if name.contains(['/', '\\']) || is_ignored(name) || !self.path.join(name).is_file() {
            return Ok(());
        }
        self.load_entry(name)
    }

    fn load_entry(&mut self, name: &str) -> Result<(), MinilayError> {
        if self.entries.contains_key(name) {
            return Ok(());
        }
        let mb = Minibuild::load(&self.path.join(name), &self.variables)?;
        self.entries.insert(mb.name.clone(), Arc::new(mb));
        Ok(())
    }

    /// The minibuild `name`, if this minilay has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the minibuild exists but cannot be parsed.
    pub fn get(&mut self, name: &str) -> Result<Option<Arc<Minibuild>>, MinilayError> {
        self.ensure_loaded(name)?;
        Ok(self.entries.get(name).cloned())
    }

    /// Whether this minilay has a minibuild `name`.
    ///
    /// # Errors
    ///
    /// See [`Minilay::get`].
    pub fn contains(&mut self, name: &str) -> Result<bool, MinilayError> {
        Ok(self.get(name)?.is_some())
    }

    /// Every minibuild of the minilay, sorted by name.
    ///
    /// # Errors
    ///
    /// See [`Minilay::load_all`].
    pub fn minibuilds(&mut self) -> Result<Vec<Arc<Minibuild>>, MinilayError> {
        self.load_all()?;
        Ok(self.entries.values().cloned().collect())
    }

    /// Replace a cached minibuild after it was rewritten on disk.
    pub(crate) fn replace(&mut self, minibuild: Minibuild) {
        self.entries.insert(minibuild.name.clone(), Arc::new(minibuild));
    }
}

/// Priority-ordered list of minilays; the first match wins.
#[derive(Debug, Default)]
pub struct Minilays {
    minilays: Vec<Minilay>,
}

impl Minilays {
    /// Search `minilays` in the given order.
    pub fn new(minilays: Vec<Minilay>) -> Self {
        Self { minilays }
    }

    /// Build the search order for `config`:
    ///
    /// 1. directories from the `MINILAYS` environment variable,
    /// 2. `<prefix>/minilays/*` except the default minilays,
    /// 3. the configured `minilays`,
    /// 4. the default minilays.
    ///
    /// Directories that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `<prefix>/minilays` exists but cannot be listed.
    pub fn discover(config: &Config) -> Result<Self, MinilayError> {
        let from_env: Vec<PathBuf> = std::env::var(paths::MINILAYS_ENV)
            .map(|v| v.split_whitespace().map(PathBuf::from).collect())
            .unwrap_or_default();
        Self::discover_with(config, &from_env)
    }

    pub(crate) fn discover_with(config: &Config, from_env: &[PathBuf]) -> Result<Self, MinilayError> {
        let root = paths::minilays_dir(&config.prefix);
        let defaults: Vec<PathBuf> = config.default_minilays.iter().map(|d| root.join(d)).collect();

        let mut prefixed = Vec::new();
        if root.is_dir() {
            let read_err = |source| MinilayError::Io {
                path: root.clone(),
                source,
            };
            for entry in std::fs::read_dir(&root).map_err(read_err)? {
                let path = entry.map_err(read_err)?.path();
                if path.is_dir() && !defaults.contains(&path) {
                    prefixed.push(path);
                }
            }
            prefixed.sort();
        }

        let variables = Arc::new(config.variables.clone());
        let mut minilays: Vec<Minilay> = Vec::new();
        let ordered = from_env
            .iter()
            .chain(&prefixed)
            .chain(&config.minilays)
            .chain(&defaults);
        for path in ordered {
            if minilays.iter().any(|m| m.path == *path) {
                continue;
            }
            match Minilay::open(path.clone(), Arc::clone(&variables)) {
                Ok(minilay) => minilays.push(minilay),
                Err(_) => warn!("Skipping missing minilay {}", path.display()),
            }
        }
        Ok(Self { minilays })
    }

    /// The first minibuild named `name` in search order.
    ///
    /// # Errors
    ///
    /// Returns an error if a matching minibuild cannot be parsed.
    pub fn lookup(&mut self, name: &str) -> Result<Option<Arc<Minibuild>>, MinilayError> {
        for minilay in &mut self.minilays {
            if let Some(mb) = minilay.get(name)? {
                return Ok(Some(mb));
            }
        }
        Ok(None)
    }

    /// Like [`Minilays::lookup`], but a missing package is an error.
    ///
    /// # Errors
    ///
    /// Returns [`MinilayError::PackageNotFound`] if no minilay has `name`.
    pub fn find(&mut self, name: &str) -> Result<Arc<Minibuild>, MinilayError> {
        self.lookup(name)?
            .ok_or_else(|| MinilayError::PackageNotFound(PackageName::new(name)))
    }

    /// Iterate over the minilays in search order.
    pub fn iter(&self) -> impl Iterator<Item = &Minilay> {
        self.minilays.iter()
    }

    /// Mutably iterate over the minilays in search order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Minilay> {
        self.minilays.iter_mut()
    }

    /// Number of minilays.
    pub fn len(&self) -> usize {
        self.minilays.len()
    }

    /// Whether there is no minilay at all.
    pub fn is_empty(&self) -> bool {
        self.minilays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempdir().unwrap();
        let err = Minilay::open(dir.path().join("missing"), Arc::default()).unwrap_err();
        assert!(matches!(err, MinilayError::InvalidPath(_)));
    }

    #[test]
    fn test_load_all_filters_non_minibuilds() {
        let dir = tempdir().unwrap();
        write(dir.path(), "zlib-1.2", "[minibuild]\ninstall_method = buildout\n");
        write(dir.path(), "README", "not a minibuild");
        write(dir.path(), "readme.txt", "not a minibuild");
        write(dir.path(), ".hidden", "not a minibuild");
        write(dir.path(), "zlib-1.2.sav", "[minibuild]\n");
        write(dir.path(), ".gitignore", "*");
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let mut minilay = Minilay::open(dir.path(), Arc::default()).unwrap();
        let names: Vec<PackageName> = minilay
            .minibuilds()
            .unwrap()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(names, vec![PackageName::from("zlib-1.2")]);
        // Idempotent.
        assert_eq!(minilay.minibuilds().unwrap().len(), 1);
    }

    #[test]
    fn test_get_loads_lazily() {
        let dir = tempdir().unwrap();
        write(dir.path(), "good-1.0", "[minibuild]\ninstall_method = buildout\n");
        write(dir.path(), "broken-1.0", "[minibuild]\nurl = x\n");

        let mut minilay = Minilay::open(dir.path(), Arc::default()).unwrap();
        assert!(minilay.get("good-1.0").unwrap().is_some());
        assert!(minilay.get("absent-1.0").unwrap().is_none());
        assert!(!minilay.contains("../good-1.0").unwrap());
        assert!(minilay.get("broken-1.0").is_err());
        assert!(minilay.load_all().is_err());
    }

    #[test]
    fn test_first_minilay_wins() {
        let first = Minibuild::parse("foo-1.0", "[minibuild]\ndependencies = a\n", &Variables::new()).unwrap();
        let second = Minibuild::parse("foo-1.0", "[minibuild]\ndependencies = b\n", &Variables::new()).unwrap();
        let mut minilays = Minilays::new(vec![
            Minilay::in_memory("/first", [first]),
            Minilay::in_memory("/second", [second]),
        ]);
        let found = minilays.find("foo-1.0").unwrap();
        assert_eq!(found.dependencies, vec![PackageName::from("a")]);
        assert!(matches!(minilays.find("bar-1.0"), Err(MinilayError::PackageNotFound(_))));
    }

    #[test]
    fn test_discover_order() {
        let prefix = tempdir().unwrap();
        let extra = tempdir().unwrap();
        let root = paths::minilays_dir(prefix.path());
        for name in ["dependencies", "eggs", "custom"] {
            std::fs::create_dir_all(root.join(name)).unwrap();
        }

        let mut config = Config::with_prefix(prefix.path());
        config.default_minilays = vec!["dependencies".into(), "eggs".into()];
        config.minilays = vec![extra.path().to_path_buf(), prefix.path().join("nope")];

        let env_dir = tempdir().unwrap();
        let minilays = Minilays::discover_with(&config, &[env_dir.path().to_path_buf()]).unwrap();
        let order: Vec<&Path> = minilays.iter().map(Minilay::path).collect();
        assert_eq!(
            order,
            vec![
                env_dir.path(),
                root.join("custom").as_path(),
                extra.path(),
                root.join("dependencies").as_path(),
                root.join("eggs").as_path(),
            ]
        );
    }
}
