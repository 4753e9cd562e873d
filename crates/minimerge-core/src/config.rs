//! `minimerge.toml` configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minimerge_schema::{PackageName, VariantTag};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::paths;

/// Where prebuilt packages are looked up when binaries are enabled.
pub const DEFAULT_BINARIES_URL: &str = "http://distfiles.minitage.org/public/externals/minitage/packages";

/// `${name}` substitutions applied to minibuild values.
pub type Variables = BTreeMap<String, String>;

/// Errors raised while locating or reading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly named file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but cannot be read.
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        /// Configuration file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Config`].
    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        /// Configuration file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the installation tree.
    pub prefix: PathBuf,
    /// Extra minilay directories, searched after `<prefix>/minilays/*`.
    pub minilays: Vec<PathBuf>,
    /// Minilays shipped with minitage, searched last.
    pub default_minilays: Vec<String>,
    /// Never touch the network.
    pub offline: bool,
    /// Run makers in debug mode.
    pub debug: bool,
    /// `${name}` placeholders available to minibuilds.
    pub variables: Variables,
    /// Build-variant vocabulary.
    pub variants: VariantConfig,
    /// Per install-method settings, e.g. `[makers.buildout]`.
    pub makers: BTreeMap<String, MakerConfig>,
    /// Executable overrides per fetch method, e.g. `git = "/usr/bin/git"`.
    pub fetchers: BTreeMap<String, PathBuf>,
    /// Base urls of prebuilt package archives, tried in order.
    pub binaries_urls: Vec<String>,
    /// Platform segment of binary urls, the running OS when unset.
    pub binaries_platform: Option<String>,
    /// Architecture segment of binary urls, `32` or `64`.
    pub binaries_arch: Option<String>,
    /// The file this configuration was read from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: paths::default_prefix(),
            minilays: Vec::new(),
            default_minilays: ["dependencies", "eggs", "misc", "meta"]
                .into_iter()
                .map(String::from)
                .collect(),
            offline: false,
            debug: false,
            variables: Variables::new(),
            variants: VariantConfig::default(),
            makers: BTreeMap::new(),
            fetchers: BTreeMap::new(),
            binaries_urls: vec![DEFAULT_BINARIES_URL.to_string()],
            binaries_platform: None,
            binaries_arch: None,
            source: None,
        }
    }
}

/// Build-variant vocabulary.
///
/// With the defaults, `python-2.6` is the runtime for variant `2.6`,
/// `meta-python` is the selector package and every package of category
/// `eggs` is built once per selected variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantConfig {
    /// Known variants, oldest first.
    pub known: Vec<VariantTag>,
    /// Prefix turning a variant tag into its runtime package name.
    pub runtime_prefix: String,
    /// Package whose dependencies are not variant choices.
    pub selector: PackageName,
    /// Category of variant-consuming packages.
    pub consumer_category: String,
    /// Category runtimes are installed into.
    pub runtime_category: String,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            known: ["2.4", "2.5", "2.6"].into_iter().map(VariantTag::from).collect(),
            runtime_prefix: "python-".to_string(),
            selector: PackageName::new("meta-python"),
            consumer_category: "eggs".to_string(),
            runtime_category: "dependencies".to_string(),
        }
    }
}

/// Settings of one maker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakerConfig {
    /// Extra arguments appended to every maker invocation.
    pub args: Vec<String>,
    /// Interpreter used to bootstrap, when the maker needs one.
    pub python: Option<PathBuf>,
}

impl Config {
    /// Locate and load the configuration.
    ///
    /// `explicit` (the `--config` flag or `MINIMERGE_CONFIG`) must exist.
    /// Otherwise `~/.minimerge.toml` then `<prefix>/etc/minimerge.toml` are
    /// tried, and the defaults are used when neither exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit file is missing or a found
    /// file cannot be read or parsed.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load(path);
        }

        let candidates = paths::user_config_path()
            .into_iter()
            .chain(std::iter::once(paths::prefix_config_path(&paths::default_prefix())));
        for candidate in candidates {
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load the configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.source = Some(path.to_path_buf());
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Configuration rooted at `prefix`, everything else defaulted.
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Settings of the maker registered for `method`.
    pub fn maker(&self, method: &str) -> MakerConfig {
        self.makers.get(method).cloned().unwrap_or_default()
    }

    /// Candidate prebuilt archives of `name`:
    /// `<url>/<platform>/<arch>/<name>-binary.tar.gz` for every binary url.
    pub fn binary_urls(&self, name: &PackageName) -> Vec<String> {
        let platform = self
            .binaries_platform
            .as_deref()
            .unwrap_or(std::env::consts::OS);
        let arch = match self.binaries_arch.as_deref() {
            Some(arch @ ("32" | "64")) => arch,
            _ if cfg!(target_pointer_width = "64") => "64",
            _ => "32",
        };
        self.binaries_urls
            .iter()
            .map(|url| {
                format!(
                    "{}/{platform}/{arch}/{name}-binary.tar.gz",
                    url.trim_end_matches('/')
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minimerge.toml");
        std::fs::write(
            &path,
            r#"
prefix = "/opt/minitage"
minilays = ["/home/me/minilay"]
offline = true

[variables]
mirror = "http://distfiles.example.org"

[variants]
known = ["2.5", "2.6"]

[makers.buildout]
args = ["-t", "30"]

[fetchers]
git = "/usr/local/bin/git"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/opt/minitage"));
        assert_eq!(config.minilays, vec![PathBuf::from("/home/me/minilay")]);
        assert!(config.offline);
        assert_eq!(config.variables["mirror"], "http://distfiles.example.org");
        assert_eq!(config.variants.known, vec![VariantTag::from("2.5"), VariantTag::from("2.6")]);
        // Unset keys of a partial table keep their defaults.
        assert_eq!(config.variants.runtime_prefix, "python-");
        assert_eq!(config.maker("buildout").args, vec!["-t", "30"]);
        assert!(config.maker("other").args.is_empty());
        assert_eq!(config.fetchers["git"], PathBuf::from("/usr/local/bin/git"));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.default_minilays, Config::default().default_minilays);
    }

    #[test]
    fn test_binary_urls() {
        let config = Config {
            binaries_urls: vec!["http://a.org/pkgs/".to_string(), "http://b.org".to_string()],
            binaries_platform: Some("linux".to_string()),
            binaries_arch: Some("32".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.binary_urls(&PackageName::new("zlib-1.2")),
            vec![
                "http://a.org/pkgs/linux/32/zlib-1.2-binary.tar.gz",
                "http://b.org/linux/32/zlib-1.2-binary.tar.gz",
            ]
        );

        let defaults = Config::default().binary_urls(&PackageName::new("zlib-1.2"));
        assert_eq!(defaults.len(), 1);
        assert!(defaults[0].starts_with(DEFAULT_BINARIES_URL));
        assert!(defaults[0].contains(std::env::consts::OS));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Config::locate(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "prefix = [").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
