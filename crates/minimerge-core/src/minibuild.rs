//! Minibuild descriptors: one INI file per package inside a minilay.
//!
//! ```ini
//! [minibuild]
//! dependencies = zlib-1.2 openssl-0.9
//! dependencies-darwin = libiconv-1.12
//! install_method = buildout
//! src_type = hg
//! src_uri = https://hg.example.org/libxml2-2.7
//! category = dependencies
//! revision = 3
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use minimerge_schema::{PackageName, is_valid_minibuild_name};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::Variables;
use crate::ini::{self, IniDocument, IniError, Section};

/// Section holding the descriptor keys.
pub const SECTION: &str = "minibuild";

/// Fetch methods a `src_type` may name, one per shipped fetcher.
pub const FETCH_METHODS: &[&str] = &["svn", "hg", "static", "bzr", "git"];

/// Install methods accepted without `install-method-bypass`.
pub const INSTALL_METHODS: &[&str] = &["buildout"];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("word pattern is valid"));
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("variable pattern is valid"));

/// Errors raised while reading or writing a minibuild.
#[derive(Error, Debug)]
pub enum MinibuildError {
    /// The file name is not a valid package name.
    #[error("Invalid minibuild name: '{0}'")]
    InvalidName(String),

    /// The descriptor cannot be read or written.
    #[error("Cannot access minibuild {path}: {source}")]
    Io {
        /// Descriptor file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The descriptor is not a valid key/value file.
    #[error("Invalid minibuild file {path}: {source}")]
    Format {
        /// Descriptor file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: IniError,
    },

    /// No `[minibuild]` section.
    #[error("Minibuild {0} has no [minibuild] section")]
    MissingSection(PathBuf),

    /// `src_uri` without `src_type`.
    #[error("Minibuild {0} has a src_uri but no src_type")]
    MissingFetchMethod(PathBuf),

    /// `src_type` names no shipped fetcher.
    #[error("Minibuild {path}: invalid src_type '{method}'")]
    InvalidFetchMethod {
        /// The rejected `src_type`.
        method: String,
        /// Descriptor file.
        path: PathBuf,
    },

    /// `src_uri` without `category`.
    #[error("Minibuild {0} has a src_uri but no category")]
    MissingCategory(PathBuf),

    /// `category` is not a single word.
    #[error("Minibuild {path}: invalid category '{category}'")]
    InvalidCategory {
        /// The rejected category.
        category: String,
        /// Descriptor file.
        path: PathBuf,
    },

    /// `install_method` names no shipped maker.
    #[error("Minibuild {path}: invalid install_method '{method}'")]
    InvalidInstallMethod {
        /// The rejected `install_method`.
        method: String,
        /// Descriptor file.
        path: PathBuf,
    },

    /// Nothing to install and nothing to depend on.
    #[error("Minibuild {0} has neither an install_method nor dependencies")]
    Empty(PathBuf),
}

/// Where and how to obtain a package's sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    /// `src_uri`
    pub uri: String,
    /// `src_type`, the name of the fetcher to use.
    pub fetch_method: String,
    /// `src_opts`, passed to the fetcher.
    pub options: String,
    /// `src_md5`, checked by the static fetcher.
    pub md5: Option<String>,
}

/// A parsed, validated minibuild. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Minibuild {
    /// File name of the descriptor.
    pub name: PackageName,
    /// Location of the descriptor.
    pub path: PathBuf,
    /// Install category, i.e. the directory under the prefix.
    pub category: Option<String>,
    /// Dependencies after OS-specific overrides.
    pub dependencies: Vec<PackageName>,
    /// Dependencies as written in the `dependencies` key.
    pub raw_dependencies: Vec<PackageName>,
    /// Descriptor revision, bumped to force rebuilds.
    pub revision: u32,
    /// Source location, if the package has sources.
    pub source: Option<SourceLocator>,
    /// Maker to build the package with.
    pub install_method: Option<String>,
    /// Project home page.
    pub url: String,
    /// Free-form description.
    pub description: String,
    section: Section,
    text: String,
}

/// Changes applied by [`Minibuild::write`]. `None` leaves a key untouched.
#[derive(Debug, Clone, Default)]
pub struct MinibuildChanges {
    /// `dependencies`
    pub dependencies: Option<Vec<PackageName>>,
    /// `src_uri`
    pub src_uri: Option<String>,
    /// `src_type`
    pub src_type: Option<String>,
    /// `src_opts`
    pub src_opts: Option<String>,
    /// `src_md5`
    pub src_md5: Option<String>,
    /// `install_method`
    pub install_method: Option<String>,
    /// `category`
    pub category: Option<String>,
    /// `url`
    pub url: Option<String>,
    /// `description`
    pub description: Option<String>,
    /// Explicit revision; the current revision plus one when `None`.
    pub revision: Option<u32>,
}

/// Name of the running OS as used in `dependencies-<os>` keys.
pub fn current_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win",
        other => other,
    }
}

impl Minibuild {
    /// Load the descriptor at `path`, named after its file name.
    ///
    /// # Errors
    ///
    /// Returns [`MinibuildError`] if the name is invalid, the file cannot be
    /// read, or its content does not describe a valid minibuild.
    pub fn load(path: &Path, variables: &Variables) -> Result<Self, MinibuildError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::load_as(path, &name, variables)
    }

    /// Load the descriptor at `path` under an explicit `name`, as done for
    /// install snapshots.
    ///
    /// # Errors
    ///
    /// See [`Minibuild::load`].
    pub fn load_as(path: &Path, name: &str, variables: &Variables) -> Result<Self, MinibuildError> {
        if !is_valid_minibuild_name(name) {
            return Err(MinibuildError::InvalidName(name.to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| MinibuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_text(name, path, text, variables, current_os())
    }

    /// Parse `content` as the minibuild `name` without touching the disk.
    ///
    /// # Errors
    ///
    /// See [`Minibuild::load`].
    pub fn parse(name: &str, content: &str, variables: &Variables) -> Result<Self, MinibuildError> {
        Self::parse_for_os(name, content, variables, current_os())
    }

    pub(crate) fn parse_for_os(
        name: &str,
        content: &str,
        variables: &Variables,
        os: &str,
    ) -> Result<Self, MinibuildError> {
        if !is_valid_minibuild_name(name) {
            return Err(MinibuildError::InvalidName(name.to_string()));
        }
        Self::from_text(name, Path::new(name), content.to_string(), variables, os)
    }

    fn from_text(
        name: &str,
        path: &Path,
        text: String,
        variables: &Variables,
        os: &str,
    ) -> Result<Self, MinibuildError> {
        let doc = IniDocument::parse(&text).map_err(|source| MinibuildError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let mut section = doc
            .section(SECTION)
            .ok_or_else(|| MinibuildError::MissingSection(path.to_path_buf()))?;
        for value in section.values_mut() {
            *value = substitute(value, variables);
        }

        let get = |key: &str| {
            section
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let raw_dependencies = split_names(get("dependencies").as_deref());
        let dependencies = if let Some(replace) = get(&format!("dependencies-{os}-replace")) {
            split_names(Some(&replace))
        } else {
            let mut deps: Vec<PackageName> = split_names(get(&format!("dependencies-{os}")).as_deref())
                .into_iter()
                .filter(|d| !raw_dependencies.contains(d))
                .collect();
            deps.extend(raw_dependencies.iter().cloned());
            deps
        };

        let revision = get("revision")
            .and_then(|r| r.parse::<u32>().ok())
            .unwrap_or(0);

        let category = get("category");
        let source = match get("src_uri") {
            Some(uri) => {
                let method = get("src_type")
                    .ok_or_else(|| MinibuildError::MissingFetchMethod(path.to_path_buf()))?;
                if !FETCH_METHODS.contains(&method.as_str()) {
                    return Err(MinibuildError::InvalidFetchMethod {
                        method,
                        path: path.to_path_buf(),
                    });
                }
                let Some(category) = &category else {
                    return Err(MinibuildError::MissingCategory(path.to_path_buf()));
                };
                if !WORD_RE.is_match(category) && get("category-bypass").is_none() {
                    return Err(MinibuildError::InvalidCategory {
                        category: category.clone(),
                        path: path.to_path_buf(),
                    });
                }
                Some(SourceLocator {
                    uri,
                    fetch_method: method,
                    options: get("src_opts").unwrap_or_default(),
                    md5: get("src_md5"),
                })
            }
            None => None,
        };

        let install_method = get("install_method");
        if let Some(method) = &install_method {
            let bypass = get("install-method-bypass").is_some() && WORD_RE.is_match(method);
            if !INSTALL_METHODS.contains(&method.as_str()) && !bypass {
                return Err(MinibuildError::InvalidInstallMethod {
                    method: method.clone(),
                    path: path.to_path_buf(),
                });
            }
        }

        if install_method.is_none() && dependencies.is_empty() {
            return Err(MinibuildError::Empty(path.to_path_buf()));
        }

        debug!("Loaded minibuild {name} (revision {revision})");
        Ok(Self {
            name: PackageName::new(name),
            path: path.to_path_buf(),
            category,
            dependencies,
            raw_dependencies,
            revision,
            source,
            install_method,
            url: get("url").unwrap_or_default(),
            description: get("description").unwrap_or_default(),
            section,
            text,
        })
    }

    /// Whether this is a virtual `meta-` package.
    pub fn is_meta(&self) -> bool {
        self.name.is_meta()
    }

    /// Raw value of any `[minibuild]` key, after variable substitution.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.section
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// The descriptor text exactly as it was read.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Persist `changes` to the descriptor file and return the reloaded
    /// minibuild.
    ///
    /// The previous file is kept as `<file>.sav` and the revision is bumped
    /// unless `changes` sets one.
    ///
    /// # Errors
    ///
    /// Returns [`MinibuildError`] if the file cannot be backed up, written
    /// or reloaded.
    pub fn write(&self, changes: &MinibuildChanges, variables: &Variables) -> Result<Self, MinibuildError> {
        let io_err = |source| MinibuildError::Io {
            path: self.path.clone(),
            source,
        };
        let current = std::fs::read_to_string(&self.path).map_err(io_err)?;

        let mut backup = self.path.clone().into_os_string();
        backup.push(".sav");
        std::fs::write(&backup, &current).map_err(io_err)?;

        let revision = changes.revision.unwrap_or(self.revision + 1).to_string();
        let dependencies = changes.dependencies.as_ref().map(|deps| {
            deps.iter()
                .map(PackageName::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        });
        let updates: [(&str, Option<&str>); 10] = [
            ("dependencies", dependencies.as_deref()),
            ("src_uri", changes.src_uri.as_deref()),
            ("src_type", changes.src_type.as_deref()),
            ("src_opts", changes.src_opts.as_deref()),
            ("src_md5", changes.src_md5.as_deref()),
            ("install_method", changes.install_method.as_deref()),
            ("category", changes.category.as_deref()),
            ("url", changes.url.as_deref()),
            ("description", changes.description.as_deref()),
            ("revision", Some(&revision)),
        ];

        let mut text = current;
        for (key, value) in updates {
            if let Some(value) = value {
                text = ini::set_value(&text, SECTION, key, value);
            }
        }
        std::fs::write(&self.path, text).map_err(io_err)?;

        Self::load_as(&self.path, &self.name, variables)
    }
}

fn split_names(value: Option<&str>) -> Vec<PackageName> {
    value
        .map(|v| v.split_whitespace().map(PackageName::from).collect())
        .unwrap_or_default()
}

/// Replace `${name}` placeholders, two passes so that variables may refer
/// to other variables.
fn substitute(value: &str, variables: &Variables) -> String {
    let mut current = value.to_string();
    for _ in 0..2 {
        if !current.contains("${") {
            break;
        }
        current = VARIABLE_RE
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
    }
    current
}
