//! Package names, variants, actions and markers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every virtual package: such packages only aggregate
/// dependencies and are never fetched, built or recorded.
pub const META_PREFIX: &str = "meta-";

/// The name of a minibuild, i.e. the file name inside its minilay.
///
/// Names are case-sensitive: `libxml2-2.7` and `LibXML2-2.7` are two
/// different files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a package name from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this names a virtual `meta-` package.
    pub fn is_meta(&self) -> bool {
        self.0.starts_with(META_PREFIX)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A build variant, e.g. the `2.6` in `python-2.6` or `install-2.6`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantTag(String);

impl VariantTag {
    /// Create a variant tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Return the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariantTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Top-level action requested for a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Install what is missing, upgrade what has a new revision (default).
    #[default]
    Install,
    /// Unconditionally rebuild installed packages.
    Reinstall,
    /// Remove installed packages.
    Delete,
    /// Only regenerate the environment file of each package.
    GenerateEnv,
}

impl Action {
    /// The name used on the command line and as a marker file name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Reinstall => "reinstall",
            Self::Delete => "delete",
            Self::GenerateEnv => "generate-env",
        }
    }

    /// `install` and `reinstall` are the two actions that build things.
    pub fn builds(self) -> bool {
        matches!(self, Self::Install | Self::Reinstall)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Action`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "reinstall" => Ok(Self::Reinstall),
            "delete" => Ok(Self::Delete),
            "generate-env" | "generate_env" => Ok(Self::GenerateEnv),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// A completion flag persisted under `.minitage/markers/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The sources have been fetched or updated.
    Fetch,
    /// The package has been installed.
    Install,
    /// The package has been rebuilt through the reinstall path.
    Reinstall,
    /// One variant of a variant-consuming package has been installed.
    InstallVariant(VariantTag),
}

impl Marker {
    /// Marker recorded after a successful build action.
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Reinstall => Self::Reinstall,
            _ => Self::Install,
        }
    }

    /// File name of the marker.
    pub fn file_name(&self) -> String {
        match self {
            Self::Fetch => "fetch".to_string(),
            Self::Install => "install".to_string(),
            Self::Reinstall => "reinstall".to_string(),
            Self::InstallVariant(tag) => format!("install-{tag}"),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_detection() {
        assert!(PackageName::new("meta-python").is_meta());
        assert!(!PackageName::new("python-2.6").is_meta());
        assert!(!PackageName::new("metakit-2.4").is_meta());
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert_ne!(PackageName::new("Foo"), PackageName::new("foo"));
        assert_eq!(PackageName::new("foo"), "foo");
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("delete".parse::<Action>(), Ok(Action::Delete));
        assert_eq!("generate_env".parse::<Action>(), Ok(Action::GenerateEnv));
        assert!("sync".parse::<Action>().is_err());
        assert!(Action::Reinstall.builds());
        assert!(!Action::Delete.builds());
    }

    #[test]
    fn test_marker_file_names() {
        assert_eq!(Marker::Fetch.file_name(), "fetch");
        assert_eq!(Marker::for_action(Action::Install).file_name(), "install");
        assert_eq!(Marker::for_action(Action::Reinstall).file_name(), "reinstall");
        assert_eq!(
            Marker::InstallVariant(VariantTag::new("2.6")).file_name(),
            "install-2.6"
        );
    }
}
