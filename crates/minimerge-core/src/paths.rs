//! Filesystem layout of a minitage prefix.
//!
//! ```text
//! <prefix>/
//!   minilays/<minilay>/<minibuild>
//!   <category>/<name>/                         install directory
//!   <category>/<name>/.minitage/minibuild      snapshot of the installed minibuild
//!   <category>/<name>/.minitage/markers/<m>    completion markers
//!   <category>/<name>/sys/share/minitage/minitage.env
//!   <category>/minitage-checkout-tmp/<name>    scratch checkout for relocated sources
//! ```

use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Environment variable overriding the prefix.
pub const PREFIX_ENV: &str = "MINITAGE_PREFIX";
/// Environment variable listing extra minilay directories, whitespace separated.
pub const MINILAYS_ENV: &str = "MINILAYS";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MINIMERGE_CONFIG";

const HISTORY_DIR: &str = ".minitage";
const MARKERS_DIR: &str = "markers";
const SNAPSHOT_FILE: &str = "minibuild";
const CONFIG_FILE: &str = "minimerge.toml";

/// The prefix used when neither the configuration nor `MINITAGE_PREFIX`
/// names one: `~/minitage`.
pub fn default_prefix() -> PathBuf {
    if let Ok(val) = std::env::var(PREFIX_ENV) {
        return PathBuf::from(val);
    }
    home_dir().map_or_else(|| PathBuf::from("minitage"), |h| h.join("minitage"))
}

/// Per-user configuration file: `~/.minimerge.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join(format!(".{CONFIG_FILE}")))
}

/// Prefix-wide configuration file: `<prefix>/etc/minimerge.toml`.
pub fn prefix_config_path(prefix: &Path) -> PathBuf {
    prefix.join("etc").join(CONFIG_FILE)
}

/// `<prefix>/minilays`
pub fn minilays_dir(prefix: &Path) -> PathBuf {
    prefix.join("minilays")
}

/// `<install>/.minitage`
pub fn history_dir(install: &Path) -> PathBuf {
    install.join(HISTORY_DIR)
}

/// `<install>/.minitage/markers`
pub fn markers_dir(install: &Path) -> PathBuf {
    history_dir(install).join(MARKERS_DIR)
}

/// `<install>/.minitage/minibuild`
pub fn snapshot_path(install: &Path) -> PathBuf {
    history_dir(install).join(SNAPSHOT_FILE)
}

/// `<install>/sys/share/minitage/minitage.env`
pub fn env_file_path(install: &Path) -> PathBuf {
    install.join("sys").join("share").join("minitage").join("minitage.env")
}

/// `<prefix>/<category>/minitage-checkout-tmp/<name>`
pub fn checkout_tmp_path(prefix: &Path, category: &str, name: &str) -> PathBuf {
    prefix.join(category).join("minitage-checkout-tmp").join(name)
}

/// Extract the filename from a URL, ignoring any query string.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let install = Path::new("/opt/mt/dependencies/zlib-1.2");
        assert_eq!(
            markers_dir(install),
            PathBuf::from("/opt/mt/dependencies/zlib-1.2/.minitage/markers")
        );
        assert_eq!(
            snapshot_path(install),
            PathBuf::from("/opt/mt/dependencies/zlib-1.2/.minitage/minibuild")
        );
        assert_eq!(
            env_file_path(install),
            PathBuf::from("/opt/mt/dependencies/zlib-1.2/sys/share/minitage/minitage.env")
        );
        assert_eq!(
            checkout_tmp_path(Path::new("/opt/mt"), "eggs", "foo"),
            PathBuf::from("/opt/mt/eggs/minitage-checkout-tmp/foo")
        );
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("http://x.org/a/zlib-1.2.tar.gz"), "zlib-1.2.tar.gz");
        assert_eq!(filename_from_url("http://x.org/a/b.zip?dl=1"), "b.zip");
        assert_eq!(filename_from_url("file:///tmp/src/"), "src");
    }
}
