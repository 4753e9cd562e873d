use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{FetchError, FetchOptions, Fetcher};

/// Version control systems shipped as fetchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scm {
    /// `git`
    Git,
    /// `hg`
    Mercurial,
    /// `svn`
    Subversion,
    /// `bzr`
    Bazaar,
}

impl Scm {
    /// The `src_type` naming this system.
    pub fn src_type(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Mercurial => "hg",
            Self::Subversion => "svn",
            Self::Bazaar => "bzr",
        }
    }

    /// Executable name.
    pub fn command(self) -> &'static str {
        self.src_type()
    }

    /// Directory marking a working copy.
    pub fn metadata_dir(self) -> &'static str {
        match self {
            Self::Git => ".git",
            Self::Mercurial => ".hg",
            Self::Subversion => ".svn",
            Self::Bazaar => ".bzr",
        }
    }
}

/// A fetcher shelling out to a version control tool.
#[derive(Debug, Clone)]
pub struct ScmFetcher {
    scm: Scm,
    executable: Option<PathBuf>,
    search_path: Option<OsString>,
}

enum Phase {
    Fetch,
    Update,
}

impl ScmFetcher {
    /// A fetcher for `scm`, using `executable` when given instead of
    /// searching for the tool.
    pub fn new(scm: Scm, executable: Option<PathBuf>) -> Self {
        Self {
            scm,
            executable,
            search_path: None,
        }
    }

    /// Search the tool in `search_path` instead of `PATH`.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    fn executable(&self) -> Result<PathBuf, FetchError> {
        if let Some(path) = &self.executable {
            return Ok(path.clone());
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let found = match &self.search_path {
            Some(search) => which::which_in(self.scm.command(), Some(search), cwd),
            None => which::which(self.scm.command()),
        };
        found.map_err(|_| FetchError::NotInPath(self.scm.command().to_string()))
    }

    /// Run the tool with `args`, returning its standard output.
    fn run(&self, args: &[&OsStr], cwd: Option<&Path>) -> Result<String, String> {
        let exe = self.executable().map_err(|e| e.to_string())?;
        let mut cmd = Command::new(&exe);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!("Running {} {:?}", exe.display(), args);
        let output = cmd
            .output()
            .map_err(|e| format!("cannot run {}: {e}", exe.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", self.scm.command(), output.status, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_for(
        &self,
        phase: &Phase,
        dest: &Path,
        uri: &str,
        args: &[&OsStr],
        cwd: Option<&Path>,
    ) -> Result<String, FetchError> {
        self.run(args, cwd).map_err(|reason| match phase {
            Phase::Fetch => FetchError::Fetch {
                uri: uri.to_string(),
                dest: dest.to_path_buf(),
                reason,
            },
            Phase::Update => FetchError::Update {
                uri: uri.to_string(),
                dest: dest.to_path_buf(),
                reason,
            },
        })
    }
}

fn os<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<&'a OsStr> {
    values.into_iter().map(OsStr::new).collect()
}

impl Fetcher for ScmFetcher {
    fn name(&self) -> &str {
        self.scm.src_type()
    }

    fn fetch(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let extra = opts.args.iter().map(String::as_str);
        let rev = opts.revision.as_deref();
        let dest_os = dest.as_os_str();
        let phase = Phase::Fetch;

        match self.scm {
            Scm::Git => {
                let mut args = os(["clone"].into_iter().chain(extra).chain([uri]));
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
                if let Some(rev) = rev {
                    self.run_for(&phase, dest, uri, &os(["checkout", rev]), Some(dest))?;
                }
            }
            Scm::Mercurial => {
                let mut args = os(["clone"].into_iter().chain(extra).chain([uri]));
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
                if let Some(rev) = rev {
                    let mut up = os(["up", "-r", rev, "-R"]);
                    up.push(dest_os);
                    self.run_for(&phase, dest, uri, &up, None)?;
                }
            }
            Scm::Subversion => {
                let mut args = os(["co"].into_iter().chain(extra));
                if let Some(rev) = rev {
                    args.extend(os(["-r", rev]));
                }
                args.push(OsStr::new(uri));
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
            }
            Scm::Bazaar => {
                let mut args = os(["checkout"].into_iter().chain(extra));
                if let Some(rev) = rev {
                    args.extend(os(["-r", rev]));
                }
                args.push(OsStr::new(uri));
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
            }
        }
        Ok(())
    }

    fn update(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError> {
        let extra = opts.args.iter().map(String::as_str);
        let rev = opts.revision.as_deref();
        let dest_os = dest.as_os_str();
        let phase = Phase::Update;

        match self.scm {
            Scm::Git => {
                let args = os(["pull"].into_iter().chain(extra).chain([uri]));
                self.run_for(&phase, dest, uri, &args, Some(dest))?;
                if let Some(rev) = rev {
                    self.run_for(&phase, dest, uri, &os(["checkout", rev]), Some(dest))?;
                }
            }
            Scm::Mercurial => {
                let mut pull = os(["pull", "-f", uri, "-R"]);
                pull.push(dest_os);
                self.run_for(&phase, dest, uri, &pull, None)?;
                let mut up = os(["up"]);
                if let Some(rev) = rev {
                    up.extend(os(["-r", rev]));
                }
                up.push(OsStr::new("-R"));
                up.push(dest_os);
                self.run_for(&phase, dest, uri, &up, None)?;
            }
            Scm::Subversion => {
                let mut args = os(["up"].into_iter().chain(extra));
                if let Some(rev) = rev {
                    args.extend(os(["-r", rev]));
                }
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
            }
            Scm::Bazaar => {
                let mut args = os(["pull"].into_iter().chain(extra));
                if let Some(rev) = rev {
                    args.extend(os(["-r", rev]));
                }
                args.extend(os([uri, "-d"]));
                args.push(dest_os);
                self.run_for(&phase, dest, uri, &args, None)?;
            }
        }
        Ok(())
    }

    fn recorded_uri(&self, dest: &Path) -> Result<Option<String>, FetchError> {
        if !dest.join(self.scm.metadata_dir()).exists() {
            return Ok(None);
        }
        let dest_os = dest.as_os_str();
        let output = match self.scm {
            Scm::Git => self.run(&os(["config", "--get", "remote.origin.url"]), Some(dest)),
            Scm::Mercurial => {
                let mut args = os(["paths", "default", "-R"]);
                args.push(dest_os);
                self.run(&args, None)
            }
            Scm::Subversion => {
                let mut args = os(["info", "--show-item", "url"]);
                args.push(dest_os);
                self.run(&args, None)
            }
            Scm::Bazaar => {
                let mut args = os(["info"]);
                args.push(dest_os);
                self.run(&args, None).map(|info| parse_bzr_info(&info))
            }
        };
        // A working copy without a recorded remote is not an error.
        Ok(output.ok().map(|o| o.trim().to_string()).filter(|o| !o.is_empty()))
    }

    fn metadata_dir(&self) -> Option<&str> {
        Some(self.scm.metadata_dir())
    }
}

/// Pick the branch location out of `bzr info` output.
fn parse_bzr_info(info: &str) -> String {
    for key in ["checkout of branch:", "parent branch:"] {
        if let Some(line) = info.lines().find(|l| l.trim_start().starts_with(key)) {
            if let Some((_, value)) = line.split_once(':') {
                return value.trim().to_string();
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scm_names() {
        assert_eq!(Scm::Mercurial.src_type(), "hg");
        assert_eq!(Scm::Subversion.metadata_dir(), ".svn");
        assert_eq!(ScmFetcher::new(Scm::Git, None).name(), "git");
    }

    #[test]
    fn test_missing_tool() {
        let dir = tempdir().unwrap();
        let fetcher = ScmFetcher::new(Scm::Bazaar, None).with_search_path(Some(dir.path().as_os_str().to_owned()));
        let err = fetcher
            .fetch(&dir.path().join("dest"), "lp:foo", &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, FetchError::Fetch { .. }));
        assert!(err.to_string().contains("'bzr' was not found"));
    }

    #[test]
    fn test_no_working_copy_means_unchanged_uri() {
        let dir = tempdir().unwrap();
        let fetcher = ScmFetcher::new(Scm::Git, None);
        assert_eq!(fetcher.recorded_uri(dir.path()).unwrap(), None);
        assert!(!fetcher.has_uri_changed(dir.path(), "https://example.org/x").unwrap());
    }

    #[test]
    fn test_parse_bzr_info() {
        let info = "Checkout (format: 2a)\nLocation:\n       checkout root: .\n  checkout of branch: bzr+ssh://host/repo/\n";
        assert_eq!(parse_bzr_info(info), "bzr+ssh://host/repo/");
        assert_eq!(parse_bzr_info("Standalone tree\n"), "");
    }
}
