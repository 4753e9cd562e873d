use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::{MakeError, MakeOptions, Maker};
use crate::config::MakerConfig;
use crate::minibuild::Minibuild;

const DEFAULT_CONFIG: &str = "buildout.cfg";
const INSTALLED_CFG: &str = ".installed.cfg";

/// Builds packages with zc.buildout.
///
/// The package directory is bootstrapped (`bootstrap.py` when shipped,
/// `buildout bootstrap` otherwise), then `bin/buildout -c <config>` runs,
/// once per part when parts are known.
#[derive(Debug, Clone, Default)]
pub struct BuildoutMaker {
    config: MakerConfig,
}

impl BuildoutMaker {
    /// A maker using the `[makers.buildout]` settings.
    pub fn new(config: MakerConfig) -> Self {
        Self { config }
    }

    fn config_file(minibuild: &Minibuild) -> &str {
        minibuild.option("buildout_config").unwrap_or(DEFAULT_CONFIG)
    }

    /// Parts to install: `site-packages-<variant>` for variant consumers,
    /// `buildout_parts` otherwise. Empty means every part.
    fn parts(opts: &MakeOptions) -> Vec<String> {
        if opts.consumer && !opts.variants.is_empty() {
            return opts
                .variants
                .iter()
                .map(|v| format!("site-packages-{v}"))
                .collect();
        }
        opts.minibuild
            .option("buildout_parts")
            .map(|p| p.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn flags(opts: &MakeOptions, path: &Path) -> Vec<String> {
        let mut argv = Vec::new();
        if opts.verbose {
            argv.push("-vvvvvvv".to_string());
        }
        if opts.newest {
            argv.push("-n".to_string());
        } else if !path.join(INSTALLED_CFG).exists() {
            argv.push("-N".to_string());
        }
        if opts.offline {
            argv.push("-o".to_string());
        }
        if opts.debug {
            argv.push("-D".to_string());
        }
        argv
    }

    fn command(&self, program: impl AsRef<std::ffi::OsStr>, path: &Path, opts: &MakeOptions) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(path).envs(opts.env.vars());
        cmd
    }

    fn bootstrap(&self, path: &Path, cfg: &str, opts: &MakeOptions) -> Result<(), String> {
        let mut cmd = if path.join("bootstrap.py").is_file() {
            let python = self
                .config
                .python
                .clone()
                .unwrap_or_else(|| PathBuf::from("python"));
            let mut cmd = self.command(python, path, opts);
            cmd.arg("bootstrap.py");
            cmd
        } else {
            let buildout = which::which("buildout").map_err(|_| "'buildout' was not found in PATH".to_string())?;
            let mut cmd = self.command(buildout, path, opts);
            cmd.arg("bootstrap");
            cmd
        };
        cmd.args(["-c", cfg]);
        run(cmd)
    }

    fn build(&self, path: &Path, opts: &MakeOptions) -> Result<(), String> {
        let cfg = Self::config_file(&opts.minibuild);
        if !path.join(cfg).is_file() {
            return Err(format!("{cfg} not found"));
        }

        if !opts.newest && !opts.consumer && path.join(INSTALLED_CFG).exists() {
            info!(
                "{} is already built and newest mode is off, not running buildout (use -u to force)",
                path.display()
            );
            return Ok(());
        }

        info!("Running buildout in {} ({cfg})", path.display());
        self.bootstrap(path, cfg, opts)?;

        let flags = Self::flags(opts, path);
        let parts = Self::parts(opts);
        let buildout = path.join("bin").join("buildout");
        let invocations: Vec<Vec<String>> = if parts.is_empty() {
            vec![Vec::new()]
        } else {
            parts
                .into_iter()
                .map(|part| vec!["install".to_string(), part])
                .collect()
        };
        for tail in invocations {
            let mut cmd = self.command(&buildout, path, opts);
            cmd.args(["-c", cfg])
                .args(&flags)
                .args(&self.config.args)
                .args(&tail);
            run(cmd)?;
        }
        Ok(())
    }
}

fn run(mut cmd: Command) -> Result<(), String> {
    debug!("Running {cmd:?}");
    let output = cmd
        .output()
        .map_err(|e| format!("cannot run {}: {e}", cmd.get_program().to_string_lossy()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    Err(format!(
        "{} exited with {}: {}",
        cmd.get_program().to_string_lossy(),
        output.status,
        detail.trim()
    ))
}

impl Maker for BuildoutMaker {
    fn name(&self) -> &str {
        "buildout"
    }

    fn install(&self, path: &Path, opts: &MakeOptions) -> Result<(), MakeError> {
        self.build(path, opts).map_err(|reason| MakeError::Make {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn reinstall(&self, path: &Path, opts: &MakeOptions) -> Result<(), MakeError> {
        let installed = path.join(INSTALLED_CFG);
        if installed.exists() {
            std::fs::remove_file(&installed)?;
        }
        self.build(path, opts).map_err(|reason| MakeError::Reinstall {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn build_descriptor(&self, minibuild: &Minibuild) -> Option<PathBuf> {
        Some(PathBuf::from(Self::config_file(minibuild)))
    }
}
