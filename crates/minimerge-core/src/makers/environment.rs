//! Build environment derived from a package's dependencies.
//!
//! For every dependency install directory (and its `parts/part` layout,
//! where buildout-based packages install to) the following are collected:
//!
//! | Variable | Value |
//! |---|---|
//! | `PATH` | each `bin/`, then the inherited `PATH` |
//! | `LD_LIBRARY_PATH` | each `lib/` |
//! | `CFLAGS` | `-I` for each `include/` |
//! | `LDFLAGS` | `-L` and `-Wl,-rpath` for each `lib/` |
//! | `PKG_CONFIG_PATH` | each `lib/pkgconfig` |
//! | `MAKEOPTS` | `-j<logical cpus>` |
//!
//! The value is immutable and only ever applied to child processes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Environment variables handed to makers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl BuildEnvironment {
    /// Environment for building against `deps`, inheriting `base_path` as
    /// the tail of `PATH`.
    pub fn for_dependencies<'a>(deps: impl IntoIterator<Item = &'a Path>, base_path: Option<&str>) -> Self {
        let mut bins = Vec::new();
        let mut libs = Vec::new();
        let mut cflags = Vec::new();
        let mut ldflags = Vec::new();
        let mut pkg_config = Vec::new();

        for dep in deps {
            for root in [dep.to_path_buf(), dep.join("parts").join("part")] {
                let bin = root.join("bin");
                if bin.is_dir() {
                    push_unique(&mut bins, bin.display().to_string());
                }
                let include = root.join("include");
                if include.is_dir() {
                    push_unique(&mut cflags, format!("-I{}", include.display()));
                }
                let lib = root.join("lib");
                if lib.is_dir() {
                    let lib = lib.display().to_string();
                    push_unique(&mut ldflags, format!("-L{lib}"));
                    push_unique(&mut ldflags, format!("-Wl,-rpath,{lib}"));
                    push_unique(&mut libs, lib);
                }
                let pc = root.join("lib").join("pkgconfig");
                if pc.is_dir() {
                    push_unique(&mut pkg_config, pc.display().to_string());
                }
            }
        }

        if let Some(base) = base_path.filter(|b| !b.is_empty()) {
            bins.push(base.to_string());
        }

        let mut vars = BTreeMap::new();
        let mut set = |key: &str, values: Vec<String>, sep: &str| {
            if !values.is_empty() {
                vars.insert(key.to_string(), values.join(sep));
            }
        };
        set("PATH", bins, ":");
        set("LD_LIBRARY_PATH", libs, ":");
        set("CFLAGS", cflags, " ");
        set("LDFLAGS", ldflags, " ");
        set("PKG_CONFIG_PATH", pkg_config, ":");
        vars.insert("MAKEOPTS".to_string(), format!("-j{}", num_cpus::get()));

        Self { vars }
    }

    /// Value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Every variable, sorted by name.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Shell script exporting the environment.
    pub fn to_shell(&self) -> String {
        let mut out = String::from("# generated by minimerge\n");
        for (key, value) in self.vars() {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            let _ = writeln!(out, "export {key}=\"{escaped}\"");
        }
        out
    }

    /// Write [`BuildEnvironment::to_shell`] to `path`, creating parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_env_file(&self, path: &Path) -> std::io::Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_shell())?;
        Ok(path.to_path_buf())
    }
}
