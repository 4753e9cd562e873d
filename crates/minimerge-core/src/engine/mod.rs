//! Lifecycle engine.
//!
//! A merge resolves the requested packages, selects build variants,
//! decides per package what has to happen (see [`PlanFlags`]) and then
//! fetches, builds and records each package in dependency order.

mod plan;
mod sync;

pub use plan::{LEGEND, Plan, PlanEntry, PlanFlags};
pub use sync::SyncReport;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use minimerge_schema::{Action, Marker, PackageName, VariantTag};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fetchers::{FetchError, FetchOptions, FetcherRegistry};
use crate::io::copy_tree;
use crate::makers::{BuildEnvironment, MakeError, MakeOptions, MakerRegistry};
use crate::minibuild::Minibuild;
use crate::minilay::{MinilayError, Minilays};
use crate::paths;
use crate::reporter::Reporter;
use crate::resolver::{self, ResolveError};
use crate::state::{StateError, StateStore};
use crate::variants::{self, SelectContext};

/// Errors that abort a merge.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The build list cannot be computed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A minilay cannot be read.
    #[error(transparent)]
    Minilay(#[from] MinilayError),

    /// Install state cannot be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// Sources of a package cannot be obtained.
    #[error("Cannot fetch {name}: {source}")]
    Fetch {
        /// Package being fetched.
        name: PackageName,
        /// Fetcher error.
        #[source]
        source: FetchError,
    },

    /// A maker failed.
    #[error("Cannot build {name}: {source}")]
    Make {
        /// Package being built.
        name: PackageName,
        /// Maker error.
        #[source]
        source: MakeError,
    },

    /// Sources are missing and the network may not be used.
    #[error("{0} has not been fetched yet and offline mode is on")]
    Offline(PackageName),

    /// Nothing was requested.
    #[error("No package to merge")]
    NoPackages,

    /// Options that cannot be combined.
    #[error("Conflicting modes: {0}")]
    ConflictingModes(String),

    /// Filesystem error outside of install state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// When sources are fetched relative to builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchOrder {
    /// Fetch each package right before building it.
    #[default]
    JustInTime,
    /// Fetch every package, then build them all.
    FetchFirst,
}

/// Knobs of a merge, mirroring the command line.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// What to do with the packages.
    pub action: Action,
    /// Update the sources of installed packages and build them again.
    pub update: bool,
    /// Run makers in newest mode.
    pub upgrade: bool,
    /// Never touch the network.
    pub offline: bool,
    /// Run makers in debug mode.
    pub debug: bool,
    /// Let makers print their output.
    pub verbose: bool,
    /// Act on the requested packages only.
    pub nodeps: bool,
    /// Drop every package before this one.
    pub jump: Option<PackageName>,
    /// Fetch sources, build nothing.
    pub fetch_only: bool,
    /// When sources are fetched relative to builds.
    pub fetch_order: FetchOrder,
    /// Drop the requested packages, keep their dependencies.
    pub only_dependencies: bool,
    /// Build variant consumers for every known variant.
    pub all_variants: bool,
    /// Compute and report the plan, do nothing.
    pub pretend: bool,
    /// Confirm the plan before running it.
    pub ask: bool,
    /// Try prebuilt archives before the sources.
    pub use_binaries: bool,
}

impl MergeOptions {
    /// Reject flag combinations that cannot be honoured together.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConflictingModes`] naming the clash.
    pub fn validate(&self) -> Result<(), EngineError> {
        let conflict = |msg: &str| Err(EngineError::ConflictingModes(msg.to_string()));
        if self.fetch_only && self.offline {
            return conflict("fetch-only and offline");
        }
        if self.fetch_only && self.action == Action::Delete {
            return conflict("fetch-only and delete");
        }
        if self.jump.is_some() && self.nodeps {
            return conflict("jump and nodeps");
        }
        Ok(())
    }
}

/// Drives merges over a set of minilays.
pub struct Engine {
    config: Config,
    minilays: Minilays,
    options: MergeOptions,
    state: StateStore,
    fetchers: FetcherRegistry,
    makers: MakerRegistry,
    reporter: Arc<dyn Reporter>,
    variants: BTreeMap<PackageName, Vec<VariantTag>>,
    binaries: HashSet<PackageName>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("prefix", &self.config.prefix)
            .field("options", &self.options)
            .field("fetchers", &self.fetchers)
            .field("makers", &self.makers)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with the shipped fetchers and makers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConflictingModes`] if `options` do not
    /// validate.
    pub fn new(
        config: Config,
        minilays: Minilays,
        options: MergeOptions,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, EngineError> {
        options.validate()?;
        let state = StateStore::new(
            config.prefix.clone(),
            config.variants.consumer_category.clone(),
            Arc::new(config.variables.clone()),
        );
        let fetchers = FetcherRegistry::with_defaults(&config);
        let makers = MakerRegistry::with_defaults(&config);
        Ok(Self {
            config,
            minilays,
            options,
            state,
            fetchers,
            makers,
            reporter,
            variants: BTreeMap::new(),
            binaries: HashSet::new(),
        })
    }

    /// Replace the fetchers and makers.
    pub fn with_collaborators(mut self, fetchers: FetcherRegistry, makers: MakerRegistry) -> Self {
        self.fetchers = fetchers;
        self.makers = makers;
        self
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options of the next merge.
    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Install state below the prefix.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The minilays minibuilds are looked up in.
    pub fn minilays_mut(&mut self) -> &mut Minilays {
        &mut self.minilays
    }

    /// Build list for `names`: every package once, dependencies first.
    ///
    /// # Errors
    ///
    /// See [`resolver::resolve_dependencies`].
    pub fn resolve_dependencies(&mut self, names: &[PackageName]) -> Result<Vec<Arc<Minibuild>>, EngineError> {
        Ok(resolver::resolve_dependencies(names, &mut self.minilays)?)
    }

    fn variants_of(&self, mb: &Minibuild) -> &[VariantTag] {
        self.variants
            .get(&mb.name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `mb` is installed, for the variants selected by the last
    /// plan when it is a variant consumer.
    ///
    /// # Errors
    ///
    /// Propagates install state read failures.
    pub fn is_installed(&self, mb: &Minibuild) -> Result<bool, EngineError> {
        Ok(self.state.is_installed(mb, self.variants_of(mb))?)
    }

    /// Known variants `mb` has been built for.
    ///
    /// # Errors
    ///
    /// Propagates install state read failures.
    pub fn installed_variants(&self, mb: &Minibuild) -> Result<Vec<VariantTag>, EngineError> {
        let mut found = Vec::new();
        for tag in &self.config.variants.known {
            if self.state.is_marked(mb, &Marker::InstallVariant(tag.clone()))? {
                found.push(tag.clone());
            }
        }
        Ok(found)
    }

    /// The sources are missing: no install directory, nothing but dotfiles
    /// in it, or no build descriptor for the maker.
    fn needs_fetch(&self, mb: &Minibuild) -> Result<bool, EngineError> {
        let Some(install) = self.state.install_path(mb) else {
            return Ok(false);
        };
        let entries = match std::fs::read_dir(&install) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let mut populated = false;
        for entry in entries {
            if !entry?.file_name().to_string_lossy().starts_with('.') {
                populated = true;
                break;
            }
        }
        if !populated {
            return Ok(true);
        }
        let descriptor = mb
            .install_method
            .as_deref()
            .and_then(|method| self.makers.get(method).ok())
            .and_then(|maker| maker.build_descriptor(mb));
        match descriptor {
            Some(descriptor) => Ok(!install.join(descriptor).try_exists()?),
            None => Ok(false),
        }
    }

    /// Decide what happens to `mb` under the current options.
    fn flags(&self, mb: &Minibuild) -> Result<PlanFlags, EngineError> {
        let variants = self.variants_of(mb);
        let installed = self.state.is_installed(mb, variants)?;
        let new_revision = self.state.has_new_revision(mb, variants)?;
        let action = self.options.action;
        let builds = action.builds();
        let has_source = mb.source.is_some();

        let upgrade = installed && new_revision && builds;
        Ok(PlanFlags {
            fetch: has_source && self.needs_fetch(mb)?,
            update_code: has_source && (self.options.update || new_revision || !installed),
            install: !installed && builds,
            reinstall: (action == Action::Reinstall && installed) || upgrade,
            delete: installed && action == Action::Delete,
            upgrade,
            update: installed && (self.options.update || (builds && new_revision)),
        })
    }

    /// Variants of a consumer that still need a build.
    fn variants_to_build(&self, mb: &Minibuild, rebuild: bool) -> Result<Vec<VariantTag>, EngineError> {
        let mut pending = Vec::new();
        for tag in self.variants_of(mb) {
            if rebuild || !self.state.is_marked(mb, &Marker::InstallVariant(tag.clone()))? {
                pending.push(tag.clone());
            }
        }
        Ok(pending)
    }

    fn is_variant_build(&self, mb: &Minibuild) -> bool {
        self.options.action.builds()
            && self.config.variants.is_consumer(mb)
            && !self.variants_of(mb).is_empty()
    }

    fn entry(&self, mb: &Minibuild) -> Result<PlanEntry, EngineError> {
        let flags = self.flags(mb)?;
        let installed_revision = if flags.upgrade {
            self.state.installed_revision(mb, self.variants_of(mb))?
        } else {
            None
        };
        let variants = if self.is_variant_build(mb) {
            self.variants_to_build(mb, flags.reinstall || flags.update)?
        } else {
            Vec::new()
        };
        Ok(PlanEntry {
            name: mb.name.clone(),
            flags,
            installed_revision,
            revision: mb.revision,
            variants,
        })
    }

    fn cut_jumped(&self, mut packages: Vec<Arc<Minibuild>>) -> Vec<Arc<Minibuild>> {
        let Some(jump) = &self.options.jump else {
            return packages;
        };
        match packages.iter().position(|mb| mb.name == *jump) {
            Some(index) => {
                debug!("Jumping to {jump}, {index} packages skipped");
                packages.split_off(index)
            }
            None => packages,
        }
    }

    /// Resolve, select variants, and keep the packages with work to do.
    fn prepare(&mut self, names: &[PackageName]) -> Result<(Plan, Vec<Arc<Minibuild>>), EngineError> {
        if names.is_empty() {
            return Err(EngineError::NoPackages);
        }
        let mut direct = Vec::with_capacity(names.len());
        for name in names {
            let mb = self.minilays.lookup(name)?.ok_or_else(|| ResolveError::NotFound {
                name: name.clone(),
                required_by: None,
            })?;
            direct.push(mb);
        }

        debug!("Calculating dependencies");
        let packages = if self.options.nodeps {
            direct.clone()
        } else {
            resolver::resolve_dependencies(names, &mut self.minilays)?
        };
        let packages = self.cut_jumped(packages);

        let ctx = SelectContext {
            rules: &self.config.variants,
            prefix: &self.config.prefix,
            all_variants: self.options.all_variants,
            nodeps: self.options.nodeps,
        };
        let selection = variants::select(packages, &direct, &mut self.minilays, ctx)?;
        self.variants = selection.variants;

        let mut packages = self.cut_jumped(selection.packages);
        if self.options.only_dependencies {
            packages.retain(|mb| !names.contains(&mb.name));
        }

        let mut plan = Plan {
            action: self.options.action,
            variants: selection.selected,
            ..Plan::default()
        };
        let mut work = Vec::new();
        for mb in packages {
            let entry = self.entry(&mb)?;
            if entry.flags.any_work() || self.options.action == Action::GenerateEnv {
                plan.entries.push(entry);
                work.push(mb);
            }
        }
        Ok((plan, work))
    }

    /// The plan of a merge of `names` with the current action.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution or install state reads fail.
    pub fn plan(&mut self, names: &[PackageName]) -> Result<Plan, EngineError> {
        self.prepare(names).map(|(plan, _)| plan)
    }

    /// Like [`Engine::plan`], reporting failures inside the plan instead.
    pub fn pretend(&mut self, names: &[PackageName]) -> Plan {
        match self.prepare(names) {
            Ok((plan, _)) => plan,
            Err(e) => {
                warn!("Cannot compute the plan: {e}");
                Plan {
                    action: self.options.action,
                    error: Some(e.to_string()),
                    ..Plan::default()
                }
            }
        }
    }

    /// Run `action` on `names` and their dependencies.
    ///
    /// Stops at the first failing package; packages completed before it
    /// keep their markers.
    ///
    /// # Errors
    ///
    /// Returns the first resolution, fetch, build or install state error.
    pub fn run(&mut self, action: Action, names: &[PackageName]) -> Result<Plan, EngineError> {
        self.options.action = action;
        self.options.validate()?;

        let (plan, packages) = self.prepare(names)?;
        self.reporter.plan(&plan);
        if self.options.pretend {
            info!("Pretend mode, nothing done");
            return Ok(plan);
        }

        let started = Instant::now();
        match self.options.fetch_order {
            FetchOrder::FetchFirst => {
                self.reporter.section("Fetching");
                for mb in &packages {
                    self.fetch_package(mb)?;
                }
                if !self.options.fetch_only {
                    self.reporter.section("Building");
                    for mb in &packages {
                        self.act(mb)?;
                    }
                }
            }
            FetchOrder::JustInTime => {
                self.reporter.section(if self.options.fetch_only { "Fetching" } else { "Merging" });
                for mb in &packages {
                    self.fetch_package(mb)?;
                    if !self.options.fetch_only {
                        self.act(mb)?;
                    }
                }
            }
        }

        self.reporter
            .summary(plan.len(), action.as_str(), started.elapsed().as_secs_f64());
        Ok(plan)
    }

    /// Fetch or update the sources of `mb` if it needs it.
    fn fetch_package(&mut self, mb: &Minibuild) -> Result<(), EngineError> {
        if mb.is_meta() || self.options.action == Action::Delete {
            return Ok(());
        }
        let (Some(source), Some(install)) = (&mb.source, self.state.install_path(mb)) else {
            return Ok(());
        };
        let flags = self.flags(mb)?;
        if self.options.offline {
            if flags.fetch {
                return Err(EngineError::Offline(mb.name.clone()));
            }
            debug!("Offline mode, not updating {}", mb.name);
            return Ok(());
        }
        if !flags.fetch && !flags.update_code {
            return Ok(());
        }

        if let Some(parent) = install.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.options.use_binaries && self.fetch_binary(mb, &install) {
            self.binaries.insert(mb.name.clone());
            self.state.set_mark(mb, &Marker::Fetch, "fetch")?;
            return Ok(());
        }

        let fetch_error = |source: FetchError| EngineError::Fetch {
            name: mb.name.clone(),
            source,
        };
        let fetcher = self.fetchers.get(&source.fetch_method).map_err(fetch_error)?;
        let opts = FetchOptions::from_source(source);

        let result = if flags.fetch {
            info!("Fetching {} from {}", mb.name, source.uri);
            self.reporter.fetching(&mb.name, &source.uri);
            fetcher.fetch(&install, &source.uri, &opts)
        } else {
            info!("Updating {} from {}", mb.name, source.uri);
            self.reporter.updating(&mb.name, &source.uri);
            match fetcher.has_uri_changed(&install, &source.uri) {
                Ok(true) => {
                    let category = mb.category.as_deref().unwrap_or_default();
                    let scratch = paths::checkout_tmp_path(self.state.prefix(), category, &mb.name);
                    info!("{} moved to {}, checking out again", mb.name, source.uri);
                    if scratch.is_dir() {
                        std::fs::remove_dir_all(&scratch)?;
                    }
                    fetcher.fetch(&scratch, &source.uri, &opts).and_then(|()| {
                        copy_tree(&scratch, &install)?;
                        std::fs::remove_dir_all(&scratch)?;
                        Ok(())
                    })
                }
                Ok(false) => fetcher.update(&install, &source.uri, &opts),
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            self.reporter.failed(&mb.name, &e.to_string());
            return Err(fetch_error(e));
        }

        self.state.set_mark(mb, &Marker::Fetch, "fetch")?;
        Ok(())
    }

    /// Unpack the first prebuilt archive of `mb` that can be fetched.
    /// Failures only fall back to the sources.
    fn fetch_binary(&self, mb: &Minibuild, install: &std::path::Path) -> bool {
        let Ok(fetcher) = self.fetchers.get("static") else {
            warn!("No static fetcher registered, binaries disabled");
            return false;
        };
        for uri in self.config.binary_urls(&mb.name) {
            debug!("Trying binary {uri} for {}", mb.name);
            match fetcher.fetch(install, &uri, &FetchOptions::default()) {
                Ok(()) => {
                    info!("Using binary package {} from {uri}", mb.name);
                    self.reporter.fetching(&mb.name, &uri);
                    return true;
                }
                Err(e) => debug!("No binary for {} at {uri}: {e}", mb.name),
            }
        }
        false
    }

    /// Install paths of the packages `mb` depends on, transitively.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency cannot be resolved.
    pub fn dependency_paths(&mut self, mb: &Minibuild) -> Result<Vec<PathBuf>, EngineError> {
        let deps = resolver::resolve_dependencies(&mb.dependencies, &mut self.minilays)?;
        Ok(deps
            .iter()
            .filter_map(|dep| self.state.install_path(dep))
            .filter(|path| path.is_dir())
            .collect())
    }

    fn build_environment(&mut self, mb: &Minibuild) -> Result<BuildEnvironment, EngineError> {
        let deps = self.dependency_paths(mb)?;
        let base_path = std::env::var("PATH").ok();
        Ok(BuildEnvironment::for_dependencies(
            deps.iter().map(PathBuf::as_path),
            base_path.as_deref(),
        ))
    }

    /// Dispatch `mb` to its maker for the current action, then record the
    /// result.
    fn act(&mut self, mb: &Arc<Minibuild>) -> Result<(), EngineError> {
        let action = self.options.action;
        if mb.is_meta() {
            debug!("{} is a meta package, nothing to do", mb.name);
            return Ok(());
        }
        let Some(install) = self.state.install_path(mb) else {
            warn!("{} has no category, skipping", mb.name);
            return Ok(());
        };
        std::fs::create_dir_all(&install)?;
        let env = self.build_environment(mb)?;

        if action == Action::GenerateEnv {
            let path = env.write_env_file(&paths::env_file_path(&install))?;
            self.reporter
                .done(&mb.name, &format!("environment written to {}", path.display()));
            return Ok(());
        }

        let flags = self.flags(mb)?;
        let variant_build = self.is_variant_build(mb);
        let variants = if variant_build {
            self.variants_to_build(mb, flags.reinstall || flags.update)?
        } else {
            Vec::new()
        };
        if variant_build && variants.is_empty() {
            self.reporter.done(&mb.name, "up to date");
            return Ok(());
        }
        let reinstalling = action.builds() && flags.reinstall;

        if action.builds() && self.binaries.contains(&mb.name) {
            self.record(mb, &install, &variants, reinstalling, &env)?;
            self.reporter.done(&mb.name, "installed from binary");
            return Ok(());
        }

        let Some(method) = mb.install_method.as_deref() else {
            if action == Action::Delete {
                std::fs::remove_dir_all(&install)?;
                self.reporter.done(&mb.name, "removed");
            } else {
                self.record(mb, &install, &variants, reinstalling, &env)?;
                self.reporter.done(&mb.name, "recorded");
            }
            return Ok(());
        };

        let make_error = |source: MakeError| EngineError::Make {
            name: mb.name.clone(),
            source,
        };
        let maker = self.makers.get(method).map_err(make_error)?;
        let options = MakeOptions {
            minibuild: Arc::clone(mb),
            offline: self.options.offline,
            debug: self.options.debug,
            verbose: self.options.verbose,
            newest: self.options.upgrade || self.state.has_new_revision(mb, self.variants_of(mb))?,
            consumer: self.config.variants.is_consumer(mb),
            variants: variants.clone(),
            env: env.clone(),
        };

        self.reporter.building(&mb.name, action, &variants);
        let result = match action {
            Action::Delete => maker.delete(&install, &options),
            _ if reinstalling => maker.reinstall(&install, &options),
            _ => maker.install(&install, &options),
        };
        if let Err(e) = result {
            self.reporter.failed(&mb.name, &e.to_string());
            return Err(make_error(e));
        }

        if action == Action::Delete {
            self.reporter.done(&mb.name, "removed");
            return Ok(());
        }
        self.record(mb, &install, &variants, reinstalling, &env)?;
        let detail = if reinstalling { "reinstalled" } else { "installed" };
        self.reporter.done(&mb.name, detail);
        Ok(())
    }

    /// Snapshot, markers and environment file of a successful build.
    fn record(
        &self,
        mb: &Minibuild,
        install: &std::path::Path,
        variants: &[VariantTag],
        reinstalled: bool,
        env: &BuildEnvironment,
    ) -> Result<(), EngineError> {
        self.state.record_snapshot(mb)?;
        if variants.is_empty() {
            self.state.set_mark(mb, &Marker::Install, "install")?;
        } else {
            for tag in variants {
                let marker = Marker::InstallVariant(tag.clone());
                self.state.set_mark(mb, &marker, &marker.file_name())?;
            }
        }
        if reinstalled {
            self.state.set_mark(mb, &Marker::Reinstall, "reinstall")?;
        }
        env.write_env_file(&paths::env_file_path(install))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variables;
    use crate::fetchers::Fetcher;
    use crate::makers::Maker;
    use crate::minilay::Minilay;
    use crate::reporter::NullReporter;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct FakeFetcher {
        root: PathBuf,
        log: Log,
    }

    impl FakeFetcher {
        fn record(&self, op: &str, dest: &Path) {
            let rel = dest.strip_prefix(&self.root).unwrap_or(dest);
            self.log.lock().unwrap().push(format!("{op} {}", rel.display()));
        }
    }

    impl Fetcher for FakeFetcher {
        fn name(&self) -> &str {
            "git"
        }
        fn fetch(&self, dest: &Path, uri: &str, _: &FetchOptions) -> Result<(), FetchError> {
            self.record("fetch", dest);
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("buildout.cfg"), "[buildout]\n")?;
            std::fs::write(dest.join(".fake-uri"), uri)?;
            Ok(())
        }
        fn update(&self, dest: &Path, _: &str, _: &FetchOptions) -> Result<(), FetchError> {
            self.record("update", dest);
            Ok(())
        }
        fn recorded_uri(&self, dest: &Path) -> Result<Option<String>, FetchError> {
            Ok(std::fs::read_to_string(dest.join(".fake-uri")).ok())
        }
    }

    /// Serves `<name>-binary.tar.gz` for the listed packages, 404s otherwise.
    #[derive(Debug)]
    struct FakeBinaryFetcher {
        available: Vec<&'static str>,
        log: Log,
    }

    impl Fetcher for FakeBinaryFetcher {
        fn name(&self) -> &str {
            "static"
        }
        fn fetch(&self, dest: &Path, uri: &str, _: &FetchOptions) -> Result<(), FetchError> {
            let file = uri.rsplit('/').next().unwrap_or_default();
            let Some(name) = self
                .available
                .iter()
                .find(|name| file == format!("{name}-binary.tar.gz"))
            else {
                return Err(FetchError::Fetch {
                    uri: uri.to_string(),
                    dest: dest.to_path_buf(),
                    reason: "404 Not Found".to_string(),
                });
            };
            self.log.lock().unwrap().push(format!("binary {name}"));
            std::fs::create_dir_all(dest.join("lib"))?;
            std::fs::write(dest.join("lib/prebuilt"), uri)?;
            Ok(())
        }
        fn update(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError> {
            self.fetch(dest, uri, opts)
        }
    }

    #[derive(Debug)]
    struct FakeMaker {
        log: Log,
        fail_on: Option<&'static str>,
    }

    impl FakeMaker {
        fn record(&self, op: &str, opts: &MakeOptions) -> Result<(), MakeError> {
            let mut line = format!("{op} {}", opts.minibuild.name);
            if !opts.variants.is_empty() {
                let tags: Vec<&str> = opts.variants.iter().map(VariantTag::as_str).collect();
                line.push_str(&format!(" ({})", tags.join(", ")));
            }
            self.log.lock().unwrap().push(line);
            if self.fail_on == Some(opts.minibuild.name.as_str()) {
                return Err(MakeError::Make {
                    path: PathBuf::from("/x"),
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    impl Maker for FakeMaker {
        fn name(&self) -> &str {
            "buildout"
        }
        fn install(&self, _: &Path, opts: &MakeOptions) -> Result<(), MakeError> {
            self.record("install", opts)
        }
        fn reinstall(&self, _: &Path, opts: &MakeOptions) -> Result<(), MakeError> {
            self.record("reinstall", opts)
        }
        fn delete(&self, path: &Path, opts: &MakeOptions) -> Result<(), MakeError> {
            self.record("delete", opts)?;
            std::fs::remove_dir_all(path)?;
            Ok(())
        }
    }

    fn fetched(name: &str, category: &str, deps: &[&str], revision: u32) -> Minibuild {
        let content = format!(
            "[minibuild]\ninstall_method = buildout\ncategory = {category}\n\
             dependencies = {}\nsrc_type = git\nsrc_uri = https://example.org/{name}\n\
             revision = {revision}\n",
            deps.join(" ")
        );
        Minibuild::parse(name, &content, &Variables::new()).unwrap()
    }

    fn local(name: &str, category: &str, deps: &[&str]) -> Minibuild {
        let content = format!(
            "[minibuild]\ninstall_method = buildout\ncategory = {category}\ndependencies = {}\n",
            deps.join(" ")
        );
        Minibuild::parse(name, &content, &Variables::new()).unwrap()
    }

    struct Harness {
        prefix: tempfile::TempDir,
        log: Log,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                prefix: tempdir().unwrap(),
                log: Log::default(),
            }
        }

        fn engine(&self, entries: Vec<Minibuild>, options: MergeOptions) -> Engine {
            self.engine_failing(entries, options, None)
        }

        fn engine_failing(&self, entries: Vec<Minibuild>, options: MergeOptions, fail_on: Option<&'static str>) -> Engine {
            self.build(entries, options, fail_on, None)
        }

        /// An engine whose static fetcher serves binaries of `available` only.
        fn engine_with_binaries(&self, entries: Vec<Minibuild>, options: MergeOptions, available: &[&'static str]) -> Engine {
            self.build(entries, options, None, Some(available.to_vec()))
        }

        fn build(
            &self,
            entries: Vec<Minibuild>,
            options: MergeOptions,
            fail_on: Option<&'static str>,
            binaries: Option<Vec<&'static str>>,
        ) -> Engine {
            let config = Config::with_prefix(self.prefix.path());
            let minilays = Minilays::new(vec![Minilay::in_memory("/test", entries)]);
            let mut fetchers = FetcherRegistry::new();
            fetchers.register(Box::new(FakeFetcher {
                root: self.prefix.path().to_path_buf(),
                log: Arc::clone(&self.log),
            }));
            if let Some(available) = binaries {
                fetchers.register(Box::new(FakeBinaryFetcher {
                    available,
                    log: Arc::clone(&self.log),
                }));
            }
            let mut makers = MakerRegistry::new();
            makers.register(Box::new(FakeMaker {
                log: Arc::clone(&self.log),
                fail_on,
            }));
            Engine::new(config, minilays, options, Arc::new(NullReporter))
                .unwrap()
                .with_collaborators(fetchers, makers)
        }

        fn take_log(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock().unwrap())
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.prefix.path().join(rel)
        }
    }

    fn names(list: &[&str]) -> Vec<PackageName> {
        list.iter().copied().map(PackageName::from).collect()
    }

    fn catalog() -> Vec<Minibuild> {
        vec![
            fetched("zlib-1.2", "dependencies", &[], 0),
            fetched("app-1.0", "misc", &["zlib-1.2"], 0),
        ]
    }

    #[test]
    fn test_install_fetches_builds_and_records() {
        let h = Harness::new();
        let mut engine = h.engine(catalog(), MergeOptions::default());
        let plan = engine.run(Action::Install, &names(&["app-1.0"])).unwrap();

        let planned: Vec<&str> = plan.names().map(PackageName::as_str).collect();
        assert_eq!(planned, vec!["zlib-1.2", "app-1.0"]);
        assert!(plan.entries.iter().all(|e| e.flags.fetch && e.flags.install));
        assert_eq!(
            h.take_log(),
            vec![
                "fetch dependencies/zlib-1.2",
                "install zlib-1.2",
                "fetch misc/app-1.0",
                "install app-1.0",
            ]
        );

        let app = h.path("misc/app-1.0");
        assert!(app.join(".minitage/markers/install").is_file());
        assert!(app.join(".minitage/markers/fetch").is_file());
        assert!(app.join(".minitage/minibuild").is_file());
        let env = std::fs::read_to_string(paths::env_file_path(&app)).unwrap();
        assert!(env.contains("MAKEOPTS"));

        // Nothing left to do.
        let plan = engine.run(Action::Install, &names(&["app-1.0"])).unwrap();
        assert!(plan.is_empty());
        assert!(h.take_log().is_empty());
    }

    #[test]
    fn test_fetch_first_order() {
        let h = Harness::new();
        let options = MergeOptions {
            fetch_order: FetchOrder::FetchFirst,
            ..MergeOptions::default()
        };
        h.engine(catalog(), options)
            .run(Action::Install, &names(&["app-1.0"]))
            .unwrap();
        assert_eq!(
            h.take_log(),
            vec![
                "fetch dependencies/zlib-1.2",
                "fetch misc/app-1.0",
                "install zlib-1.2",
                "install app-1.0",
            ]
        );
    }

    #[test]
    fn test_fetch_only() {
        let h = Harness::new();
        let options = MergeOptions {
            fetch_only: true,
            ..MergeOptions::default()
        };
        h.engine(catalog(), options)
            .run(Action::Install, &names(&["app-1.0"]))
            .unwrap();
        assert_eq!(h.take_log(), vec!["fetch dependencies/zlib-1.2", "fetch misc/app-1.0"]);
        assert!(!h.path("misc/app-1.0/.minitage/markers/install").exists());
    }

    #[test]
    fn test_new_revision_upgrades() {
        let h = Harness::new();
        h.engine(catalog(), MergeOptions::default())
            .run(Action::Install, &names(&["app-1.0"]))
            .unwrap();
        h.take_log();

        let bumped = vec![
            fetched("zlib-1.2", "dependencies", &[], 0),
            fetched("app-1.0", "misc", &["zlib-1.2"], 2),
        ];
        let mut engine = h.engine(bumped, MergeOptions::default());
        let app = engine.minilays_mut().find("app-1.0").unwrap();
        assert!(engine.state().has_new_revision(&app, &[]).unwrap());

        let plan = engine.run(Action::Install, &names(&["app-1.0"])).unwrap();
        assert_eq!(plan.len(), 1);
        let entry = &plan.entries[0];
        assert!(entry.flags.upgrade && entry.flags.reinstall && entry.flags.update);
        assert!(!entry.flags.install);
        assert_eq!(entry.revision_change(), "[0 => 2]");
        assert_eq!(h.take_log(), vec!["update misc/app-1.0", "reinstall app-1.0"]);

        assert!(h.path("misc/app-1.0/.minitage/markers/reinstall").is_file());
        assert!(!engine.state().has_new_revision(&app, &[]).unwrap());
    }

    #[test]
    fn test_reinstall_and_delete() {
        let h = Harness::new();
        let mut engine = h.engine(catalog(), MergeOptions::default());
        engine.run(Action::Install, &names(&["zlib-1.2"])).unwrap();
        h.take_log();

        engine.run(Action::Reinstall, &names(&["zlib-1.2"])).unwrap();
        assert_eq!(h.take_log(), vec!["reinstall zlib-1.2"]);

        engine.run(Action::Delete, &names(&["zlib-1.2"])).unwrap();
        assert_eq!(h.take_log(), vec!["delete zlib-1.2"]);
        assert!(!h.path("dependencies/zlib-1.2").exists());

        // Deleting something not installed is a no-op.
        let plan = engine.run(Action::Delete, &names(&["zlib-1.2"])).unwrap();
        assert!(plan.is_empty());
        assert!(h.take_log().is_empty());
    }

    #[test]
    fn test_update_flag_refreshes_installed_sources() {
        let h = Harness::new();
        h.engine(catalog(), MergeOptions::default())
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap();
        h.take_log();

        let options = MergeOptions {
            update: true,
            ..MergeOptions::default()
        };
        let plan = h
            .engine(catalog(), options)
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap();
        let flags = plan.entries[0].flags;
        assert!(flags.update && flags.update_code && !flags.reinstall);
        assert_eq!(h.take_log(), vec!["update dependencies/zlib-1.2", "install zlib-1.2"]);
    }

    #[test]
    fn test_moved_sources_are_checked_out_again() {
        let h = Harness::new();
        h.engine(catalog(), MergeOptions::default())
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap();
        h.take_log();

        let moved = Minibuild::parse(
            "zlib-1.2",
            "[minibuild]\ninstall_method = buildout\ncategory = dependencies\n\
             src_type = git\nsrc_uri = https://mirror.example.org/zlib\n",
            &Variables::new(),
        )
        .unwrap();
        let options = MergeOptions {
            update: true,
            ..MergeOptions::default()
        };
        h.engine(vec![moved], options)
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap();
        assert_eq!(
            h.take_log(),
            vec!["fetch dependencies/minitage-checkout-tmp/zlib-1.2", "install zlib-1.2"]
        );
        assert_eq!(
            std::fs::read_to_string(h.path("dependencies/zlib-1.2/.fake-uri")).unwrap(),
            "https://mirror.example.org/zlib"
        );
        assert!(!h.path("dependencies/minitage-checkout-tmp/zlib-1.2").exists());
    }

    #[test]
    fn test_offline_requires_sources() {
        let h = Harness::new();
        let options = MergeOptions {
            offline: true,
            ..MergeOptions::default()
        };
        let err = h
            .engine(catalog(), options)
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Offline(name) if name == "zlib-1.2"));
        assert!(h.take_log().is_empty());
    }

    #[test]
    fn test_build_failure_stops_the_run_without_markers() {
        let h = Harness::new();
        let mut engine = h.engine_failing(catalog(), MergeOptions::default(), Some("zlib-1.2"));
        let err = engine.run(Action::Install, &names(&["app-1.0"])).unwrap_err();
        assert!(matches!(err, EngineError::Make { .. }));
        assert_eq!(h.take_log(), vec!["fetch dependencies/zlib-1.2", "install zlib-1.2"]);
        assert!(!h.path("dependencies/zlib-1.2/.minitage/markers/install").exists());
    }

    #[test]
    fn test_variant_consumer_builds_missing_variants_only() {
        let h = Harness::new();
        let entries = vec![
            local("python-2.5", "dependencies", &[]),
            local("python-2.6", "dependencies", &[]),
            local("lxml-2.2", "eggs", &["python-2.5", "python-2.6"]),
        ];
        let mut engine = h.engine(entries, MergeOptions::default());
        let lxml = engine.minilays_mut().find("lxml-2.2").unwrap();
        let python25 = engine.minilays_mut().find("python-2.5").unwrap();
        let python26 = engine.minilays_mut().find("python-2.6").unwrap();
        for runtime in [&python25, &python26] {
            engine.state().set_mark(runtime, &Marker::Install, "install").unwrap();
        }
        let v25 = Marker::InstallVariant(VariantTag::from("2.5"));
        engine.state().set_mark(&lxml, &v25, "install-2.5").unwrap();

        let plan = engine.plan(&names(&["lxml-2.2"])).unwrap();
        assert_eq!(plan.variants, vec![VariantTag::from("2.5"), VariantTag::from("2.6")]);
        assert!(!engine.is_installed(&lxml).unwrap());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].variants, vec![VariantTag::from("2.6")]);

        engine.run(Action::Install, &names(&["lxml-2.2"])).unwrap();
        assert_eq!(h.take_log(), vec!["install lxml-2.2 (2.6)"]);
        assert!(engine.is_installed(&lxml).unwrap());
        assert!(!h.path("eggs/lxml-2.2/.minitage/markers/install").exists());
        assert_eq!(
            engine.installed_variants(&lxml).unwrap(),
            vec![VariantTag::from("2.5"), VariantTag::from("2.6")]
        );
    }

    #[test]
    fn test_generate_env_only_writes_environment() {
        let h = Harness::new();
        let mut engine = h.engine(catalog(), MergeOptions::default());
        engine.run(Action::Install, &names(&["app-1.0"])).unwrap();
        h.take_log();
        std::fs::remove_file(paths::env_file_path(&h.path("misc/app-1.0"))).unwrap();

        let options = MergeOptions {
            offline: true,
            ..MergeOptions::default()
        };
        let plan = h
            .engine(catalog(), options)
            .run(Action::GenerateEnv, &names(&["app-1.0"]))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(h.take_log().is_empty());
        assert!(paths::env_file_path(&h.path("misc/app-1.0")).is_file());
    }

    #[test]
    fn test_jump_and_only_dependencies() {
        let h = Harness::new();
        let entries = vec![
            local("a-1.0", "misc", &[]),
            local("b-1.0", "misc", &["a-1.0"]),
            local("c-1.0", "misc", &["b-1.0"]),
        ];
        let options = MergeOptions {
            jump: Some(PackageName::from("b-1.0")),
            ..MergeOptions::default()
        };
        let plan = h.engine(entries.clone(), options).plan(&names(&["c-1.0"])).unwrap();
        assert_eq!(plan.names().collect::<Vec<_>>(), vec!["b-1.0", "c-1.0"]);

        let options = MergeOptions {
            only_dependencies: true,
            ..MergeOptions::default()
        };
        let plan = h.engine(entries, options).plan(&names(&["c-1.0"])).unwrap();
        assert_eq!(plan.names().collect::<Vec<_>>(), vec!["a-1.0", "b-1.0"]);
    }

    #[test]
    fn test_pretend_reports_errors_in_plan() {
        let h = Harness::new();
        let entries = vec![local("a-1.0", "misc", &["b-1.0"]), local("b-1.0", "misc", &["a-1.0"])];
        let mut engine = h.engine(entries, MergeOptions::default());
        let plan = engine.pretend(&names(&["a-1.0"]));
        let error = plan.error.unwrap();
        assert!(error.contains("Circular dependency"));
        assert!(plan.entries.is_empty());

        assert!(engine.pretend(&names(&["nope"])).error.is_some());
        assert!(matches!(engine.run(Action::Install, &[]), Err(EngineError::NoPackages)));
    }

    #[test]
    fn test_pretend_option_does_nothing() {
        let h = Harness::new();
        let options = MergeOptions {
            pretend: true,
            ..MergeOptions::default()
        };
        let plan = h
            .engine(catalog(), options)
            .run(Action::Install, &names(&["app-1.0"]))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(h.take_log().is_empty());
        assert!(!h.path("misc").exists());
    }

    #[test]
    fn test_meta_packages_are_planned_but_skipped() {
        let h = Harness::new();
        let meta = Minibuild::parse("meta-tools", "[minibuild]\ndependencies = zlib-1.2\n", &Variables::new()).unwrap();
        let mut entries = catalog();
        entries.push(meta);
        let plan = h
            .engine(entries, MergeOptions::default())
            .run(Action::Install, &names(&["meta-tools"]))
            .unwrap();
        assert_eq!(plan.names().collect::<Vec<_>>(), vec!["zlib-1.2", "meta-tools"]);
        assert_eq!(h.take_log(), vec!["fetch dependencies/zlib-1.2", "install zlib-1.2"]);
    }

    #[test]
    fn test_conflicting_modes() {
        let options = MergeOptions {
            jump: Some(PackageName::from("a")),
            nodeps: true,
            ..MergeOptions::default()
        };
        assert!(matches!(options.validate(), Err(EngineError::ConflictingModes(_))));
        let options = MergeOptions {
            fetch_only: true,
            offline: true,
            ..MergeOptions::default()
        };
        assert!(options.validate().is_err());
        assert!(MergeOptions::default().validate().is_ok());
    }

    #[test]
    fn test_binaries_skip_the_build_and_fall_back_to_sources() {
        let h = Harness::new();
        let options = MergeOptions {
            use_binaries: true,
            ..MergeOptions::default()
        };
        let mut engine = h.engine_with_binaries(catalog(), options, &["zlib-1.2"]);
        engine.run(Action::Install, &names(&["app-1.0"])).unwrap();

        // zlib comes prebuilt, app has no binary and is built from source.
        assert_eq!(
            h.take_log(),
            vec!["binary zlib-1.2", "fetch misc/app-1.0", "install app-1.0"]
        );
        let zlib = h.path("dependencies/zlib-1.2");
        assert!(zlib.join("lib/prebuilt").is_file());
        assert!(zlib.join(".minitage/markers/fetch").is_file());
        assert!(zlib.join(".minitage/markers/install").is_file());
        assert!(h.path("misc/app-1.0/.minitage/markers/install").is_file());

        let plan = engine.run(Action::Install, &names(&["app-1.0"])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_binaries_are_ignored_unless_enabled() {
        let h = Harness::new();
        h.engine_with_binaries(catalog(), MergeOptions::default(), &["zlib-1.2"])
            .run(Action::Install, &names(&["zlib-1.2"]))
            .unwrap();
        assert_eq!(h.take_log(), vec!["fetch dependencies/zlib-1.2", "install zlib-1.2"]);
    }

    #[test]
    fn test_unreadable_install_dir_is_an_error() {
        let h = Harness::new();
        let engine = h.engine(catalog(), MergeOptions::default());
        let zlib = fetched("zlib-1.2", "dependencies", &[], 0);

        assert!(engine.needs_fetch(&zlib).unwrap());
        std::fs::create_dir_all(h.path("dependencies")).unwrap();
        std::fs::write(h.path("dependencies/zlib-1.2"), "not a directory").unwrap();
        assert!(matches!(engine.needs_fetch(&zlib), Err(EngineError::Io(_))));
    }
}
