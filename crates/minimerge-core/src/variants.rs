//! Build-variant selection.
//!
//! Some packages (the variant consumers, `eggs` by default) are built once
//! per runtime variant, e.g. once for `python-2.5` and once for
//! `python-2.6`. Which variants a merge uses is decided here:
//!
//! 1. runtimes requested by name are always selected;
//! 2. requesting a consumer with `all_variants` selects every known variant;
//! 3. otherwise every runtime some package of the build list depends on is
//!    selected, except the ones only pulled in by the selector package;
//! 4. if consumers are present and nothing was selected, the newest
//!    installed runtime is picked, or the newest known one.
//!
//! The selected runtimes and their dependencies are moved to the front of
//! the build list, and the runtimes that were not selected are dropped
//! together with every package that is only reachable through them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use minimerge_schema::{PackageName, VariantTag};
use tracing::debug;

use crate::config::VariantConfig;
use crate::minibuild::Minibuild;
use crate::minilay::Minilays;
use crate::resolver::{ResolveError, resolve_dependencies};

/// Result of variant selection.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// The build list with runtimes spliced in.
    pub packages: Vec<Arc<Minibuild>>,
    /// Variants each consumer of the list is built for.
    pub variants: BTreeMap<PackageName, Vec<VariantTag>>,
    /// Every selected variant, oldest first.
    pub selected: Vec<VariantTag>,
}

/// Inputs of [`select`] besides the build list.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    /// Variant vocabulary.
    pub rules: &'a VariantConfig,
    /// Root of the installation tree, to find installed runtimes.
    pub prefix: &'a Path,
    /// Build consumers for every known variant.
    pub all_variants: bool,
    /// Do not splice runtimes into the list.
    pub nodeps: bool,
}

impl VariantConfig {
    /// `python-2.6` for tag `2.6`.
    pub fn runtime_name(&self, tag: &VariantTag) -> PackageName {
        PackageName::new(format!("{}{}", self.runtime_prefix, tag))
    }

    /// The variant `name` is the runtime of, if any.
    pub fn runtime_tag(&self, name: &str) -> Option<VariantTag> {
        let tag = name.strip_prefix(self.runtime_prefix.as_str())?;
        self.known.iter().find(|known| known.as_str() == tag).cloned()
    }

    /// Whether `mb` is built once per variant.
    pub fn is_consumer(&self, mb: &Minibuild) -> bool {
        mb.category.as_deref() == Some(self.consumer_category.as_str())
    }

    fn is_runtime_installed(&self, prefix: &Path, tag: &VariantTag) -> bool {
        prefix
            .join(&self.runtime_category)
            .join(self.runtime_name(tag).as_str())
            .is_dir()
    }
}

/// Choose the variants of a merge and splice their runtimes into
/// `build_list`. `direct` are the packages the user asked for.
///
/// # Errors
///
/// Returns an error if resolving the selected runtimes fails.
pub fn select(
    build_list: Vec<Arc<Minibuild>>,
    direct: &[Arc<Minibuild>],
    minilays: &mut Minilays,
    ctx: SelectContext<'_>,
) -> Result<Selection, ResolveError> {
    let rules = ctx.rules;
    let mut selected: Vec<VariantTag> = Vec::new();

    let mut all = false;
    for mb in direct {
        if let Some(tag) = rules.runtime_tag(&mb.name) {
            push_unique(&mut selected, tag);
        }
        if ctx.all_variants && rules.is_consumer(mb) {
            for tag in &rules.known {
                push_unique(&mut selected, tag.clone());
            }
            all = true;
            break;
        }
    }

    if !all {
        let mut consumers_present = false;
        for mb in &build_list {
            if mb.name != rules.selector {
                for dep in &mb.dependencies {
                    if let Some(tag) = rules.runtime_tag(dep) {
                        push_unique(&mut selected, tag);
                    }
                }
            }
            if rules.is_consumer(mb) || mb.dependencies.contains(&rules.selector) {
                consumers_present = true;
            }
        }

        if selected.is_empty() && consumers_present {
            let fallback = rules
                .known
                .iter()
                .rev()
                .find(|tag| rules.is_runtime_installed(ctx.prefix, tag))
                .or_else(|| rules.known.last());
            if let Some(tag) = fallback {
                debug!("No variant requested, defaulting to {tag}");
                push_unique(&mut selected, tag.clone());
            }
        }
    }

    selected.sort_by_key(|tag| rules.known.iter().position(|k| k == tag));

    let packages = if selected.is_empty() || ctx.nodeps {
        dedupe(build_list)
    } else {
        splice(build_list, direct, &selected, minilays, rules)?
    };

    let variants = packages
        .iter()
        .filter(|mb| rules.is_consumer(mb))
        .map(|mb| (mb.name.clone(), selected.clone()))
        .collect();

    Ok(Selection {
        packages,
        variants,
        selected,
    })
}

fn splice(
    build_list: Vec<Arc<Minibuild>>,
    direct: &[Arc<Minibuild>],
    selected: &[VariantTag],
    minilays: &mut Minilays,
    rules: &VariantConfig,
) -> Result<Vec<Arc<Minibuild>>, ResolveError> {
    let runtimes: Vec<PackageName> = selected.iter().map(|t| rules.runtime_name(t)).collect();
    let runtime_tree = resolve_dependencies(&runtimes, minilays)?;

    let is_dropped = |name: &str| {
        rules
            .runtime_tag(name)
            .is_some_and(|tag| !selected.contains(&tag))
    };

    let by_name: HashMap<&str, &Arc<Minibuild>> = build_list
        .iter()
        .chain(&runtime_tree)
        .map(|mb| (mb.name.as_str(), mb))
        .collect();

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = direct
        .iter()
        .map(|mb| mb.name.as_str())
        .chain(runtimes.iter().map(PackageName::as_str))
        .collect();
    while let Some(name) = stack.pop() {
        if is_dropped(name) || !reachable.insert(name) {
            continue;
        }
        if let Some(mb) = by_name.get(name) {
            stack.extend(mb.dependencies.iter().map(PackageName::as_str));
        }
    }

    let kept: Vec<Arc<Minibuild>> = runtime_tree
        .iter()
        .chain(build_list.iter().filter(|mb| reachable.contains(mb.name.as_str())))
        .cloned()
        .collect();
    Ok(dedupe(kept))
}

fn push_unique(selected: &mut Vec<VariantTag>, tag: VariantTag) {
    if !selected.contains(&tag) {
        selected.push(tag);
    }
}

fn dedupe(list: Vec<Arc<Minibuild>>) -> Vec<Arc<Minibuild>> {
    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|mb| seen.insert(mb.name.clone()))
        .collect()
}
