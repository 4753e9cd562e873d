//! Build list computation.

use minimerge_schema::PackageName;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::minibuild::Minibuild;
use crate::minilay::{MinilayError, Minilays};

/// Errors raised while computing a build list.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A package or dependency has no minibuild.
    #[error("Package '{name}' not found{}", .required_by.as_ref().map(|p| format!(" (required by '{p}')")).unwrap_or_default())]
    NotFound {
        /// Missing package.
        name: PackageName,
        /// Package depending on it, if any.
        required_by: Option<PackageName>,
    },

    /// A dependency cycle.
    #[error("Circular dependency around {package} and its ancestors: {}", format_chain(.chain))]
    Circular {
        /// Package closing the cycle.
        package: PackageName,
        /// Ancestors leading to it.
        chain: Vec<PackageName>,
    },

    /// A minilay cannot be read.
    #[error(transparent)]
    Minilay(#[from] MinilayError),
}

fn format_chain(chain: &[PackageName]) -> String {
    let mut out = String::new();
    for (i, name) in chain.iter().enumerate() {
        if i > 0 {
            out.push_str(" -> ");
        }
        let _ = write!(out, "{name}");
    }
    out
}

/// Resolves `names` and their dependencies into a build list: every
/// package once, dependencies before their dependents.
///
/// Each visited package is inserted right before the first package already
/// in the list that depends on it, or appended when there is none. Packages
/// currently being walked are kept on a stack so that a cycle is reported
/// as [`ResolveError::Circular`] instead of recursing forever.
///
/// # Errors
///
/// Returns an error if a package (requested or transitive) is missing from
/// every minilay, cannot be parsed, or takes part in a cycle.
pub fn resolve_dependencies(
    names: &[PackageName],
    minilays: &mut Minilays,
) -> Result<Vec<Arc<Minibuild>>, ResolveError> {
    let mut order = Vec::new();
    let mut visiting = Vec::new();
    let mut explored = HashSet::new();

    for name in names {
        resolve_recursive(name, None, minilays, &mut order, &mut visiting, &mut explored)?;
    }

    Ok(order)
}

fn resolve_recursive(
    name: &PackageName,
    required_by: Option<&PackageName>,
    minilays: &mut Minilays,
    order: &mut Vec<Arc<Minibuild>>,
    visiting: &mut Vec<PackageName>,
    explored: &mut HashSet<PackageName>,
) -> Result<(), ResolveError> {
    if let Some(pos) = visiting.iter().position(|n| n == name) {
        let mut chain = visiting[pos..].to_vec();
        chain.push(name.clone());
        return Err(ResolveError::Circular {
            package: name.clone(),
            chain,
        });
    }

    let mb = minilays
        .lookup(name)?
        .ok_or_else(|| ResolveError::NotFound {
            name: name.clone(),
            required_by: required_by.cloned(),
        })?;

    if !order.iter().any(|m| m.name == *name) {
        let index = order
            .iter()
            .position(|m| m.dependencies.contains(name))
            .unwrap_or(order.len());
        order.insert(index, Arc::clone(&mb));
    }

    // Everything below an explored package is already in place.
    if explored.contains(name) {
        return Ok(());
    }

    visiting.push(name.clone());
    for dep in &mb.dependencies {
        resolve_recursive(dep, Some(name), minilays, order, visiting, explored)?;
    }
    visiting.pop();
    explored.insert(name.clone());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variables;
    use crate::minilay::Minilay;

    fn minibuild(name: &str, deps: &[&str]) -> Minibuild {
        let content = format!(
            "[minibuild]\ninstall_method = buildout\ndependencies = {}\n",
            deps.join(" ")
        );
        Minibuild::parse(name, &content, &Variables::new()).unwrap()
    }

    fn minilays(entries: Vec<Minibuild>) -> Minilays {
        Minilays::new(vec![Minilay::in_memory("/test", entries)])
    }

    fn names(list: &[Arc<Minibuild>]) -> Vec<&str> {
        list.iter().map(|m| m.name.as_str()).collect()
    }

    fn resolve(minilays: &mut Minilays, requested: &[&str]) -> Result<Vec<Arc<Minibuild>>, ResolveError> {
        let requested: Vec<PackageName> = requested.iter().copied().map(PackageName::from).collect();
        resolve_dependencies(&requested, minilays)
    }

    fn pos(list: &[Arc<Minibuild>], name: &str) -> usize {
        list.iter().position(|m| m.name == name).unwrap()
    }

    #[test]
    fn test_simple_resolution() {
        let mut index = minilays(vec![minibuild("a", &["b"]), minibuild("b", &[])]);
        let resolved = resolve(&mut index, &["a"]).unwrap();
        assert_eq!(names(&resolved), vec!["b", "a"]);
    }

    #[test]
    fn test_complex_resolution() {
        let mut index = minilays(vec![
            minibuild("a", &["b", "c"]),
            minibuild("b", &["d"]),
            minibuild("c", &["d"]),
            minibuild("d", &[]),
        ]);

        let resolved = resolve(&mut index, &["a"]).unwrap();
        assert_eq!(resolved.len(), 4);
        assert!(pos(&resolved, "d") < pos(&resolved, "b"));
        assert!(pos(&resolved, "d") < pos(&resolved, "c"));
        assert!(pos(&resolved, "b") < pos(&resolved, "a"));
        assert!(pos(&resolved, "c") < pos(&resolved, "a"));
    }

    #[test]
    fn test_late_dependency_is_moved_before_its_dependent() {
        // b is requested alone first, then a shows up needing it.
        let mut index = minilays(vec![minibuild("a", &["b"]), minibuild("b", &[])]);
        let resolved = resolve(&mut index, &["b", "a"]).unwrap();
        assert_eq!(names(&resolved), vec!["b", "a"]);

        let mut index = minilays(vec![minibuild("b", &["a"]), minibuild("a", &[])]);
        let resolved = resolve(&mut index, &["b"]).unwrap();
        assert_eq!(names(&resolved), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicates_are_removed() {
        let mut index = minilays(vec![minibuild("a", &[]), minibuild("b", &["a"])]);
        let resolved = resolve(&mut index, &["a", "a", "b"]).unwrap();
        assert_eq!(names(&resolved), vec!["a", "b"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut index = minilays(vec![
            minibuild("app", &["lib", "meta-tools"]),
            minibuild("meta-tools", &["tool", "lib"]),
            minibuild("tool", &["base"]),
            minibuild("lib", &["base"]),
            minibuild("base", &[]),
        ]);
        let first = resolve(&mut index, &["app"]).unwrap();
        let second = resolve(&mut index, &["app"]).unwrap();
        assert_eq!(names(&first), names(&second));
        for mb in &first {
            for dep in &mb.dependencies {
                assert!(pos(&first, dep) < pos(&first, &mb.name), "{dep} before {}", mb.name);
            }
        }
    }

    #[test]
    fn test_cycle_detection() {
        let mut index = minilays(vec![minibuild("a", &["b"]), minibuild("b", &["a"])]);
        let err = resolve(&mut index, &["a"]).unwrap_err();
        match &err {
            ResolveError::Circular { package, chain } => {
                assert_eq!(package, "a");
                assert_eq!(chain, &vec![PackageName::from("a"), PackageName::from("b"), PackageName::from("a")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("Circular dependency"));
        assert!(message.contains("a -> b -> a"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut index = minilays(vec![minibuild("a", &["a"])]);
        assert!(matches!(
            resolve(&mut index, &["a"]),
            Err(ResolveError::Circular { .. })
        ));
    }

    #[test]
    fn test_missing_transitive_dependency() {
        let mut index = minilays(vec![minibuild("a", &["b"]), minibuild("b", &["zz"])]);
        let err = resolve(&mut index, &["a"]).unwrap_err();
        match err {
            ResolveError::NotFound { name, required_by } => {
                assert_eq!(name, "zz");
                assert_eq!(required_by, Some(PackageName::from("b")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            resolve(&mut index, &["nope"]),
            Err(ResolveError::NotFound { required_by: None, .. })
        ));
    }

    #[test]
    fn test_deep_chain() {
        let count = 500;
        let entries: Vec<Minibuild> = (0..count)
            .map(|i| {
                let name = format!("p{i}");
                let dep = format!("p{}", i + 1);
                if i + 1 < count {
                    minibuild(&name, &[dep.as_str()])
                } else {
                    minibuild(&name, &[])
                }
            })
            .collect();
        let mut index = minilays(entries);
        let resolved = resolve(&mut index, &["p0"]).unwrap();
        assert_eq!(resolved.len(), count);
        assert_eq!(resolved[0].name, format!("p{}", count - 1).as_str());
        assert_eq!(resolved[count - 1].name, "p0");
    }
}
