//! Rewriting minibuilds when packages are renamed.

use std::collections::BTreeMap;

use minimerge_schema::PackageName;
use thiserror::Error;
use tracing::info;

use crate::minibuild::{MinibuildChanges, MinibuildError};
use crate::minilay::{MinilayError, Minilays};

/// Errors raised while renaming dependencies.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// A minilay cannot be loaded.
    #[error(transparent)]
    Minilay(#[from] MinilayError),

    /// A rewritten minibuild cannot be saved.
    #[error("Cannot rewrite {name}: {source}")]
    Write {
        /// Minibuild being rewritten.
        name: PackageName,
        /// Write error.
        #[source]
        source: MinibuildError,
    },
}

/// Replace every dependency on a key of `renames` by its value, in every
/// minibuild of every minilay.
///
/// Rewritten minibuilds get a new revision, so installed packages are
/// upgraded on their next merge. The names of the rewritten minibuilds
/// are returned.
///
/// # Errors
///
/// Returns an error if a minilay cannot be loaded or a minibuild cannot be
/// written back.
pub fn rename_dependencies(
    minilays: &mut Minilays,
    renames: &BTreeMap<PackageName, PackageName>,
) -> Result<Vec<PackageName>, MigrateError> {
    let mut rewritten = Vec::new();
    for minilay in minilays.iter_mut() {
        let variables = minilay.variables().clone();
        for mb in minilay.minibuilds()? {
            if !mb.raw_dependencies.iter().any(|dep| renames.contains_key(dep)) {
                continue;
            }
            let dependencies: Vec<PackageName> = mb
                .raw_dependencies
                .iter()
                .map(|dep| renames.get(dep).unwrap_or(dep).clone())
                .collect();
            let changes = MinibuildChanges {
                dependencies: Some(dependencies),
                ..MinibuildChanges::default()
            };
            let updated = mb.write(&changes, &variables).map_err(|source| MigrateError::Write {
                name: mb.name.clone(),
                source,
            })?;
            info!("{} now at revision {}", updated.name, updated.revision);
            if !rewritten.contains(&updated.name) {
                rewritten.push(updated.name.clone());
            }
            minilay.replace(updated);
        }
    }
    Ok(rewritten)
}
