use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::Engine;
use crate::fetchers::{FetchError, FetchOptions, Fetcher};

/// Outcome of [`Engine::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Minilays updated from their repository.
    pub updated: Vec<PathBuf>,
    /// Minilays that are not working copies.
    pub unversioned: Vec<PathBuf>,
    /// Minilays whose update failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl SyncReport {
    /// Whether every versioned minilay was updated.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn update_minilay(fetcher: &dyn Fetcher, path: &Path) -> Result<(), FetchError> {
    let uri = fetcher
        .recorded_uri(path)?
        .ok_or_else(|| FetchError::Update {
            uri: String::new(),
            dest: path.to_path_buf(),
            reason: "the working copy records no uri".to_string(),
        })?;
    fetcher.update(path, &uri, &FetchOptions::default())
}

impl Engine {
    /// Update every minilay that is a version control working copy.
    ///
    /// A failing minilay is reported and does not stop the others.
    pub fn sync(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if self.options.offline {
            self.reporter.warning("Offline mode, minilays are not synced");
            return report;
        }
        self.reporter.section("Syncing minilays");

        for minilay in self.minilays.iter() {
            let path = minilay.path();
            let fetcher = self
                .fetchers
                .iter()
                .find(|f| f.metadata_dir().is_some_and(|dir| path.join(dir).is_dir()));
            let Some(fetcher) = fetcher else {
                info!("{} is not versioned, skipping", path.display());
                self.reporter
                    .info(&format!("{} is not under version control", path.display()));
                report.unversioned.push(path.to_path_buf());
                continue;
            };

            info!("Syncing {} with {}", path.display(), fetcher.name());
            match update_minilay(fetcher, path) {
                Ok(()) => {
                    self.reporter.success(&format!("{} updated", path.display()));
                    report.updated.push(path.to_path_buf());
                }
                Err(e) => {
                    warn!("Cannot sync {}: {e}", path.display());
                    self.reporter
                        .warning(&format!("Cannot sync {}: {e}", path.display()));
                    report.failed.push((path.to_path_buf(), e.to_string()));
                }
            }
        }
        report
    }
}
