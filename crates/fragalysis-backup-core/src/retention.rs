//! Retention enforcement for a single tier directory.
//!
//! Keeps the newest `retention_count` artifacts and deletes the rest,
//! oldest first. Deletion is fail-soft: a file that cannot be removed is
//! logged and recorded, and the remaining deletions still run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::Result;
use crate::naming::ArtifactNaming;

/// Summary of one pruning pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    /// Artifacts deleted, oldest first.
    pub removed: Vec<PathBuf>,
    /// Artifacts that should have been deleted but could not be.
    pub failed: Vec<(PathBuf, String)>,
    /// File names left in the directory, newest first.
    pub remaining: Vec<String>,
}

impl PruneSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Number of artifacts to delete so that at most `retention_count` remain.
#[must_use]
pub const fn excess(count: usize, retention_count: usize) -> usize {
    count.saturating_sub(retention_count)
}

/// Bound the artifacts in `dir` to `retention_count`.
pub fn enforce_retention(
    dir: &Path,
    naming: &ArtifactNaming,
    retention_count: usize,
) -> Result<PruneSummary> {
    prune_with(dir, naming, retention_count, |path| fs::remove_file(path))
}

fn prune_with<F>(
    dir: &Path,
    naming: &ArtifactNaming,
    retention_count: usize,
    remove: F,
) -> Result<PruneSummary>
where
    F: Fn(&Path) -> io::Result<()>,
{
    let existing = naming.list_sorted(dir)?;
    let to_delete = excess(existing.len(), retention_count);

    let mut summary = PruneSummary::default();
    if to_delete > 0 {
        info!(
            dir = %dir.display(),
            count = existing.len(),
            retention_count,
            "Removing expired backups..."
        );
        for path in existing.iter().take(to_delete) {
            info!(path = %path.display(), "    {}", path.display());
            match remove(path) {
                Ok(()) => summary.removed.push(path.clone()),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove expired backup"
                    );
                    summary.failed.push((path.clone(), e.to_string()));
                }
            }
        }
    } else {
        info!(dir = %dir.display(), "No expired backups to delete");
    }

    let mut remaining: Vec<String> = naming
        .list_sorted(dir)?
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    remaining.reverse();
    if !remaining.is_empty() {
        info!(count = remaining.len(), "Remaining backups ({})...", remaining.len());
        for name in &remaining {
            info!("    {name}");
        }
    }
    summary.remaining = remaining;

    Ok(summary)
}
