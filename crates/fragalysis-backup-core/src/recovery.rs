//! Read-only view of every artifact on the backup volume, and the choice of
//! which one to restore from.
//!
//! The catalog never modifies the volume. Entries are keyed by tier
//! directory and file name, so a file promoted into several tiers appears
//! once per tier.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::EnvironmentError;
use crate::naming::ArtifactNaming;
use crate::tier::Tier;
use crate::Result;

/// One artifact found on the volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Name of the directory the artifact lives in (normally a tier name).
    pub tier: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Timestamp decoded from the name, if the name follows the scheme.
    pub created_at: Option<DateTime<Utc>>,
}

/// Which artifact to restore from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySelector {
    /// List only.
    None,
    /// The artifact with the newest timestamp.
    Latest,
    /// The first artifact whose name contains this text.
    Matching(String),
}

impl RecoverySelector {
    /// Parse a `FROM_BACKUP` value. Input is upper-cased first, so an
    /// ISO-8601 fragment like `2018-06-25t21` still matches.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim().to_uppercase();
        match value.as_str() {
            "" | "LATEST" => Self::Latest,
            "NONE" => Self::None,
            _ => Self::Matching(value),
        }
    }
}

/// Result of applying a selector to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The selector was `NONE`; nothing to restore.
    ListOnly,
    /// Nothing on the volume satisfies the selector.
    NotFound,
    /// The chosen artifact, and how many distinct file names matched.
    Found {
        entry: CatalogEntry,
        distinct_matches: usize,
    },
}

/// All artifacts under a backup root.
#[derive(Debug, Clone, Default)]
pub struct BackupCatalog {
    entries: Vec<CatalogEntry>,
}

impl BackupCatalog {
    /// Scan each directory directly under `root` for artifacts.
    ///
    /// Known tiers come first in chain order, then any other directory in
    /// name order.
    pub fn scan(root: &Path, naming: &ArtifactNaming) -> Result<Self> {
        if !root.is_dir() {
            return Err(EnvironmentError::RootMissing(root.to_path_buf()).into());
        }

        let mut dirs: Vec<(usize, String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let rank = name
                .parse::<Tier>()
                .ok()
                .filter(|t| t.as_str() == name)
                .map_or(Tier::ALL.len(), Tier::rank);
            dirs.push((rank, name, entry.path()));
        }
        dirs.sort();

        let mut entries = Vec::new();
        for (_, tier, dir) in dirs {
            for path in naming.list_sorted(&dir)? {
                let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                let created_at = naming.decode(&file_name).map(|n| n.created_at);
                entries.push(CatalogEntry {
                    tier: tier.clone(),
                    file_name,
                    path,
                    created_at,
                });
            }
        }
        Ok(Self { entries })
    }

    /// Entries in scan order (tier, then oldest first).
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct artifact file names, sorted.
    #[must_use]
    pub fn file_names(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.file_name.as_str()).collect()
    }

    /// Entries in one tier directory, newest first.
    #[must_use]
    pub fn in_tier(&self, tier: &str) -> Vec<&CatalogEntry> {
        let mut found: Vec<_> = self.entries.iter().filter(|e| e.tier == tier).collect();
        found.reverse();
        found
    }

    /// Apply `selector`.
    #[must_use]
    pub fn select(&self, selector: &RecoverySelector) -> Selection {
        match selector {
            RecoverySelector::None => Selection::ListOnly,
            RecoverySelector::Latest => self.latest(),
            RecoverySelector::Matching(fragment) => self.matching(fragment),
        }
    }

    fn latest(&self) -> Selection {
        // Scan order puts lower tiers first; `max_by` keeps the last maximum,
        // so iterate in reverse to prefer the lowest tier on ties.
        let newest = self
            .entries
            .iter()
            .rev()
            .filter(|e| e.created_at.is_some())
            .max_by(|a, b| a.created_at.cmp(&b.created_at));
        match newest {
            Some(entry) => Selection::Found {
                entry: entry.clone(),
                distinct_matches: 1,
            },
            None => Selection::NotFound,
        }
    }

    fn matching(&self, fragment: &str) -> Selection {
        let mut hits: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| e.file_name.contains(fragment))
            .collect();
        hits.sort_by(|a, b| chronological(a, b));

        let distinct_matches = hits
            .iter()
            .map(|e| e.file_name.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        match hits.first() {
            Some(entry) => Selection::Found {
                entry: (*entry).clone(),
                distinct_matches,
            },
            None => Selection::NotFound,
        }
    }

    /// Log every known artifact name, the way an operator browses the volume.
    pub fn log_known(&self) {
        info!(count = self.file_names().len(), "Known backups...");
        if self.is_empty() {
            info!("    None");
        }
        for entry in &self.entries {
            info!(tier = %entry.tier, "    {}/{}", entry.tier, entry.file_name);
        }
    }
}

/// Order by file name (chronological for well-formed names). `sort_by` is
/// stable, so equal names keep scan (tier) order.
fn chronological(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    a.file_name.cmp(&b.file_name)
}
