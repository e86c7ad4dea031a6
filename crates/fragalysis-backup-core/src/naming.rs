//! Artifact file names.
//!
//! An artifact is named `<prefix>-<YYYY-MM-DDTHH:MM:SSZ>-<source_label>`,
//! for example `backup-2018-06-25T21:05:07Z-dumpall.sql.gz`. The timestamp
//! is fixed-width UTC with second precision, so sorting names
//! lexicographically sorts artifacts chronologically.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default artifact prefix.
pub const DEFAULT_PREFIX: &str = "backup";
/// Default source label, also the live (staging) file name.
pub const DEFAULT_SOURCE_LABEL: &str = "dumpall.sql.gz";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_LEN: usize = "YYYY-MM-DDTHH:MM:SSZ".len();

/// Format an instant as the artifact timestamp (seconds, `Z` suffix).
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.trunc_subsecs(0).format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an artifact timestamp back into an instant.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Naming scheme shared by the writer, the pruner and the recovery tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNaming {
    pub prefix: String,
    pub source_label: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
        }
    }
}

/// A decoded artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub source_label: String,
}

impl ArtifactNaming {
    /// File name for an artifact created at `created_at`.
    #[must_use]
    pub fn encode(&self, created_at: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}",
            self.prefix,
            format_timestamp(created_at),
            self.source_label
        )
    }

    /// Decode a file name produced by [`encode`](Self::encode).
    ///
    /// Any source label is accepted so artifacts written under an older
    /// label still decode.
    #[must_use]
    pub fn decode(&self, file_name: &str) -> Option<ArtifactName> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        let stamp = rest.get(..TIMESTAMP_LEN)?;
        let label = rest.get(TIMESTAMP_LEN..)?.strip_prefix('-')?;
        let created_at = parse_timestamp(stamp)?;
        Some(ArtifactName {
            file_name: file_name.to_string(),
            created_at,
            source_label: label.to_string(),
        })
    }

    /// Listing pattern: the prefix followed by anything.
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix)
    }

    /// Name of the staging file the dump writes before it becomes an artifact.
    #[must_use]
    pub fn live_file_name(&self) -> &str {
        &self.source_label
    }

    /// Glob pattern matching this scheme's artifacts inside `dir`.
    #[must_use]
    pub fn glob_pattern(&self, dir: &Path) -> String {
        let dir = glob::Pattern::escape(&dir.display().to_string());
        let prefix = glob::Pattern::escape(&self.prefix);
        format!("{dir}/{prefix}*")
    }

    /// Artifacts in `dir`, sorted ascending (oldest first).
    ///
    /// Only regular files count. A missing directory has no artifacts.
    pub fn list_sorted(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = self.glob_pattern(dir);
        let paths = glob::glob(&pattern).map_err(|e| {
            crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid artifact pattern {pattern}: {e}"),
            ))
        })?;

        let mut found = Vec::new();
        for entry in paths {
            let path = entry.map_err(std::io::Error::from)?;
            let is_file = fs::metadata(&path).is_ok_and(|m| m.is_file());
            let named = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| self.matches(n));
            if is_file && named {
                found.push(path);
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn encode_matches_documented_example() {
        let naming = ArtifactNaming::default();
        assert_eq!(
            naming.encode(at(2018, 6, 25, 21, 5, 7)),
            "backup-2018-06-25T21:05:07Z-dumpall.sql.gz"
        );
    }

    #[test]
    fn encode_drops_fractional_seconds() {
        let naming = ArtifactNaming::default();
        let t = at(2024, 1, 2, 3, 4, 5) + chrono::Duration::milliseconds(987);
        assert_eq!(naming.encode(t), "backup-2024-01-02T03:04:05Z-dumpall.sql.gz");
    }

    #[test]
    fn decode_recovers_timestamp_and_label() {
        let naming = ArtifactNaming::default();
        let name = naming
            .decode("backup-2018-06-25T21:05:07Z-dumpall.sql.gz")
            .unwrap();
        assert_eq!(name.created_at, at(2018, 6, 25, 21, 5, 7));
        assert_eq!(name.source_label, "dumpall.sql.gz");
    }

    #[test]
    fn decode_accepts_other_labels() {
        let naming = ArtifactNaming::default();
        let name = naming.decode("backup-2020-01-01T00:00:00Z-graph.tar").unwrap();
        assert_eq!(name.source_label, "graph.tar");
    }

    #[test]
    fn decode_rejects_foreign_names() {
        let naming = ArtifactNaming::default();
        assert!(naming.decode("dumpall.sql.gz").is_none());
        assert!(naming.decode("backup-notatime-dumpall.sql.gz").is_none());
        assert!(naming.decode("backup-2018-06-25T21:05:07Z").is_none());
        assert!(naming.decode("other-2018-06-25T21:05:07Z-x").is_none());
    }

    #[test]
    fn matches_is_prefix_wildcard() {
        let naming = ArtifactNaming::default();
        assert!(naming.matches("backup-2018-06-25T21:05:07Z-dumpall.sql.gz"));
        assert!(naming.matches("backup.old"));
        assert!(!naming.matches("dumpall.sql.gz"));
        assert!(!naming.matches(".backup-x.partial"));
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("2018-13-25T21:05:07Z").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn list_sorted_orders_oldest_first_and_skips_others() {
        let tmp = TempDir::new().unwrap();
        let naming = ArtifactNaming::default();
        let newer = naming.encode(at(2024, 5, 1, 12, 0, 0));
        let older = naming.encode(at(2023, 12, 31, 23, 59, 59));
        fs::write(tmp.path().join(&newer), b"b").unwrap();
        fs::write(tmp.path().join(&older), b"a").unwrap();
        fs::write(tmp.path().join("dumpall.sql.gz"), b"live").unwrap();
        fs::create_dir(tmp.path().join("backup-dir")).unwrap();

        let listed: Vec<String> = naming
            .list_sorted(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(listed, vec![older, newer]);
    }

    #[test]
    fn list_sorted_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let naming = ArtifactNaming::default();
        assert!(naming.list_sorted(&tmp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn list_sorted_handles_glob_metacharacters_in_root() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("odd[dir]");
        fs::create_dir(&dir).unwrap();
        let naming = ArtifactNaming::default();
        fs::write(dir.join(naming.encode(at(2024, 1, 1, 0, 0, 0))), b"x").unwrap();
        assert_eq!(naming.list_sorted(&dir).unwrap().len(), 1);
    }
}
