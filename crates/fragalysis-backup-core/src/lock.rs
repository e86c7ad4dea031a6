//! Per-tier run lock.
//!
//! Every run holds an exclusive advisory lock on `<tier_dir>/.fbackup.lock`
//! for its whole duration. A second run of the same tier fails to take the
//! lock and reports the holder instead of racing on the live file.
//!
//! The lock is advisory: it only excludes other `fbackup` processes. A run
//! of a later tier reading this tier's directory is not excluded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::naming::format_timestamp;
use crate::tier::Tier;
use crate::{Error, Result};

/// Lock file name inside a tier directory.
pub const LOCK_FILE_NAME: &str = ".fbackup.lock";
const LOCK_META_SUFFIX: &str = ".meta.json";

/// Metadata about the process holding a tier lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLockMetadata {
    pub pid: u32,
    pub tier: Tier,
    pub started_at: String,
    pub version: String,
}

/// Outcome of trying to take the lock.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(RunLock),
    /// Another run holds the lock; metadata is present when readable.
    Held(Option<RunLockMetadata>),
}

/// An acquired tier lock. Released automatically on drop.
#[derive(Debug)]
pub struct RunLock {
    _lock_file: File,
    lock_path: PathBuf,
    meta_path: PathBuf,
}

impl RunLock {
    /// Try to take the lock for `tier` in `tier_dir` without blocking.
    ///
    /// `tier_dir` must already exist.
    pub fn try_acquire(tier_dir: &Path, tier: Tier, now: DateTime<Utc>) -> Result<LockAttempt> {
        let lock_path = tier_dir.join(LOCK_FILE_NAME);
        let meta_path = tier_dir.join(format!("{LOCK_FILE_NAME}{LOCK_META_SUFFIX}"));

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                let lock = Self {
                    _lock_file: lock_file,
                    lock_path,
                    meta_path,
                };
                lock.write_metadata(tier, now)?;
                debug!(lock = %lock.lock_path.display(), %tier, "Acquired run lock");
                Ok(LockAttempt::Acquired(lock))
            }
            Err(e) if is_contended(&e) => Ok(LockAttempt::Held(read_metadata(&meta_path))),
            Err(e) => Err(Error::Lock(format!(
                "cannot lock {}: {e}",
                lock_path.display()
            ))),
        }
    }

    fn write_metadata(&self, tier: Tier, now: DateTime<Utc>) -> Result<()> {
        let metadata = RunLockMetadata {
            pid: std::process::id(),
            tier,
            started_at: format_timestamp(now),
            version: crate::VERSION.to_string(),
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        let mut file = File::create(&self.meta_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.meta_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    meta_path = %self.meta_path.display(),
                    error = %e,
                    "Failed to remove run lock metadata"
                );
            }
        }
        debug!(lock = %self.lock_path.display(), "Released run lock");
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_metadata(path: &Path) -> Option<RunLockMetadata> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn acquired(attempt: LockAttempt) -> RunLock {
        match attempt {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Held(meta) => panic!("lock unexpectedly held: {meta:?}"),
        }
    }

    #[test]
    fn acquire_writes_metadata() {
        let tmp = TempDir::new().unwrap();
        let lock = acquired(RunLock::try_acquire(tmp.path(), Tier::Hourly, Utc::now()).unwrap());
        assert!(tmp.path().join(".fbackup.lock").exists());
        let meta = read_metadata(&tmp.path().join(".fbackup.lock.meta.json")).unwrap();
        assert_eq!(meta.pid, std::process::id());
        assert_eq!(meta.tier, Tier::Hourly);
    }

    #[test]
    fn second_acquire_reports_holder() {
        let tmp = TempDir::new().unwrap();
        let _lock = acquired(RunLock::try_acquire(tmp.path(), Tier::Daily, Utc::now()).unwrap());
        match RunLock::try_acquire(tmp.path(), Tier::Daily, Utc::now()).unwrap() {
            LockAttempt::Held(Some(meta)) => assert_eq!(meta.tier, Tier::Daily),
            other => panic!("expected held lock with metadata, got {other:?}"),
        }
    }

    #[test]
    fn drop_releases_lock_and_metadata() {
        let tmp = TempDir::new().unwrap();
        let lock = acquired(RunLock::try_acquire(tmp.path(), Tier::Hourly, Utc::now()).unwrap());
        drop(lock);
        assert!(!tmp.path().join(".fbackup.lock.meta.json").exists());
        let again = RunLock::try_acquire(tmp.path(), Tier::Hourly, Utc::now()).unwrap();
        assert!(matches!(again, LockAttempt::Acquired(_)));
    }

    #[test]
    fn missing_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = RunLock::try_acquire(&tmp.path().join("absent"), Tier::Hourly, Utc::now());
        assert!(result.is_err());
    }
}
