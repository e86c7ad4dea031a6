//! Tier policy evaluation: the single action a tier takes per run.
//!
//! - hourly: run the dump and turn the live file into a timestamped artifact
//! - daily / weekly / monthly: copy the oldest artifact of the prior tier
//!   once the prior tier holds the required number of artifacts
//!
//! A dump that fails or writes nothing is an outcome, not an error. The
//! caller decides what exit code that deserves.

use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::dump::{DumpProducer, DumpStatus};
use crate::error::EnvironmentError;
use crate::naming::ArtifactNaming;
use crate::tier::{Tier, TierPolicy};
use crate::{Error, Result};

const PARTIAL_SUFFIX: &str = ".partial";

/// What the tier action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TierOutcome {
    /// Hourly: a new artifact was written.
    Produced { artifact: PathBuf, size_bytes: u64 },
    /// Hourly: the dump command failed or timed out.
    CommandFailed {
        code: Option<i32>,
        timed_out: bool,
    },
    /// Hourly: the dump command succeeded but left no live file.
    NoOutputProduced,
    /// Promoting tier: the oldest prior artifact was copied in.
    Promoted { artifact: PathBuf, from: PathBuf },
    /// Promoting tier: the prior tier did not satisfy the trigger.
    Skipped { prior_count: usize, required: usize },
}

impl TierOutcome {
    /// Whether the dump failed to yield an artifact.
    #[must_use]
    pub fn is_dump_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. } | Self::NoOutputProduced)
    }
}

/// Directory holding a tier's artifacts.
#[must_use]
pub fn tier_dir(root: &Path, tier: Tier) -> PathBuf {
    root.join(tier.as_str())
}

/// Check the root exists and create the tier directory if needed.
///
/// A missing root is fatal and leaves the filesystem untouched. A missing
/// tier directory is created.
pub fn ensure_tier_dir(root: &Path, tier: Tier) -> Result<PathBuf> {
    if !root.exists() {
        return Err(EnvironmentError::RootMissing(root.to_path_buf()).into());
    }
    if !root.is_dir() {
        return Err(EnvironmentError::RootNotDirectory(root.to_path_buf()).into());
    }
    let dir = tier_dir(root, tier);
    if !dir.is_dir() {
        info!(dir = %dir.display(), "Creating tier directory");
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Run the tier's action. `tier_dir` must already exist.
pub fn evaluate(
    policy: &TierPolicy,
    root: &Path,
    naming: &ArtifactNaming,
    producer: &dyn DumpProducer,
    now: DateTime<Utc>,
) -> Result<TierOutcome> {
    let dir = tier_dir(root, policy.tier);
    match policy.prior_tier {
        None => produce(&dir, naming, producer, now),
        Some(prior) => promote(&tier_dir(root, prior), &dir, naming, policy),
    }
}

/// Hourly action: dump into the live file, then rename it into an artifact.
pub fn produce(
    dir: &Path,
    naming: &ArtifactNaming,
    producer: &dyn DumpProducer,
    started_at: DateTime<Utc>,
) -> Result<TierOutcome> {
    let live = dir.join(naming.live_file_name());
    if live.exists() {
        warn!(live = %live.display(), "Warning. Live backup file exists. Replacing.");
        fs::remove_file(&live)?;
    }

    info!(started_at = %started_at.to_rfc3339(), "Starting backup");
    let clock = Instant::now();
    let status = producer.produce(&live)?;
    info!(
        elapsed_ms = clock.elapsed().as_millis() as u64,
        "Backup finished"
    );

    match status {
        DumpStatus::Succeeded => {}
        DumpStatus::Failed { code, stderr } => {
            warn!(returncode = ?code, "Backup failed");
            if !stderr.is_empty() {
                warn!(%stderr, "Dump stderr");
            }
            return Ok(TierOutcome::CommandFailed {
                code,
                timed_out: false,
            });
        }
        DumpStatus::TimedOut { after_secs } => {
            warn!(after_secs, "Backup timed out");
            return Ok(TierOutcome::CommandFailed {
                code: None,
                timed_out: true,
            });
        }
    }

    if !live.is_file() {
        info!("No backup file was generated. Leaving.");
        return Ok(TierOutcome::NoOutputProduced);
    }

    let size_bytes = fs::metadata(&live)?.len();
    info!(size_bytes, "Backup size {size_bytes} bytes");

    let artifact = dir.join(naming.encode(started_at));
    info!(
        from = %live.display(),
        to = %artifact.display(),
        "Moving live backup to artifact"
    );
    fs::rename(&live, &artifact)?;

    Ok(TierOutcome::Produced {
        artifact,
        size_bytes,
    })
}

/// Promoting action: copy the oldest prior artifact when the trigger fires.
pub fn promote(
    prior_dir: &Path,
    dir: &Path,
    naming: &ArtifactNaming,
    policy: &TierPolicy,
) -> Result<TierOutcome> {
    let prior = naming.list_sorted(prior_dir)?;
    let prior_count = prior.len();
    let required = policy.prior_required_count;

    if !policy.trigger.fires(prior_count, required) {
        info!(
            prior_count,
            required,
            trigger = %policy.trigger,
            "Nothing to do. Prior backups ({prior_count}) do not satisfy the promotion trigger"
        );
        return Ok(TierOutcome::Skipped {
            prior_count,
            required,
        });
    }

    let oldest = match prior.first() {
        Some(path) => path.clone(),
        None => {
            return Ok(TierOutcome::Skipped {
                prior_count,
                required,
            });
        }
    };

    info!(
        from = %oldest.display(),
        to = %dir.display(),
        tier = %policy.tier,
        "Copying oldest prior backup"
    );
    let artifact = copy_preserving(&oldest, dir)?;
    Ok(TierOutcome::Promoted {
        artifact,
        from: oldest,
    })
}

/// Copy `src` into `dest_dir` under the same name, keeping its timestamps.
///
/// The copy is written to a hidden `.partial` file and renamed into place,
/// so an interrupted copy never looks like an artifact.
pub fn copy_preserving(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src.file_name().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file path: {}", src.display()),
        ))
    })?;
    let dest = dest_dir.join(name);
    let partial = dest_dir.join(format!(".{}{PARTIAL_SUFFIX}", name.to_string_lossy()));

    fs::copy(src, &partial)?;

    let meta = fs::metadata(src)?;
    let mut times = FileTimes::new().set_modified(meta.modified()?);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    File::options().write(true).open(&partial)?.set_times(times)?;

    fs::rename(&partial, &dest)?;
    Ok(dest)
}
