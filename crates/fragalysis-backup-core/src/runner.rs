//! One invocation of a tier.
//!
//! ```text
//! check root ─▶ lock tier ─┬─▶ busy ─────────────────────────▶ done
//!                          └─▶ produce | promote ─▶ prune ─▶ done
//! ```
//!
//! Pruning runs after every outcome that got past the lock, including a
//! failed dump, so a tier never stays over its retention count.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::dump::DumpProducer;
use crate::error::{EXIT_BUSY, EXIT_DUMP_FAILED};
use crate::evaluator::{self, TierOutcome};
use crate::lock::{LockAttempt, RunLock, RunLockMetadata};
use crate::naming::{ArtifactNaming, format_timestamp};
use crate::retention::{PruneSummary, enforce_retention};
use crate::tier::{Tier, TierPolicy};
use crate::Result;

/// How a run ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Another run holds the tier lock; nothing was touched.
    Busy { holder: Option<RunLockMetadata> },
    /// The tier action ran.
    Completed(TierOutcome),
}

impl RunOutcome {
    /// Process exit code. Under `strict`, a dump that yielded no artifact is
    /// a failure.
    #[must_use]
    pub fn exit_code(&self, strict: bool) -> u8 {
        match self {
            Self::Busy { .. } => EXIT_BUSY,
            Self::Completed(outcome) if strict && outcome.is_dump_failure() => EXIT_DUMP_FAILED,
            Self::Completed(_) => 0,
        }
    }
}

/// Everything a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tier: Tier,
    pub outcome: RunOutcome,
    /// `None` when the run was busy.
    pub prune: Option<PruneSummary>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Runs one tier against a backup root.
pub struct BackupRunner<P> {
    policy: TierPolicy,
    root: PathBuf,
    naming: ArtifactNaming,
    producer: P,
}

impl<P: DumpProducer> BackupRunner<P> {
    /// Build a runner from validated configuration.
    pub fn new(config: &BackupConfig, producer: P) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            config.tier_policy()?,
            config.root_path(),
            config.naming.clone(),
            producer,
        ))
    }

    pub fn from_parts(
        policy: TierPolicy,
        root: PathBuf,
        naming: ArtifactNaming,
        producer: P,
    ) -> Self {
        Self {
            policy,
            root,
            naming,
            producer,
        }
    }

    /// Run the tier once. `now` becomes the artifact timestamp for hourly.
    pub fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let clock = Instant::now();
        let tier = self.policy.tier;
        info!(%tier, started_at = %format_timestamp(now), "Hello");

        let dir = evaluator::ensure_tier_dir(&self.root, tier)?;

        let _lock = match RunLock::try_acquire(&dir, tier, now)? {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Held(holder) => {
                match &holder {
                    Some(meta) => warn!(
                        %tier,
                        pid = meta.pid,
                        since = %meta.started_at,
                        "Another {tier} backup is running. Leaving."
                    ),
                    None => warn!(%tier, "Another {tier} backup is running. Leaving."),
                }
                return Ok(RunReport {
                    tier,
                    outcome: RunOutcome::Busy { holder },
                    prune: None,
                    started_at: now,
                    elapsed: clock.elapsed(),
                });
            }
        };

        let outcome =
            evaluator::evaluate(&self.policy, &self.root, &self.naming, &self.producer, now)?;
        let prune = enforce_retention(&dir, &self.naming, self.policy.retention_count)?;
        if !prune.is_clean() {
            warn!(
                failed = prune.failed.len(),
                "Some expired backups could not be removed"
            );
        }

        let elapsed = clock.elapsed();
        info!(%tier, elapsed_ms = elapsed.as_millis() as u64, "Done");

        Ok(RunReport {
            tier,
            outcome: RunOutcome::Completed(outcome),
            prune: Some(prune),
            started_at: now,
            elapsed,
        })
    }
}
