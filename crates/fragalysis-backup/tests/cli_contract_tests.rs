//! CLI contract tests for fbackup
//!
//! Runs the binary against a temporary backup volume. Dump commands are
//! small `sh` snippets so no database is needed.
//!
//! Contract guarantees tested:
//! - Deterministic exit codes (0, 1, 3, 4, 6)
//! - Rotation decisions narrated on stdout
//! - Stable JSON output with `--json`, narration moved to stderr
//! - Actionable error messages on stderr

#![cfg(unix)]

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use chrono::{Duration, TimeZone, Utc};
use predicates::prelude::*;
use tempfile::TempDir;

use fragalysis_backup_core::lock::{LockAttempt, RunLock};
use fragalysis_backup_core::naming::ArtifactNaming;
use fragalysis_backup_core::tier::Tier;

// =============================================================================
// Test fixture helpers
// =============================================================================

const INHERITED: &[&str] = &[
    "BACKUP_TYPE",
    "BACKUP_COUNT",
    "BACKUP_PRIOR_TYPE",
    "BACKUP_PRIOR_COUNT",
    "BACKUP_ROOT_DIR",
    "BACKUP_PROMOTION_TRIGGER",
    "BACKUP_DUMP_COMMAND",
    "BACKUP_DUMP_TIMEOUT_SECS",
    "FROM_BACKUP",
    "FBACKUP_CONFIG",
    "FBACKUP_LOG_LEVEL",
    "FBACKUP_LOG_FORMAT",
    "RUST_LOG",
];

/// fbackup pointed at `root`, isolated from the caller's environment.
#[allow(deprecated)]
fn fbackup(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fbackup").expect("fbackup binary should be built");
    for var in INHERITED {
        cmd.env_remove(var);
    }
    cmd.env("BACKUP_ROOT_DIR", root);
    cmd
}

fn seed(root: &Path, tier: &str, count: i64) {
    let naming = ArtifactNaming::default();
    let dir = root.join(tier);
    fs::create_dir_all(&dir).unwrap();
    let base = Utc.with_ymd_and_hms(2018, 6, 25, 0, 0, 0).single().unwrap();
    for h in 0..count {
        fs::write(dir.join(naming.encode(base + Duration::hours(h))), h.to_string()).unwrap();
    }
}

fn artifacts(dir: &Path) -> usize {
    ArtifactNaming::default().list_sorted(dir).unwrap().len()
}

// =============================================================================
// run
// =============================================================================

#[test]
fn hourly_run_produces_an_artifact() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "printf data > {live}")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("BACKUP_TYPE = hourly"))
        .stdout(predicate::str::contains("Backup size 4 bytes"));

    let dir = tmp.path().join("hourly");
    assert_eq!(artifacts(&dir), 1);
    assert!(!dir.join("dumpall.sql.gz").exists());
}

#[test]
fn hourly_run_prunes_to_count() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 4);
    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "printf data > \"$BACKUP_LIVE_FILE\"")
        .env("BACKUP_COUNT", "2")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removing expired backups"));
    assert_eq!(artifacts(&tmp.path().join("hourly")), 2);
}

#[test]
fn failed_dump_exits_zero_unless_strict() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "echo refused >&2; exit 1")
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Backup failed"));

    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "echo refused >&2; exit 1")
        .args(["run", "--strict"])
        .assert()
        .code(6);

    assert_eq!(artifacts(&tmp.path().join("hourly")), 0);
}

#[test]
fn dump_without_output_is_reported() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "true")
        .args(["run", "--strict"])
        .assert()
        .code(6)
        .stdout(predicate::str::contains("No backup file was generated"));
}

#[test]
fn daily_skips_until_hourly_is_full() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 23);
    fbackup(tmp.path())
        .env("BACKUP_TYPE", "daily")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do"));
    assert_eq!(artifacts(&tmp.path().join("daily")), 0);

    seed(tmp.path(), "hourly", 24);
    fbackup(tmp.path())
        .env("BACKUP_TYPE", "daily")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Copying oldest prior backup"));
    assert_eq!(artifacts(&tmp.path().join("daily")), 1);
}

#[test]
fn missing_root_exits_three() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("not-mounted");
    fbackup(&root)
        .arg("run")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("does not exist"))
        .stderr(predicate::str::contains("To fix:"));
    assert!(!root.exists());
}

#[test]
fn unknown_tier_exits_one() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .env("BACKUP_TYPE", "yearly")
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("yearly"));
    assert!(fs::read_dir(tmp.path()).unwrap().next().is_none());
}

#[test]
fn mismatched_prior_tier_exits_one() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .env("BACKUP_TYPE", "weekly")
        .env("BACKUP_PRIOR_TYPE", "hourly")
        .arg("run")
        .assert()
        .code(1);
}

#[test]
fn held_lock_exits_four() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("hourly");
    fs::create_dir_all(&dir).unwrap();
    let held = RunLock::try_acquire(&dir, Tier::Hourly, Utc::now()).unwrap();
    assert!(matches!(held, LockAttempt::Acquired(_)));

    fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "printf data > {live}")
        .arg("run")
        .assert()
        .code(4)
        .stdout(predicate::str::contains("Another hourly backup is running"));
    assert_eq!(artifacts(&dir), 0);
}

#[test]
fn run_json_report_is_parseable() {
    let tmp = TempDir::new().unwrap();
    let output = fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "printf data > {live}")
        .args(["--json", "run"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let narration = String::from_utf8_lossy(&output.stderr);
    assert!(narration.contains("BACKUP_TYPE = hourly"));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tier"], "hourly");
    assert_eq!(report["outcome"]["completed"]["outcome"], "produced");
    assert_eq!(report["prune"]["remaining"].as_array().unwrap().len(), 1);
}

#[test]
fn json_report_survives_warnings() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("hourly");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("dumpall.sql.gz"), "stale").unwrap();

    let output = fbackup(tmp.path())
        .env("BACKUP_DUMP_COMMAND", "printf data > {live}")
        .args(["--log-format", "json", "--json", "run"])
        .output()
        .unwrap();
    assert!(output.status.success());

    assert!(String::from_utf8_lossy(&output.stderr).contains("WARN"));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"]["completed"]["outcome"], "produced");
}

#[test]
fn config_file_is_honoured() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("fbackup.toml");
    fs::write(
        &config,
        "tier = \"daily\"\nprior_count = 2\n\n[log]\nlevel = \"info\"\n",
    )
    .unwrap();
    seed(tmp.path(), "hourly", 2);

    fbackup(tmp.path())
        .args(["--config", config.to_str().unwrap(), "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BACKUP_PRIOR_COUNT = 2"));
    assert_eq!(artifacts(&tmp.path().join("daily")), 1);
}

// =============================================================================
// recover / list
// =============================================================================

#[test]
fn recover_latest_prints_newest_path() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 3);
    seed(tmp.path(), "daily", 1);
    fbackup(tmp.path())
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "hourly/backup-2018-06-25T02:00:00Z-dumpall.sql.gz",
        ));
}

#[test]
fn recover_none_only_lists() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 1);
    fbackup(tmp.path())
        .env("FROM_BACKUP", "none")
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Known backups"))
        .stdout(predicate::str::contains("Nothing to do"));
}

#[test]
fn recover_on_empty_volume_exits_zero() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("there are no backups"));
}

#[test]
fn recover_by_timestamp() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 3);
    let output = fbackup(tmp.path())
        .args(["--json", "recover", "--from", "2018-06-25t01"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(
        parsed["selected"]
            .as_str()
            .unwrap()
            .ends_with("backup-2018-06-25T01:00:00Z-dumpall.sql.gz")
    );
    assert_eq!(parsed["distinct_matches"], 1);
}

#[test]
fn list_groups_by_tier() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "hourly", 2);
    seed(tmp.path(), "weekly", 1);
    fbackup(tmp.path())
        .args(["--log-level", "error", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hourly (2)"))
        .stdout(predicate::str::contains("weekly (1)"));

    fbackup(tmp.path())
        .args(["--log-level", "error", "list", "--tier", "weekly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hourly").not());
}

#[test]
fn list_missing_root_exits_three() {
    let tmp = TempDir::new().unwrap();
    fbackup(&tmp.path().join("absent"))
        .arg("list")
        .assert()
        .code(3);
}

#[test]
fn invalid_log_level_exits_one() {
    let tmp = TempDir::new().unwrap();
    fbackup(tmp.path())
        .args(["--log-level", "chatty", "list"])
        .assert()
        .code(1);
}
