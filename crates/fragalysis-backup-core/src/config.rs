//! Configuration management for fbackup
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults (24 hourly, 7 daily, 4 weekly, 12 monthly)
//! 2. an optional TOML file
//! 3. environment variables (`BACKUP_TYPE`, `BACKUP_COUNT`, ...)
//! 4. command-line flags, applied by the binary
//!
//! Everything is validated before the first filesystem mutation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dump::{DEFAULT_DUMP_COMMAND, ShellDumpProducer};
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogLevel};
use crate::naming::ArtifactNaming;
use crate::recovery::RecoverySelector;
use crate::tier::{PromotionTrigger, Tier, TierPolicy};

pub const ENV_TYPE: &str = "BACKUP_TYPE";
pub const ENV_COUNT: &str = "BACKUP_COUNT";
pub const ENV_PRIOR_TYPE: &str = "BACKUP_PRIOR_TYPE";
pub const ENV_PRIOR_COUNT: &str = "BACKUP_PRIOR_COUNT";
pub const ENV_ROOT_DIR: &str = "BACKUP_ROOT_DIR";
pub const ENV_TRIGGER: &str = "BACKUP_PROMOTION_TRIGGER";
pub const ENV_DUMP_COMMAND: &str = "BACKUP_DUMP_COMMAND";
pub const ENV_DUMP_TIMEOUT: &str = "BACKUP_DUMP_TIMEOUT_SECS";
pub const ENV_PG_HOST: &str = "PGHOST";
pub const ENV_PG_USER: &str = "PGUSER";
pub const ENV_FROM_BACKUP: &str = "FROM_BACKUP";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Tier this invocation runs
    pub tier: Tier,

    /// Retention count; `None` uses the tier default
    pub count: Option<usize>,

    /// Tier to promote from; `None` uses the tier's predecessor
    pub prior_tier: Option<Tier>,

    /// Prior-tier population that triggers a promotion
    pub prior_count: Option<usize>,

    /// Volume holding one sub-directory per tier
    #[serde(default = "default_root_dir")]
    pub root_dir: String,

    pub trigger: PromotionTrigger,

    pub naming: ArtifactNaming,

    pub dump: DumpConfig,

    pub recovery: RecoveryConfig,

    pub log: LogConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Hourly,
            count: None,
            prior_tier: None,
            prior_count: None,
            root_dir: default_root_dir(),
            trigger: PromotionTrigger::default(),
            naming: ArtifactNaming::default(),
            dump: DumpConfig::default(),
            recovery: RecoveryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_root_dir() -> String {
    "/backup".to_string()
}

/// Dump command settings (hourly tier only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Shell command writing the live file; `{live}` is replaced by its path
    #[serde(default = "default_dump_command")]
    pub command: String,

    /// Kill the command after this many seconds (0 disables the limit)
    #[serde(default = "default_dump_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_pg")]
    pub pg_host: String,

    #[serde(default = "default_pg")]
    pub pg_user: String,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            command: default_dump_command(),
            timeout_secs: default_dump_timeout(),
            pg_host: default_pg(),
            pg_user: default_pg(),
        }
    }
}

fn default_dump_command() -> String {
    DEFAULT_DUMP_COMMAND.to_string()
}

fn default_dump_timeout() -> u64 {
    3 * 60 * 60
}

fn default_pg() -> String {
    "postgres".to_string()
}

/// Recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// `LATEST`, `NONE`, or a fragment of an artifact name
    #[serde(default = "default_from_backup")]
    pub from_backup: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            from_backup: default_from_backup(),
        }
    }
}

fn default_from_backup() -> String {
    "LATEST".to_string()
}

impl BackupConfig {
    /// Load a TOML config file.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` returns the value of a variable, or `None` when unset. Empty
    /// values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get(ENV_TYPE) {
            self.tier = value.parse()?;
        }
        if let Some(value) = get(ENV_COUNT) {
            self.count = Some(parse_count(ENV_COUNT, &value)?);
        }
        if let Some(value) = get(ENV_PRIOR_TYPE) {
            let tier = value.parse::<Tier>().map_err(|_| {
                ConfigError::ValidationError(format!("unknown {ENV_PRIOR_TYPE} '{value}'"))
            })?;
            self.prior_tier = Some(tier);
        }
        if let Some(value) = get(ENV_PRIOR_COUNT) {
            self.prior_count = Some(parse_count(ENV_PRIOR_COUNT, &value)?);
        }
        if let Some(value) = get(ENV_ROOT_DIR) {
            self.root_dir = value;
        }
        if let Some(value) = get(ENV_TRIGGER) {
            self.trigger = value.parse()?;
        }
        if let Some(value) = get(ENV_DUMP_COMMAND) {
            self.dump.command = value;
        }
        if let Some(value) = get(ENV_DUMP_TIMEOUT) {
            self.dump.timeout_secs = value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                name: ENV_DUMP_TIMEOUT.to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = get(ENV_PG_HOST) {
            self.dump.pg_host = value;
        }
        if let Some(value) = get(ENV_PG_USER) {
            self.dump.pg_user = value;
        }
        if let Some(value) = get(ENV_FROM_BACKUP) {
            self.recovery.from_backup = value;
        }
        Ok(())
    }

    /// Reject settings that would break the rotation invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tier_policy()?;

        if self.root_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backup root directory must not be empty".to_string(),
            ));
        }
        if self.tier.is_producer() && self.dump.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "dump command must not be empty".to_string(),
            ));
        }

        let naming = &self.naming;
        if naming.prefix.is_empty() || naming.source_label.is_empty() {
            return Err(ConfigError::ValidationError(
                "artifact prefix and source label must not be empty".to_string(),
            ));
        }
        if [&naming.prefix, &naming.source_label]
            .iter()
            .any(|part| part.contains('/') || part.starts_with('.'))
        {
            return Err(ConfigError::ValidationError(
                "artifact prefix and source label must be plain file names".to_string(),
            ));
        }
        // The live file shares the tier directory with the artifacts.
        if naming.matches(naming.live_file_name()) {
            return Err(ConfigError::ValidationError(format!(
                "source label '{}' must not start with the prefix '{}'",
                naming.source_label, naming.prefix
            )));
        }

        self.log
            .level
            .parse::<LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        Ok(())
    }

    /// Resolve the policy for the configured tier.
    ///
    /// The hourly tier has no prior tier; a configured one is ignored.
    pub fn tier_policy(&self) -> Result<TierPolicy, ConfigError> {
        let defaults = TierPolicy::default_for(self.tier);
        let prior_tier = if self.tier.is_producer() {
            None
        } else {
            self.prior_tier.or(defaults.prior_tier)
        };
        TierPolicy::new(
            self.tier,
            self.count.unwrap_or(defaults.retention_count),
            prior_tier,
            self.prior_count.unwrap_or(defaults.prior_required_count),
            self.trigger,
        )
    }

    /// Backup root with `~` expanded.
    #[must_use]
    pub fn root_path(&self) -> PathBuf {
        expand_tilde(&self.root_dir)
    }

    /// The shell producer described by `[dump]`.
    #[must_use]
    pub fn dump_producer(&self) -> ShellDumpProducer {
        let mut producer = ShellDumpProducer::new(&self.dump.command)
            .with_env(ENV_PG_HOST, &self.dump.pg_host)
            .with_env(ENV_PG_USER, &self.dump.pg_user);
        if self.dump.timeout_secs > 0 {
            producer = producer.with_timeout(Duration::from_secs(self.dump.timeout_secs));
        }
        producer
    }

    /// The configured recovery selector.
    #[must_use]
    pub fn recovery_selector(&self) -> RecoverySelector {
        RecoverySelector::parse(&self.recovery.from_backup)
    }

    /// `NAME = value` lines echoed at the start of a run.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("{ENV_TYPE} = {}", self.tier)];
        match self.tier_policy() {
            Ok(policy) => {
                lines.push(format!("{ENV_COUNT} = {}", policy.retention_count));
                lines.push(format!(
                    "BACKUP_DIR = {}",
                    crate::evaluator::tier_dir(&self.root_path(), policy.tier).display()
                ));
                if let Some(prior) = policy.prior_tier {
                    lines.push(format!("{ENV_PRIOR_TYPE} = {prior}"));
                    lines.push(format!(
                        "{ENV_PRIOR_COUNT} = {}",
                        policy.prior_required_count
                    ));
                    lines.push(format!("{ENV_TRIGGER} = {}", policy.trigger));
                } else {
                    lines.push(format!("{ENV_PG_HOST} = {}", self.dump.pg_host));
                    lines.push(format!("{ENV_PG_USER} = {}", self.dump.pg_user));
                }
            }
            Err(e) => lines.push(format!("# invalid policy: {e}")),
        }
        lines
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Expand a leading `~` to the home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(suffix) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(suffix);
        }
    }
    PathBuf::from(path)
}
