//! Error types for fragalysis-backup-core

use std::fmt::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit code for a configuration error.
pub const EXIT_CONFIG: u8 = 1;
/// Process exit code when the backup root is absent.
pub const EXIT_ENVIRONMENT: u8 = 3;
/// Process exit code when another run holds the tier lock.
pub const EXIT_BUSY: u8 = 4;
/// Process exit code for an I/O failure during a run.
pub const EXIT_IO: u8 = 5;
/// Process exit code for a failed dump under `--strict`.
pub const EXIT_DUMP_FAILED: u8 = 6;

/// Main error type for fragalysis-backup-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Environment errors (the backup volume is not where it should be)
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run lock could not be taken or released
    #[error("Lock error: {0}")]
    Lock(String),
}

impl Error {
    /// Exit code the CLI reports for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Environment(_) => EXIT_ENVIRONMENT,
            Self::Io(_) | Self::Json(_) | Self::Lock(_) => EXIT_IO,
        }
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Environment(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions on the backup volume, then retry.")
                    .command("Inspect volume", "ls -la /backup")
                    .alternative("Verify the tier directory is writable by this user."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Lock metadata could not be encoded. Retry the run.")
                    .command("Inspect locks", "ls -la /backup/*/.fbackup.lock*"),
            ),
            Self::Lock(_) => Some(
                Remediation::new("The tier lock file could not be used.")
                    .command("Inspect locks", "ls -la /backup/*/.fbackup.lock*")
                    .alternative("Remove a lock file only when no fbackup process is running."),
            ),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unexpected backup type: {0} (expected hourly, daily, weekly or monthly)")]
    UnknownTier(String),

    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Invalid number for {name}: {value}")]
    InvalidNumber { name: String, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::UnknownTier(_) => Remediation::new(
                "Set BACKUP_TYPE to one of hourly, daily, weekly or monthly.",
            )
            .command("Show setting", "echo $BACKUP_TYPE"),
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path or rely on environment variables."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\"")),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .command("Show effective config", "fbackup run --help"),
            Self::InvalidNumber { name, .. } => {
                Remediation::new(format!("{name} must be a positive whole number."))
                    .command("Show setting", format!("echo ${name}"))
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Show settings", "env | grep ^BACKUP_")
                    .alternative("A tier promotes only from its immediate predecessor.")
            }
        }
    }
}

/// Errors about the surrounding environment rather than the configuration.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Backup root directory does not exist ({0})")]
    RootMissing(PathBuf),

    #[error("Backup root is not a directory ({0})")]
    RootNotDirectory(PathBuf),
}

impl EnvironmentError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::RootMissing(path) | Self::RootNotDirectory(path) => Remediation::new(format!(
                "Mount the backup volume at {} before running.",
                path.display()
            ))
            .command("Check mount", format!("ls -ld \"{}\"", path.display()))
            .alternative("Point BACKUP_ROOT_DIR (or --root) at the mounted volume."),
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
