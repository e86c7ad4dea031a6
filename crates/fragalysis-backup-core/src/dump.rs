//! The external dump producer.
//!
//! The hourly tier is the only one that creates data. It does so by running
//! an opaque command that writes the live file. This module only observes
//! the command's exit status; the live file itself is inspected by the
//! evaluator.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::Result;

/// Default shell command producing the live file.
pub const DEFAULT_DUMP_COMMAND: &str = "pg_dumpall --clean | gzip > {live}";
/// Placeholder replaced by the live file path.
pub const LIVE_PLACEHOLDER: &str = "{live}";
/// Environment variable carrying the live file path into the command.
pub const LIVE_FILE_ENV: &str = "BACKUP_LIVE_FILE";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_BYTES: usize = 4096;
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// What became of one dump attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DumpStatus {
    Succeeded,
    /// Non-zero exit, or killed by a signal (`code` is `None`).
    Failed { code: Option<i32>, stderr: String },
    TimedOut { after_secs: u64 },
}

/// Something that writes a fresh dump to the live file.
pub trait DumpProducer {
    /// Run one dump targeting `live_file`.
    ///
    /// A command that runs but fails is a `DumpStatus`, not an `Err`. `Err`
    /// is reserved for being unable to start the command at all.
    fn produce(&self, live_file: &Path) -> Result<DumpStatus>;
}

/// Runs a shell command with `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellDumpProducer {
    command: String,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
}

impl ShellDumpProducer {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    /// Kill the command if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pass an extra environment variable to the command.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The command line with `{live}` substituted.
    #[must_use]
    pub fn render(&self, live_file: &Path) -> String {
        self.command
            .replace(LIVE_PLACEHOLDER, &shell_quote(&live_file.display().to_string()))
    }
}

impl DumpProducer for ShellDumpProducer {
    fn produce(&self, live_file: &Path) -> Result<DumpStatus> {
        let rendered = self.render(live_file);
        info!(command = %rendered, "Running dump command");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&rendered)
            .envs(&self.env)
            .env(LIVE_FILE_ENV, live_file)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        // The shell leads its own group so a timeout reaches the whole pipeline.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command.spawn()?;

        let stderr = child.stderr.take().map(StderrTail::collect);

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    warn!(
                        timeout_secs = limit.as_secs(),
                        "Dump command exceeded its timeout, killing it"
                    );
                    kill_process_group(&mut child);
                    let _ = child.wait();
                    break None;
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(match status {
            Some(status) if status.success() => DumpStatus::Succeeded,
            Some(status) => DumpStatus::Failed {
                code: status.code(),
                stderr: stderr.map(StderrTail::finish).unwrap_or_default(),
            },
            None => DumpStatus::TimedOut {
                after_secs: self.timeout.map_or(0, |t| t.as_secs()),
            },
        })
    }
}

/// Stderr read on a background thread.
///
/// Background jobs left behind by the shell can hold the pipe open long
/// after it exits, so the tail is taken after a bounded wait for EOF.
struct StderrTail {
    buffer: Arc<Mutex<Vec<u8>>>,
    eof: mpsc::Receiver<()>,
}

impl StderrTail {
    fn collect(mut pipe: ChildStderr) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, eof) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 1024];
            while let Ok(n) = pipe.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&chunk[..n]);
                    let excess = buf.len().saturating_sub(STDERR_TAIL_BYTES);
                    buf.drain(..excess);
                }
            }
            let _ = tx.send(());
        });
        Self { buffer, eof }
    }

    fn finish(self) -> String {
        let _ = self.eof.recv_timeout(STDERR_GRACE);
        self.buffer
            .lock()
            .map(|buf| tail_utf8(&buf, STDERR_TAIL_BYTES))
            .unwrap_or_default()
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let signalled = i32::try_from(child.id())
        .map_err(|_| nix::errno::Errno::ESRCH)
        .and_then(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
    if let Err(err) = signalled {
        warn!(error = %err, "Could not signal the dump process group");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn shell_quote(raw: &str) -> String {
    if raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-:+".contains(c))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn tail_utf8(buf: &[u8], max: usize) -> String {
    let start = buf.len().saturating_sub(max);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}
