//! adb-courier shared types
//!
//! This crate provides the value types, error taxonomy and bridge text codec
//! used by the command executor, the connection manager and the task
//! orchestrator.

pub mod codec;
pub mod error;
pub mod state_machine;

pub use error::DispatchError;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default tuning for bridge commands and deferred jobs
pub mod defaults {
    use std::time::Duration;

    /// Additional attempts after the first failure of a retryable command
    pub const MAX_RETRY: u32 = 3;

    /// Fixed delay between two attempts of the same command
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

    /// Wall-clock bound for a single bridge process
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

    /// How late a job may still run after its fire time
    pub const MISFIRE_GRACE: Duration = Duration::from_secs(120);

    /// Remote storage root used when a device id has no configured root
    pub const REMOTE_ROOT: &str = "/sdcard/DCIM/Courier";
}

/// A configured device and its last observed reachability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable, user-facing key
    pub name: String,
    /// Bridge-level address (serial or host:port)
    pub id: String,
    pub connected: bool,
    /// Milliseconds since epoch of the last reachability check, 0 if never checked
    pub last_checked_ms: u64,
}

impl Device {
    /// Create a device that has never been checked
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            connected: false,
            last_checked_ms: 0,
        }
    }

    /// Record the outcome of a reachability check
    pub fn observe(&mut self, connected: bool, timestamp_ms: u64) {
        self.connected = connected;
        self.last_checked_ms = timestamp_ms;
    }
}

/// One invocation of the bridge binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub args: Vec<String>,
    pub retryable: bool,
    pub timeout: Duration,
}

impl Command {
    /// Create a retryable command with the default timeout
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            retryable: true,
            timeout: defaults::COMMAND_TIMEOUT,
        }
    }

    /// `devices`: list every device the bridge currently sees
    pub fn devices() -> Self {
        Self::new(["devices"])
    }

    /// `connect <id>`: ask the bridge to (re)attach a network device
    pub fn connect(device_id: &str) -> Self {
        Self::new(["connect", device_id])
    }

    /// `shell <cmd>` on the remote device
    pub fn shell(remote_command: impl Into<String>) -> Self {
        Self::new(["shell".to_string(), remote_command.into()])
    }

    /// `push <local> <remote>`
    pub fn push(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self::new(["push".to_string(), local.into(), remote.into()])
    }

    pub fn with_retry(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argument vector addressed at one device (`-s <id> ...`)
    pub fn targeted(&self, device_id: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push("-s".to_string());
        argv.push(device_id.to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Why a command did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Process exited with a non-zero status
    NonZeroExit,
    /// Bridge binary could not be started
    Launch,
    /// Process exceeded its wall-clock bound and was killed
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NonZeroExit => write!(f, "non-zero exit"),
            FailureKind::Launch => write!(f, "launch failure"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of running a command, never partially populated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Captured standard output, trimmed
    Completed { output: String },
    /// Final failure after all permitted attempts
    Failed {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },
}

impl CommandResult {
    /// Create a completed result from raw stdout
    pub fn completed(stdout: &str) -> Self {
        Self::Completed {
            output: stdout.trim().to_string(),
        }
    }

    /// Create a failed result
    pub fn failed(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Convert into the error taxonomy used by callers
    pub fn into_result(self) -> Result<String, DispatchError> {
        match self {
            Self::Completed { output } => Ok(output),
            Self::Failed {
                kind: FailureKind::Timeout,
                message,
                attempts,
            } => Err(DispatchError::Timeout {
                detail: message,
                attempts,
            }),
            Self::Failed {
                message, attempts, ..
            } => Err(DispatchError::CommandFailed {
                stderr: message,
                attempts,
            }),
        }
    }
}
