//! Error taxonomy for device dispatch

use thiserror::Error;

/// Errors surfaced by the registry, the executor and the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Device name absent from the configured mapping, never retried
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Command failed after {attempts} attempt(s): {stderr}")]
    CommandFailed { stderr: String, attempts: u32 },

    /// The bridge process was killed after exceeding its bound
    #[error("Command timed out after {attempts} attempt(s): {detail}")]
    Timeout { detail: String, attempts: u32 },

    #[error("Device unreachable: {0}")]
    ConnectionUnavailable(String),

    /// Local staging folder missing or unreadable
    #[error("Staging error: {0}")]
    Staging(String),
}
