//! Bridge runner trait for pluggable process backends

use async_trait::async_trait;

/// Captured result of one bridge process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl BridgeOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best description of a failed run for logs and errors
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        match self.status {
            Some(code) if stdout.is_empty() => format!("exit status {}", code),
            Some(code) => format!("exit status {}: {}", code, stdout),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs the bridge binary with a full argument vector
///
/// Implementations must not block the async runtime, and dropping the
/// returned future must terminate the underlying process.
#[async_trait]
pub trait BridgeRunner: Send + Sync {
    /// Run once and capture output; `Err` means the process never started
    async fn invoke(&self, args: &[String]) -> std::io::Result<BridgeOutput>;

    /// Human-readable name for this runner
    fn name(&self) -> &str;
}
