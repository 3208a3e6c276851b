//! Real bridge backend: spawns the adb binary as a child process

use super::traits::{BridgeOutput, BridgeRunner};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Spawns `<program> <args...>` through tokio's non-blocking process API
#[derive(Debug, Clone)]
pub struct AdbProcess {
    program: PathBuf,
    label: String,
}

impl AdbProcess {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = program.display().to_string();
        Self { program, label }
    }
}

#[async_trait]
impl BridgeRunner for AdbProcess {
    async fn invoke(&self, args: &[String]) -> std::io::Result<BridgeOutput> {
        debug!("[BRIDGE] {} {}", self.label, args.join(" "));

        // kill_on_drop: a caller timeout drops this future and must reap the child
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = child.wait_with_output().await?;

        Ok(BridgeOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}
