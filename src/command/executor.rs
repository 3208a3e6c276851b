//! Command executor - runs bridge commands with bounded retry and timeout

use crate::bridge::BridgeRunner;
use courier_shared::{codec, defaults, Command, CommandResult, DispatchError, FailureKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// Retry and timeout policy for bridge commands
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Additional attempts after the first failure
    pub max_retry: u32,
    /// Fixed delay between attempts
    pub retry_interval: Duration,
    /// Bound for a single process
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retry: defaults::MAX_RETRY,
            retry_interval: defaults::RETRY_INTERVAL,
            command_timeout: defaults::COMMAND_TIMEOUT,
        }
    }
}

/// Executes commands against the device bridge
pub struct CommandExecutor {
    runner: Arc<dyn BridgeRunner>,
    config: ExecutorConfig,
    /// Processes spawned so far, retries included
    invocations: AtomicU64,
}

impl CommandExecutor {
    /// Create a new command executor
    pub fn new(runner: Arc<dyn BridgeRunner>, config: ExecutorConfig) -> Self {
        Self {
            runner,
            config,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get the number of bridge processes started
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Run `args` against one device and return its trimmed stdout
    pub async fn run(
        &self,
        device_id: &str,
        args: &[&str],
        retry: bool,
    ) -> Result<String, DispatchError> {
        let command = Command::new(args.iter().copied())
            .with_retry(retry)
            .with_timeout(self.config.command_timeout);
        self.execute(Some(device_id), &command).await.into_result()
    }

    /// Execute a command, optionally addressed at one device
    ///
    /// Non-zero exits and launch failures are retried when the command is
    /// retryable. A timeout kills the process and is surfaced at once.
    pub async fn execute(&self, device_id: Option<&str>, command: &Command) -> CommandResult {
        let argv = match device_id {
            Some(id) => command.targeted(id),
            None => command.args.clone(),
        };
        let max_attempts = if command.retryable {
            self.config.max_retry + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.invocations.fetch_add(1, Ordering::SeqCst);
            debug!(
                "[EXEC] {} {} (attempt {}/{})",
                self.runner.name(),
                argv.join(" "),
                attempt,
                max_attempts
            );

            let (kind, message) = match timeout(command.timeout, self.runner.invoke(&argv)).await {
                Ok(Ok(output)) if output.success() => {
                    return CommandResult::completed(&output.stdout);
                }
                Ok(Ok(output)) => (FailureKind::NonZeroExit, output.failure_message()),
                Ok(Err(e)) => (
                    FailureKind::Launch,
                    format!("failed to launch {}: {}", self.runner.name(), e),
                ),
                Err(_) => {
                    warn!(
                        "[EXEC] `{}` timed out after {:?}, process killed",
                        command, command.timeout
                    );
                    return CommandResult::failed(
                        FailureKind::Timeout,
                        format!("`{}` exceeded {:?}", command, command.timeout),
                        attempt,
                    );
                }
            };

            if attempt >= max_attempts {
                error!(
                    "[EXEC] `{}` failed after {} attempt(s): {}",
                    command, attempt, message
                );
                return CommandResult::failed(kind, message, attempt);
            }

            warn!(
                "[EXEC] `{}` {} (attempt {}/{}): {}",
                command, kind, attempt, max_attempts, message
            );
            // Per-call delay, other in-flight commands keep running
            sleep(self.config.retry_interval).await;
        }
    }

    /// Ids of every device the bridge reports as ready
    pub async fn list_connected(&self) -> Result<HashSet<String>, DispatchError> {
        let command = Command::devices().with_timeout(self.config.command_timeout);
        let output = self.execute(None, &command).await.into_result()?;
        Ok(codec::decode_device_list(&output).into_iter().collect())
    }

    /// Ask the bridge to attach a network device
    pub async fn connect(&self, device_id: &str) -> Result<String, DispatchError> {
        let command = Command::connect(device_id).with_timeout(self.config.command_timeout);
        self.execute(None, &command).await.into_result()
    }
}
