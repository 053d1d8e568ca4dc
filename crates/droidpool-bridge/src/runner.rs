//! External command execution.
//!
//! All fastboot/adb/emulator invocations go through `CommandRunner` so the
//! pool can be driven with a fake in tests and so every external command
//! carries a bounded timeout.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

/// Outcome class of a timed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited with code 0.
    Success,
    /// Exited with a non-zero code.
    Failed,
    /// Killed after the timeout elapsed.
    TimedOut,
    /// Could not be spawned or waited on.
    Exception,
}

/// Captured result of a timed command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub(crate) fn exception() -> Self {
        Self {
            status: CommandStatus::Exception,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Runs external commands on behalf of the pool.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion, killing it once `timeout` elapses.
    async fn run_timed(&self, timeout: Duration, argv: &[&str]) -> CommandResult;

    /// Spawn `argv` as a long-lived background process.
    async fn run_background(&self, argv: &[&str]) -> io::Result<Child>;

    /// Sleep, routed through the runner so tests can compress time.
    async fn sleep(&self, duration: Duration);
}

/// Runner backed by `tokio::process`.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run_timed(&self, timeout: Duration, argv: &[&str]) -> CommandResult {
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return CommandResult::exception(),
        };
        debug!(?argv, "running timed command");

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => CommandResult {
                status: if output.status.success() {
                    CommandStatus::Success
                } else {
                    CommandStatus::Failed
                },
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Ok(Err(err)) => {
                debug!(?argv, %err, "command failed to run");
                CommandResult::exception()
            }
            Err(_) => {
                debug!(?argv, ?timeout, "command timed out");
                CommandResult {
                    status: CommandStatus::TimedOut,
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        }
    }

    async fn run_background(&self, argv: &[&str]) -> io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;
        debug!(?argv, "spawning background command");

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
