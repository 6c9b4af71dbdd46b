//! The capability the orchestrator needs from a target host.
//!
//! Everything in `deploy` talks to the host through these two traits, so the
//! SSH client, local execution and test doubles share the same orchestration
//! logic.

use std::path::Path;
use std::time::Duration;

use crate::error::{Error, RemoteCommandFailedDetails, Result};

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }

    /// Convert a non-zero exit into a `remote.command_failed` error.
    pub fn into_result(self, command: &str) -> Result<CommandOutput> {
        if self.success {
            return Ok(self);
        }
        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }))
    }
}

/// Run commands on the target host.
///
/// `Err` means the command could not be run at all or exceeded `timeout`
/// (the transport process is killed). A command that ran and exited non-zero
/// is reported through [`CommandOutput::success`].
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and capture its output.
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Run a command with its output passed through to the operator's terminal.
    fn run_streaming(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Run and require a zero exit status.
    fn run_checked(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.run(command, timeout)?.into_result(command)
    }

    /// Streaming variant of [`RemoteExecutor::run_checked`].
    fn run_streaming_checked(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.run_streaming(command, timeout)?.into_result(command)
    }
}

/// Copy a local directory's contents into a remote directory.
pub trait SourceSync: Send + Sync {
    fn sync_dir(&self, local_dir: &Path, remote_dir: &str, timeout: Duration) -> Result<()>;
}
