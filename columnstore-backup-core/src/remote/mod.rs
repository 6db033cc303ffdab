//! Remote command execution on cluster nodes.

pub mod sizes;
pub mod ssh;

use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;

pub use ssh::SshExecutor;

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Authenticated command channel to a node.
///
/// `run` returns `Err(BackupError::Unreachable)` only when no session could be
/// established; a command that ran and failed comes back as a non-zero status.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput>;
}

/// Run a command and turn a non-zero status into `BackupError::RemoteCommand`.
pub async fn run_checked(executor: &dyn RemoteExecutor, host: &str, command: &str) -> Result<String> {
    let output = executor.run(host, command).await?;
    if !output.success() {
        tracing::debug!(host, command, stderr = %output.stderr.trim(), "Remote command failed");
        return Err(BackupError::RemoteCommand {
            host: host.to_string(),
            command: command.to_string(),
            status: output.status,
        });
    }
    Ok(output.stdout)
}

/// Check that an authenticated session can be opened on `host`.
pub async fn probe(executor: &dyn RemoteExecutor, host: &str) -> bool {
    match executor.run(host, "true").await {
        Ok(output) => output.success(),
        Err(e) => {
            tracing::debug!(host, error = %e, "Probe failed");
            false
        }
    }
}
