//! Cluster-wide write suspension around the data copy.
//!
//! `WriteSuspension::scope` suspends writes, runs the body and resumes writes
//! on every way out of it: success, error, panic or a shutdown signal.

use crate::remote::{run_checked, RemoteExecutor};
use crate::utils::errors::{BackupError, Result};
use crate::utils::shell::quote;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct WriteSuspension<'a> {
    executor: &'a dyn RemoteExecutor,
    host: String,
    admin_tool: PathBuf,
    dry_run: bool,
    cancel: CancellationToken,
}

impl<'a> WriteSuspension<'a> {
    /// `host` is the node that accepts cluster administration commands.
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        host: impl Into<String>,
        admin_tool: PathBuf,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            host: host.into(),
            admin_tool,
            dry_run,
            cancel,
        }
    }

    pub async fn scope<F, T>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if self.dry_run {
            info!("Dry run: database writes stay enabled");
            return tokio::select! {
                result = body => result,
                _ = self.cancel.cancelled() => Err(BackupError::Interrupted),
            };
        }

        if let Err(e) = self.admin("suspendDatabaseWrites").await {
            error!(error = %e, "Failed to suspend database writes");
            // The command may have taken effect before failing
            if let Err(resume) = self.admin("resumeDatabaseWrites").await {
                warn!(error = %resume, "Resume after failed suspend also failed");
            }
            return Err(e);
        }
        info!(host = %self.host, "Database writes suspended");

        let outcome = tokio::select! {
            result = AssertUnwindSafe(body).catch_unwind() => result,
            _ = self.cancel.cancelled() => {
                warn!("Interrupted while writes were suspended");
                Ok(Err(BackupError::Interrupted))
            }
        };

        let resumed = self.admin("resumeDatabaseWrites").await;
        match &resumed {
            Ok(()) => info!(host = %self.host, "Database writes resumed"),
            Err(e) => error!(error = %e, "Failed to resume database writes; resume them manually"),
        }

        match outcome {
            Ok(Ok(value)) => resumed.map(|()| value),
            Ok(Err(e)) => Err(e),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn admin(&self, verb: &str) -> Result<()> {
        let command = format!("{} {} y", quote(&self.admin_tool.to_string_lossy()), verb);
        run_checked(self.executor, &self.host, &command).await.map(|_| ())
    }
}
