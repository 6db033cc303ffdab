//! rsync-backed implementation of the copy primitive.

use super::{Location, Syncer, TransferJob, TransferKind};
use crate::config::Settings;
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// "some files vanished before they could be transferred"
const RSYNC_VANISHED: i32 = 24;

#[derive(Debug, Clone)]
pub struct RsyncSyncer {
    rsync_path: PathBuf,
    user: String,
    ssh_port: u16,
    compress: bool,
}

impl RsyncSyncer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            rsync_path: settings.transfer.rsync_path.clone(),
            user: settings.remote.user.clone(),
            ssh_port: settings.remote.ssh_port,
            compress: settings.transfer.compress,
        }
    }

    /// Full argument list for one job
    pub fn args(&self, job: &TransferJob) -> Vec<String> {
        let mut args = vec!["-a".to_string(), "--numeric-ids".to_string()];
        if job.kind == TransferKind::Tree {
            args.push("--delete".to_string());
        }
        if self.compress {
            args.push("-z".to_string());
        }
        if job.dry_run {
            args.push("--dry-run".to_string());
        }
        if let Some(link_dest) = &job.link_dest {
            args.push(format!("--link-dest={}", link_dest.display()));
        }
        args.push("-e".to_string());
        args.push(format!("ssh -p {} -o BatchMode=yes", self.ssh_port));
        args.push(self.endpoint(&job.source, job.kind));
        args.push(self.endpoint(&job.destination, job.kind));
        args
    }

    fn endpoint(&self, location: &Location, kind: TransferKind) -> String {
        let mut path = location.path().to_string_lossy().to_string();
        if kind == TransferKind::Tree && !path.ends_with('/') {
            path.push('/');
        }
        match location {
            Location::Local(_) => path,
            Location::Remote { host, .. } => format!("{}@{}:{}", self.user, host, path),
        }
    }
}

#[async_trait]
impl Syncer for RsyncSyncer {
    async fn sync(&self, job: &TransferJob) -> Result<i32> {
        if let (Location::Local(dest), false) = (&job.destination, job.dry_run) {
            let dir = match job.kind {
                TransferKind::Tree => Some(dest.as_path()),
                TransferKind::File => dest.parent(),
            };
            if let Some(dir) = dir {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let args = self.args(job);
        let command_line = format!("{} {}", self.rsync_path.display(), args.join(" "));
        if job.dry_run {
            info!(job = %job.label, "Dry run: {}", command_line);
        } else {
            debug!(job = %job.label, "Running: {}", command_line);
        }

        let output = tokio::process::Command::new(&self.rsync_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let code = output.status.code().unwrap_or(-1);
        match code {
            0 => Ok(0),
            RSYNC_VANISHED => {
                warn!(job = %job.label, "Some source files vanished during transfer");
                Ok(0)
            }
            _ => {
                warn!(
                    job = %job.label,
                    code,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "rsync failed"
                );
                Ok(code)
            }
        }
    }
}

/// Locate an executable: paths with a separator are checked as given,
/// bare names are searched on `PATH`.
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Fail with `MissingTool` unless rsync can be started on the control host
pub fn ensure_available(program: &Path) -> Result<PathBuf> {
    find_executable(program).ok_or_else(|| BackupError::MissingTool(program.display().to_string()))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
