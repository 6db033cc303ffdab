//! Shared command line handling for the backup and restore binaries.

use clap::error::ErrorKind;
use clap::{Args, Parser};
use columnstore_backup_core::utils::logger;
use columnstore_backup_core::utils::shutdown::ShutdownCoordinator;
use columnstore_backup_core::{BackupError, RunContext, RunSummary, Settings};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

/// Options accepted by both binaries
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Show what would be copied without changing anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Compress data in transit
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// Concurrent transfer jobs (1-100)
    #[arg(short = 'n', long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<usize>,

    /// Account used on the cluster nodes
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Installation root on the cluster nodes
    #[arg(long, value_name = "PATH")]
    pub install_dir: Option<PathBuf>,

    /// SSH port on the cluster nodes
    #[arg(long, value_name = "PORT")]
    pub ssh_port: Option<u16>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

impl CommonArgs {
    /// Settings from the config file (or defaults) with flags applied on top
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        if self.compress {
            settings.transfer.compress = true;
        }
        if let Some(concurrency) = self.concurrency {
            settings.transfer.concurrency = concurrency;
        }
        if let Some(user) = &self.user {
            settings.remote.user = user.clone();
        }
        if let Some(install_dir) = &self.install_dir {
            settings.cluster.install_dir = install_dir.clone();
        }
        if let Some(port) = self.ssh_port {
            settings.remote.ssh_port = port;
        }
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
        }
        Ok(settings)
    }
}

/// Parse arguments; usage errors exit with status 1.
pub fn parse_args<T: Parser>() -> Result<T, ExitCode> {
    T::try_parse().map_err(|e| {
        let _ = e.print();
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
            _ => ExitCode::from(1),
        }
    })
}

fn exit_status(e: &BackupError) -> u8 {
    u8::try_from(e.exit_code()).unwrap_or(1)
}

/// Set up logging and signal handling, run `flow` and map its outcome to
/// the process exit status.
pub async fn run<F, Fut>(
    operation: &'static str,
    common: &CommonArgs,
    configure: impl FnOnce(&mut Settings),
    flow: F,
) -> ExitCode
where
    F: FnOnce(RunContext) -> Fut,
    Fut: Future<Output = columnstore_backup_core::Result<RunSummary>>,
{
    ExitCode::from(run_to_status(operation, common, configure, flow).await)
}

async fn run_to_status<F, Fut>(
    operation: &'static str,
    common: &CommonArgs,
    configure: impl FnOnce(&mut Settings),
    flow: F,
) -> u8
where
    F: FnOnce(RunContext) -> Fut,
    Fut: Future<Output = columnstore_backup_core::Result<RunSummary>>,
{
    let started = Instant::now();
    let mut settings = match common.settings() {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is not up yet
            eprintln!("Error: failed to load configuration: {:#}", e);
            eprintln!(
                "{} finished: Failed (elapsed {}s)",
                operation,
                started.elapsed().as_secs()
            );
            return 1;
        }
    };
    configure(&mut settings);

    let level = logger::effective_level(&settings.log.level, common.verbose).to_string();
    if let Err(e) = logger::init(&level) {
        eprintln!("Warning: logging already initialized: {:#}", e);
    }

    info!("Starting columnstore-{} v{}", operation, env!("CARGO_PKG_VERSION"));
    let outcome = match settings.validate() {
        Ok(()) => {
            let shutdown = ShutdownCoordinator::new();
            shutdown.listen();
            flow(RunContext::new(settings, common.dry_run, shutdown.token())).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                elapsed_secs = started.elapsed().as_secs(),
                "{} finished: Success",
                operation
            );
            0
        }
        Err(e) => {
            error!(
                code = e.exit_code(),
                elapsed_secs = started.elapsed().as_secs(),
                "{} finished: Failed: {}",
                operation,
                e
            );
            exit_status(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "-vdz",
            "-n",
            "32",
            "--user",
            "backup",
            "--install-dir",
            "/opt/cs",
            "--ssh-port",
            "2222",
        ])
        .unwrap();
        assert!(cli.common.verbose);
        assert!(cli.common.dry_run);

        let settings = cli.common.settings().unwrap();
        assert!(settings.transfer.compress);
        assert_eq!(settings.transfer.concurrency, 32);
        assert_eq!(settings.remote.user, "backup");
        assert_eq!(settings.remote.ssh_port, 2222);
        assert_eq!(settings.cluster.install_dir, PathBuf::from("/opt/cs"));
    }

    #[test]
    fn test_defaults_without_flags() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let settings = cli.common.settings().unwrap();
        assert_eq!(settings.transfer.concurrency, 10);
        assert_eq!(settings.remote.user, "root");
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_before_the_flow_runs() {
        let common = CommonArgs {
            concurrency: Some(0),
            ..CommonArgs::default()
        };
        let ran = AtomicBool::new(false);
        let status = run_to_status("backup", &common, |_| {}, |_ctx| {
            ran.store(true, Ordering::SeqCst);
            async { Err(BackupError::Interrupted) }
        })
        .await;

        assert_eq!(status, 1);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unreadable_config_fails_with_status_one() {
        let common = CommonArgs {
            config: Some(PathBuf::from("/nonexistent/columnstore-backup.toml")),
            ..CommonArgs::default()
        };
        let status = run_to_status("restore", &common, |_| {}, |_ctx| async {
            Err(BackupError::Interrupted)
        })
        .await;
        assert_eq!(status, 1);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_status(&BackupError::Unreachable("pm1".into())), 255);
        assert_eq!(exit_status(&BackupError::Interrupted), 130);
        assert_eq!(exit_status(&BackupError::NotPristine("um1".into())), 6);
    }
}
