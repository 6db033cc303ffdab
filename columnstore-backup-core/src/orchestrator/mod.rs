//! Backup and restore flows.
//!
//! Both flows take a `RunContext` holding the settings and the collaborators
//! (remote shell, copy tool, local storage) so the same sequencing runs
//! against real nodes or in-memory fakes.

pub mod backup;
pub mod restore;

use crate::config::Settings;
use crate::fs::{HostStorage, LocalStorage};
use crate::layout::{BackupLayout, TOPOLOGY_FILE};
use crate::remote::{probe, RemoteExecutor, SshExecutor};
use crate::topology::{load_topology, read_release_info, resolve_modules, ClusterTopology, RemoteConfigLookup};
use crate::transfer::progress::{format_bytes, format_duration};
use crate::transfer::rsync::ensure_available;
use crate::transfer::{ClusterSizeProbe, DispatchSummary, Dispatcher, ProgressMonitor, RsyncSyncer, Syncer};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub use backup::{run_backup, BackupRequest};
pub use restore::{run_restore, RestoreRequest};

pub struct RunContext {
    pub settings: Settings,
    pub dry_run: bool,
    pub run_id: Uuid,
    pub executor: Arc<dyn RemoteExecutor>,
    pub syncer: Arc<dyn Syncer>,
    pub storage: Arc<dyn LocalStorage>,
    pub cancel: CancellationToken,

    /// Programs that must exist on the control host before anything runs
    pub required_tools: Vec<PathBuf>,
}

impl RunContext {
    /// Context talking to real nodes over SSH and copying with rsync
    pub fn new(settings: Settings, dry_run: bool, cancel: CancellationToken) -> Self {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(&settings.remote));
        let syncer: Arc<dyn Syncer> = Arc::new(RsyncSyncer::new(&settings));
        let required_tools = vec![settings.transfer.rsync_path.clone(), PathBuf::from("ssh")];

        let mut ctx = Self::with_collaborators(settings, dry_run, executor, syncer, Arc::new(HostStorage), cancel);
        ctx.required_tools = required_tools;
        ctx
    }

    pub fn with_collaborators(
        settings: Settings,
        dry_run: bool,
        executor: Arc<dyn RemoteExecutor>,
        syncer: Arc<dyn Syncer>,
        storage: Arc<dyn LocalStorage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            dry_run,
            run_id: Uuid::new_v4(),
            executor,
            syncer,
            storage,
            cancel,
            required_tools: Vec::new(),
        }
    }

    pub fn executor(&self) -> &dyn RemoteExecutor {
        self.executor.as_ref()
    }

    /// Fail with `Interrupted` once a shutdown signal has arrived
    pub fn check_interrupted(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("Shutdown requested, stopping");
            return Err(BackupError::Interrupted);
        }
        Ok(())
    }

    pub fn check_tools(&self) -> Result<()> {
        for tool in &self.required_tools {
            let found = ensure_available(tool)?;
            info!(tool = %found.display(), "Found required tool");
        }
        Ok(())
    }

    /// Dispatcher sized by the concurrency setting; progress is sampled
    /// except in dry-run mode.
    pub fn dispatcher(&self) -> Dispatcher {
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.syncer),
            self.settings.transfer.concurrency,
            self.dry_run,
        );
        if self.dry_run {
            return dispatcher;
        }
        let probe = ClusterSizeProbe::new(Arc::clone(&self.executor), Arc::clone(&self.storage));
        dispatcher.with_monitor(ProgressMonitor::new(
            Arc::new(probe),
            Duration::from_secs(self.settings.transfer.poll_interval_secs),
        ))
    }

    /// Read and resolve the live topology of the cluster reachable at `entry`,
    /// including its version.
    pub async fn discover(&self, entry: &str) -> Result<ClusterTopology> {
        if !probe(self.executor(), entry).await {
            return Err(BackupError::Unreachable(format!(
                "{}: cannot run commands as {}",
                entry, self.settings.remote.user
            )));
        }

        let lookup = RemoteConfigLookup::new(self.executor(), entry, self.settings.cluster.get_config_tool());
        let mut topology = load_topology(&lookup, entry).await?;
        resolve_modules(&mut topology, self.executor()).await?;

        let release = read_release_info(
            self.executor(),
            topology.coordinator_address()?,
            &self.settings.cluster.version_file(),
        )
        .await?;
        info!(release = %release, "Cluster release");
        topology.release = Some(release);
        Ok(topology)
    }
}

/// Topology recorded next to a backup and read back by restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub run_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub control_host: String,
    pub topology: ClusterTopology,
}

impl TopologySnapshot {
    pub fn new(run_id: Uuid, topology: ClusterTopology) -> Self {
        let control_host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            run_id,
            captured_at: Utc::now(),
            control_host,
            topology,
        }
    }

    pub fn save(&self, layout: &BackupLayout) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(layout.top(TOPOLOGY_FILE), json)?;
        Ok(())
    }

    pub fn load(layout: &BackupLayout) -> Result<Self> {
        let path = layout.top(TOPOLOGY_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub operation: &'static str,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub dry_run: bool,
    pub artifacts: usize,
    pub transfers: DispatchSummary,
}

impl RunSummary {
    fn finish(
        operation: &'static str,
        ctx: &RunContext,
        started: (DateTime<Utc>, Instant),
        artifacts: usize,
        transfers: DispatchSummary,
    ) -> Self {
        let summary = Self {
            operation,
            run_id: ctx.run_id,
            started_at: started.0,
            elapsed: started.1.elapsed(),
            dry_run: ctx.dry_run,
            artifacts,
            transfers,
        };
        summary.log();
        summary
    }

    pub fn log(&self) {
        info!(
            operation = self.operation,
            dry_run = self.dry_run,
            artifacts = self.artifacts,
            jobs = self.transfers.jobs,
            batches = self.transfers.batches,
            expected = %format_bytes(self.transfers.expected_bytes),
            elapsed = %format_duration(self.elapsed.as_secs()),
            "Run complete"
        );
    }
}
