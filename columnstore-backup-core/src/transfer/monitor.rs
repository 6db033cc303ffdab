//! Periodic progress sampling while a batch of sync jobs runs.
//!
//! Sampling is advisory: a stalled batch is reported and polling stops, but
//! completion is still decided by joining the jobs.

use super::progress::{format_bytes, format_duration, format_speed, ProgressSample, ProgressWindow};
use super::Location;
use crate::fs::{tree_sizes, LocalStorage};
use crate::remote::{sizes, RemoteExecutor};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Observes the aggregate size of transfer destinations
#[async_trait]
pub trait SizeProbe: Send + Sync {
    async fn measure(&self, targets: &[Location]) -> Result<u64>;
}

/// Measures local trees by walking them and remote trees with `du`
pub struct ClusterSizeProbe {
    executor: Arc<dyn RemoteExecutor>,
    storage: Arc<dyn LocalStorage>,
}

impl ClusterSizeProbe {
    pub fn new(executor: Arc<dyn RemoteExecutor>, storage: Arc<dyn LocalStorage>) -> Self {
        Self { executor, storage }
    }
}

#[async_trait]
impl SizeProbe for ClusterSizeProbe {
    async fn measure(&self, targets: &[Location]) -> Result<u64> {
        let mut local = Vec::new();
        let mut remote: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
        for target in targets {
            match target {
                Location::Local(path) => local.push(path.clone()),
                Location::Remote { host, path } => remote.entry(host.as_str()).or_default().push(path.clone()),
            }
        }

        let mut total: u64 = tree_sizes(Arc::clone(&self.storage), local).await?.into_iter().sum();

        for (host, paths) in remote {
            total += sizes::total_size(self.executor.as_ref(), host, &paths).await?;
        }
        Ok(total)
    }
}

/// How a watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Every job reported completion
    Completed,
    /// Nothing was expected to move
    Empty,
    /// No forward progress for the stall limit
    Stalled,
    /// The dispatcher stopped the watch
    Cancelled,
}

#[derive(Clone)]
pub struct ProgressMonitor {
    probe: Arc<dyn SizeProbe>,
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(probe: Arc<dyn SizeProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Sample `targets` every interval until the batch completes, stalls or
    /// `cancel` fires.
    pub async fn watch(
        &self,
        targets: Vec<Location>,
        expected_total: u64,
        completed: Arc<AtomicUsize>,
        job_count: usize,
        cancel: CancellationToken,
    ) -> WatchOutcome {
        if expected_total == 0 {
            warn!("Expected transfer size is zero; treating batch as complete");
            info!(percent = 100, "Progress");
            return WatchOutcome::Empty;
        }

        let mut window = ProgressWindow::new(expected_total, self.interval.as_secs_f64());
        match self.probe.measure(&targets).await {
            Ok(bytes) => window.baseline(ProgressSample::now(bytes)),
            Err(e) => warn!(error = %e, "Initial size sample failed"),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if completed.load(Ordering::Acquire) >= job_count {
                info!(jobs = job_count, "All jobs in batch reported completion");
                return WatchOutcome::Completed;
            }

            let bytes = match self.probe.measure(&targets).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Size sample failed");
                    continue;
                }
            };

            let report = window.record(ProgressSample::now(bytes));
            info!(
                percent = report.percent,
                transferred = %format_bytes(report.bytes),
                expected = %format_bytes(expected_total),
                speed = %format_speed(report.bytes_per_second as u64),
                eta = %report.eta_seconds.map(format_duration).unwrap_or_else(|| "unknown".into()),
                "Progress"
            );

            if report.stalled {
                warn!(
                    samples = window.stall_count(),
                    "No transfer progress observed; batch looks stalled, waiting for jobs to exit"
                );
                return WatchOutcome::Stalled;
            }
        }
    }
}
