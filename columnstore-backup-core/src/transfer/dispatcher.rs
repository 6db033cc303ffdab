//! Bounded-concurrency execution of sync jobs.
//!
//! Jobs submitted with `run_sync_async` accumulate in a batch. When the batch
//! reaches the concurrency ceiling it is joined completely (with the progress
//! monitor sampling meanwhile) and only then evaluated: one failed job fails
//! the run, but never before its siblings have finished.

use super::monitor::ProgressMonitor;
use super::{JobOutcome, JobStatus, Location, Syncer, TransferJob};
use crate::utils::errors::{BackupError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Totals over everything a dispatcher ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub jobs: usize,
    pub batches: usize,
    pub expected_bytes: u64,
}

/// Jobs in flight plus the sink their exit codes are recorded in
struct Batch {
    jobs: Vec<TransferJob>,
    handles: Vec<JoinHandle<()>>,
    sink: Arc<Mutex<Vec<JobOutcome>>>,
    completed: Arc<AtomicUsize>,
}

impl Batch {
    fn new() -> Self {
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            sink: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// A batch dropped before it was joined takes its jobs down with it.
impl Drop for Batch {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

pub struct Dispatcher {
    syncer: Arc<dyn Syncer>,
    ceiling: usize,
    dry_run: bool,
    monitor: Option<ProgressMonitor>,
    batch: Batch,
    summary: DispatchSummary,
}

impl Dispatcher {
    pub fn new(syncer: Arc<dyn Syncer>, ceiling: usize, dry_run: bool) -> Self {
        Self {
            syncer,
            ceiling: ceiling.max(1),
            dry_run,
            monitor: None,
            batch: Batch::new(),
            summary: DispatchSummary::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: ProgressMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn summary(&self) -> DispatchSummary {
        self.summary
    }

    /// Run one must-complete job to the end; a non-zero exit fails the run.
    pub async fn run_sync(&mut self, mut job: TransferJob) -> Result<()> {
        job.dry_run = self.dry_run;
        info!(job = %job.label, from = %job.source, to = %job.destination, "Syncing");
        let outcome = execute(self.syncer.as_ref(), &job).await;
        self.summary.jobs += 1;
        self.summary.expected_bytes += job.expected_bytes;
        evaluate(&[job], &[outcome])
    }

    /// Queue a job on the current batch, joining the batch once it is full.
    pub async fn run_sync_async(&mut self, mut job: TransferJob) -> Result<()> {
        job.dry_run = self.dry_run;
        info!(job = %job.label, from = %job.source, to = %job.destination, "Starting sync job");

        let sink = Arc::clone(&self.batch.sink);
        let completed = Arc::clone(&self.batch.completed);
        if self.dry_run {
            // No real concurrency in dry-run mode
            let outcome = execute(self.syncer.as_ref(), &job).await;
            sink.lock().await.push(outcome);
            completed.fetch_add(1, Ordering::Release);
        } else {
            let syncer = Arc::clone(&self.syncer);
            let task_job = job.clone();
            self.batch.handles.push(tokio::spawn(async move {
                let outcome = execute(syncer.as_ref(), &task_job).await;
                sink.lock().await.push(outcome);
                completed.fetch_add(1, Ordering::Release);
            }));
        }
        self.batch.jobs.push(job);

        if self.batch.jobs.len() >= self.ceiling {
            self.join_batch().await?;
        }
        Ok(())
    }

    /// Join whatever is still in flight.
    pub async fn finish(&mut self) -> Result<()> {
        if self.batch.jobs.is_empty() {
            return Ok(());
        }
        self.join_batch().await
    }

    async fn join_batch(&mut self) -> Result<()> {
        let mut batch = std::mem::replace(&mut self.batch, Batch::new());
        let job_count = batch.jobs.len();
        let expected: u64 = batch.jobs.iter().map(|j| j.expected_bytes).sum();
        info!(jobs = job_count, expected_bytes = expected, "Waiting for sync batch");

        let stop_monitor = CancellationToken::new();
        let _stop_on_drop = stop_monitor.clone().drop_guard();
        let monitor_task = match (&self.monitor, self.dry_run) {
            (Some(monitor), false) => {
                let monitor = monitor.clone();
                let targets: Vec<Location> = batch.jobs.iter().map(|j| j.destination.clone()).collect();
                let completed = Arc::clone(&batch.completed);
                let stop = stop_monitor.clone();
                Some(tokio::spawn(async move {
                    monitor.watch(targets, expected, completed, job_count, stop).await
                }))
            }
            _ => None,
        };

        for handle in batch.handles.iter_mut() {
            if let Err(e) = handle.await {
                error!("Sync task panicked: {}", e);
            }
        }

        stop_monitor.cancel();
        if let Some(task) = monitor_task {
            let _ = task.await;
        }

        self.summary.jobs += job_count;
        self.summary.batches += 1;
        self.summary.expected_bytes += expected;

        let outcomes = batch.sink.lock().await.clone();
        evaluate(&batch.jobs, &outcomes)
    }
}

async fn execute(syncer: &dyn Syncer, job: &TransferJob) -> JobOutcome {
    let status = match syncer.sync(job).await {
        Ok(0) => JobStatus::Success,
        Ok(code) => JobStatus::Failed(code),
        Err(e) => {
            warn!(job = %job.label, error = %e, "Sync could not be started");
            JobStatus::Failed(-1)
        }
    };
    JobOutcome {
        label: job.label.clone(),
        status,
    }
}

/// Fail if any job has no successful outcome recorded.
fn evaluate(jobs: &[TransferJob], outcomes: &[JobOutcome]) -> Result<()> {
    let mut failed = Vec::new();
    for job in jobs {
        match outcomes.iter().find(|o| o.label == job.label).map(|o| o.status) {
            Some(JobStatus::Success) => {}
            Some(JobStatus::Failed(code)) => {
                error!(job = %job.label, code, "Sync job failed");
                failed.push(job.label.clone());
            }
            None => {
                error!(job = %job.label, "Sync job finished without a result");
                failed.push(job.label.clone());
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(BackupError::SyncFailed { failed })
    }
}
