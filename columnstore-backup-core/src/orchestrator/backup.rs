//! Backup flow.
//!
//! discover -> measure -> space check -> rotate -> descriptor, version and
//! topology snapshot -> [suspend writes] configs, metadata stores, DBRoots
//! [resume writes]. Nothing on disk changes before the space check passes.

use super::{RunContext, RunSummary, TopologySnapshot};
use crate::layout::{
    dbroot_artifacts, metadata_artifacts, BackupLayout, DataArtifact, DESCRIPTOR_FILE, MY_CNF, TOPOLOGY_FILE,
    VERSION_FILE,
};
use crate::planner::{backup_plan, measure_artifacts, ArtifactSizes};
use crate::retention::Retention;
use crate::suspend::WriteSuspension;
use crate::topology::Role;
use crate::transfer::{Dispatcher, Location, TransferJob};
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Any reachable node of the cluster
    pub active_node: String,
    pub backup_root: PathBuf,
}

pub async fn run_backup(ctx: &RunContext, request: &BackupRequest) -> Result<RunSummary> {
    let span = info_span!("backup", run_id = %ctx.run_id);
    backup_flow(ctx, request).instrument(span).await
}

async fn backup_flow(ctx: &RunContext, request: &BackupRequest) -> Result<RunSummary> {
    let started = (Utc::now(), Instant::now());
    info!(
        active_node = %request.active_node,
        location = %request.backup_root.display(),
        dry_run = ctx.dry_run,
        "Starting backup"
    );

    ctx.check_tools()?;
    let cluster = &ctx.settings.cluster;
    let topology = ctx.discover(&request.active_node).await?;

    let dbroots = dbroot_artifacts(&topology)?;
    let metadata = metadata_artifacts(&topology, &cluster.metadata_dir())?;
    let all: Vec<DataArtifact> = dbroots.iter().chain(metadata.iter()).cloned().collect();
    let sizes = measure_artifacts(ctx.executor(), &all).await?;
    backup_plan(&sizes, ctx.storage.as_ref(), &request.backup_root)?.check()?;
    ctx.check_interrupted()?;

    let layout = BackupLayout::new(&request.backup_root);
    let retention = Retention::new(layout.clone(), ctx.settings.retention.generations);
    if ctx.dry_run {
        info!("Dry run: backup generations not rotated");
    } else {
        retention.rotate()?;
    }

    let copy = BackupCopy {
        ctx,
        layout: &layout,
        retention: &retention,
        sizes: &sizes,
    };
    let mut dispatcher = ctx.dispatcher();
    let coordinator = topology.coordinator_address()?;

    copy.file(
        &mut dispatcher,
        DESCRIPTOR_FILE,
        &request.active_node,
        &cluster.descriptor_path(),
    )
    .await?;
    copy.file(&mut dispatcher, VERSION_FILE, coordinator, &cluster.version_file())
        .await?;

    let snapshot = TopologySnapshot::new(ctx.run_id, topology.clone());
    if ctx.dry_run {
        info!("Dry run: would write {}", layout.top(TOPOLOGY_FILE).display());
    } else {
        retention.retire_artifact(TOPOLOGY_FILE)?;
        snapshot.save(&layout)?;
    }
    ctx.check_interrupted()?;

    let suspension = WriteSuspension::new(
        ctx.executor(),
        coordinator,
        cluster.admin_tool(),
        ctx.dry_run,
        ctx.cancel.clone(),
    );
    // The dispatcher lives inside the scope so nothing is left copying once
    // writes are resumed.
    let transfers = suspension
        .scope(async {
            let mut dispatcher = dispatcher;
            for artifact in &metadata {
                copy.config(&mut dispatcher, artifact).await?;
            }
            for artifact in metadata.iter().filter(|a| a.role == Role::Pm) {
                dispatcher.run_sync(copy.tree(artifact)?).await?;
            }
            for artifact in &dbroots {
                dispatcher.run_sync_async(copy.tree(artifact)?).await?;
            }
            dispatcher.finish().await?;
            for artifact in metadata.iter().filter(|a| a.role == Role::Um) {
                dispatcher.run_sync(copy.tree(artifact)?).await?;
            }
            Ok::<_, BackupError>(dispatcher.summary())
        })
        .await?;

    Ok(RunSummary::finish("backup", ctx, started, all.len(), transfers))
}

/// Builds copy jobs for top-level entries, retiring the previous copy into
/// generation 1 first so it can serve as link-dest.
struct BackupCopy<'a> {
    ctx: &'a RunContext,
    layout: &'a BackupLayout,
    retention: &'a Retention,
    sizes: &'a ArtifactSizes,
}

impl BackupCopy<'_> {
    fn retire(&self, entry: &str) -> Result<Option<PathBuf>> {
        if self.ctx.dry_run {
            return Ok(None);
        }
        self.retention.retire_artifact(entry)
    }

    fn tree(&self, artifact: &DataArtifact) -> Result<TransferJob> {
        let mut job = TransferJob::tree(
            artifact.name.as_str(),
            Location::remote(artifact.address.as_str(), artifact.remote_path.as_path()),
            Location::Local(self.layout.top(&artifact.name)),
        )
        .with_expected_bytes(self.sizes.get(&artifact.name).copied().unwrap_or(0));
        if let Some(previous) = self.retire(&artifact.name)? {
            job = job.with_link_dest(previous);
        }
        Ok(job)
    }

    /// Copy one top-level file
    async fn file(&self, dispatcher: &mut Dispatcher, name: &str, host: &str, remote: &Path) -> Result<()> {
        let mut job = TransferJob::file(
            name,
            Location::remote(host, remote),
            Location::Local(self.layout.top(name)),
        );
        if let Some(previous) = self.retire(name)? {
            if let Some(dir) = previous.parent() {
                job = job.with_link_dest(dir);
            }
        }
        dispatcher.run_sync(job).await
    }

    /// Copy a metadata node's server config into `cnf/<module>/`
    async fn config(&self, dispatcher: &mut Dispatcher, artifact: &DataArtifact) -> Result<()> {
        let entry = BackupLayout::cnf_entry(&artifact.module);
        let mut job = TransferJob::file(
            entry.as_str(),
            Location::remote(artifact.address.as_str(), self.ctx.settings.cluster.my_cnf_path()),
            Location::Local(self.layout.top(&entry).join(MY_CNF)),
        );
        if let Some(previous) = self.retire(&entry)? {
            job = job.with_link_dest(previous);
        }
        dispatcher.run_sync(job).await
    }
}
