//! Restore flow.
//!
//! The backed-up topology is read from the snapshot next to the data and
//! compared with the live target before anything is written. DBRoots are
//! matched by PM id and local slot, so a target whose global DBRoot ids were
//! renumbered still receives the right trees.

use super::{RunContext, RunSummary, TopologySnapshot};
use crate::fs::tree_sizes;
use crate::layout::{
    dbroot_artifact_name, dbroot_artifacts, metadata_artifacts, ArtifactKind, BackupLayout, DataArtifact,
    DESCRIPTOR_FILE, MY_CNF,
};
use crate::planner::{restore_plans, ArtifactSizes};
use crate::topology::{ClusterTopology, Role};
use crate::transfer::{Location, TransferJob};
use crate::utils::errors::{BackupError, Result};
use crate::verify::{check_processes_stopped, check_targets_pristine, verify};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub backup_root: PathBuf,
    /// Any reachable node of the target cluster
    pub restore_node: String,
    /// Accept modules answering on addresses the backup never recorded
    pub allow_address_change: bool,
}

pub async fn run_restore(ctx: &RunContext, request: &RestoreRequest) -> Result<RunSummary> {
    let span = info_span!("restore", run_id = %ctx.run_id);
    restore_flow(ctx, request).instrument(span).await
}

async fn restore_flow(ctx: &RunContext, request: &RestoreRequest) -> Result<RunSummary> {
    let started = (Utc::now(), Instant::now());
    info!(
        location = %request.backup_root.display(),
        restore_node = %request.restore_node,
        dry_run = ctx.dry_run,
        "Starting restore"
    );

    ctx.check_tools()?;
    let layout = BackupLayout::new(&request.backup_root);
    check_backup_location(&layout)?;

    let snapshot = TopologySnapshot::load(&layout)?;
    info!(
        captured_at = %snapshot.captured_at,
        control_host = %snapshot.control_host,
        backup_run = %snapshot.run_id,
        "Loaded backup topology"
    );
    let backup = snapshot.topology;

    let cluster = &ctx.settings.cluster;
    let target = ctx.discover(&request.restore_node).await?;
    verify(&backup, &target, request.allow_address_change)?;
    check_processes_stopped(&target, ctx.executor()).await?;
    check_targets_pristine(&target, ctx.executor(), &cluster.metadata_dir()).await?;

    let dbroots = restore_dbroot_artifacts(&backup, &target)?;
    let metadata = metadata_artifacts(&target, &cluster.metadata_dir())?;
    let all: Vec<DataArtifact> = metadata.iter().chain(dbroots.iter()).cloned().collect();
    for artifact in &all {
        if !layout.top(&artifact.name).is_dir() {
            return Err(BackupError::Config(format!(
                "backup at {} has no {} directory",
                layout.root().display(),
                artifact.name
            )));
        }
    }

    let entries: Vec<PathBuf> = all.iter().map(|a| layout.top(&a.name)).collect();
    let backup_sizes: ArtifactSizes = all
        .iter()
        .map(|a| a.name.clone())
        .zip(tree_sizes(Arc::clone(&ctx.storage), entries).await?)
        .collect();
    for plan in restore_plans(ctx.executor(), &backup_sizes, &all).await? {
        plan.check()?;
    }
    ctx.check_interrupted()?;

    let mut dispatcher = ctx.dispatcher();
    for artifact in &metadata {
        dispatcher.run_sync(restore_job(&layout, &backup_sizes, artifact)).await?;
    }
    for artifact in &dbroots {
        ctx.check_interrupted()?;
        dispatcher.run_sync_async(restore_job(&layout, &backup_sizes, artifact)).await?;
    }
    dispatcher.finish().await?;
    ctx.check_interrupted()?;

    for artifact in &metadata {
        let source = layout.top(&BackupLayout::cnf_entry(&artifact.module)).join(MY_CNF);
        if !source.is_file() {
            warn!(module = %artifact.module, "Backup holds no server config for module, skipping");
            continue;
        }
        let job = TransferJob::file(
            BackupLayout::cnf_entry(&artifact.module),
            Location::Local(source),
            Location::remote(artifact.address.as_str(), cluster.my_cnf_path()),
        );
        dispatcher.run_sync(job).await?;
    }

    for node in target.nodes() {
        let job = TransferJob::file(
            format!("{}@{}", DESCRIPTOR_FILE, node.name()),
            Location::Local(layout.top(DESCRIPTOR_FILE)),
            Location::remote(node.address()?, cluster.descriptor_path()),
        );
        dispatcher.run_sync(job).await?;
    }

    Ok(RunSummary::finish(
        "restore",
        ctx,
        started,
        all.len(),
        dispatcher.summary(),
    ))
}

fn check_backup_location(layout: &BackupLayout) -> Result<()> {
    if !layout.root().is_dir() {
        return Err(BackupError::Config(format!(
            "backup location {} does not exist",
            layout.root().display()
        )));
    }
    if !layout.top(DESCRIPTOR_FILE).is_file() {
        return Err(BackupError::Config(format!(
            "backup location {} holds no {}",
            layout.root().display(),
            DESCRIPTOR_FILE
        )));
    }
    Ok(())
}

/// Target DBRoots, each named after the backed-up directory that fills it:
/// the DBRoot the same PM held in the same local slot.
pub fn restore_dbroot_artifacts(backup: &ClusterTopology, target: &ClusterTopology) -> Result<Vec<DataArtifact>> {
    let mut artifacts = dbroot_artifacts(target)?;
    for artifact in &mut artifacts {
        let ArtifactKind::DbRoot { dbroot, slot } = artifact.kind else {
            continue;
        };
        let source = backup
            .find_module(Role::Pm, artifact.module_id)
            .and_then(|pm| pm.dbroots.get(slot))
            .ok_or_else(|| {
                BackupError::Incompatible(format!(
                    "{} slot {} has no backed-up DBRoot",
                    artifact.module,
                    slot + 1
                ))
            })?;
        if *source != dbroot {
            info!(module = %artifact.module, from = source, to = dbroot, "DBRoot renumbered since backup");
        }
        artifact.name = dbroot_artifact_name(artifact.module_id, *source);
    }
    Ok(artifacts)
}

fn restore_job(layout: &BackupLayout, backup_sizes: &ArtifactSizes, artifact: &DataArtifact) -> TransferJob {
    TransferJob::tree(
        artifact.name.as_str(),
        Location::Local(layout.top(&artifact.name)),
        Location::remote(artifact.address.as_str(), artifact.remote_path.as_path()),
    )
    .with_expected_bytes(backup_sizes.get(&artifact.name).copied().unwrap_or(0))
}
