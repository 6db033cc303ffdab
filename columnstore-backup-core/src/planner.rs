//! Disk capacity planning.
//!
//! Sizes are gathered from the nodes first; the go/no-go decision is the pure
//! `SpacePlan::check`, run before anything is rotated or suspended.

use crate::fs::LocalStorage;
use crate::layout::DataArtifact;
use crate::remote::{sizes, RemoteExecutor};
use crate::transfer::progress::format_bytes;
use crate::utils::errors::{BackupError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePlan {
    /// Where the data lands (backup directory or restore node)
    pub location: String,
    pub required: u64,
    pub available: u64,
}

impl SpacePlan {
    pub fn check(&self) -> Result<()> {
        if self.required > self.available {
            return Err(BackupError::InsufficientSpace {
                location: self.location.clone(),
                required: self.required,
                available: self.available,
            });
        }
        info!(
            location = %self.location,
            required = %format_bytes(self.required),
            available = %format_bytes(self.available),
            "Disk space check passed"
        );
        Ok(())
    }
}

/// Size of every data artifact keyed by artifact name
pub type ArtifactSizes = BTreeMap<String, u64>;

/// Measure each artifact on its node.
pub async fn measure_artifacts(executor: &dyn RemoteExecutor, artifacts: &[DataArtifact]) -> Result<ArtifactSizes> {
    let mut measured = ArtifactSizes::new();
    for artifact in artifacts {
        let bytes = sizes::tree_size(executor, &artifact.address, &artifact.remote_path).await?;
        debug!(artifact = %artifact.name, module = %artifact.module, bytes, "Measured");
        measured.insert(artifact.name.clone(), bytes);
    }
    Ok(measured)
}

/// Everything the backup will copy against free space at the backup location.
pub fn backup_plan(sizes: &ArtifactSizes, storage: &dyn LocalStorage, backup_root: &Path) -> Result<SpacePlan> {
    Ok(SpacePlan {
        location: backup_root.display().to_string(),
        required: sizes.values().sum(),
        available: storage.available_bytes(backup_root)?,
    })
}

/// One plan per restore node.
///
/// `artifacts` are restore-side (node addresses and destination paths);
/// `backup_sizes` holds the size of each backup directory by artifact name.
/// Available space is the free space of every distinct filesystem the node's
/// destinations live on plus what those destinations use now, since the sync
/// overwrites in place.
pub async fn restore_plans(
    executor: &dyn RemoteExecutor,
    backup_sizes: &ArtifactSizes,
    artifacts: &[DataArtifact],
) -> Result<Vec<SpacePlan>> {
    #[derive(Default)]
    struct NodeSpace {
        required: u64,
        used: u64,
        free: BTreeMap<String, u64>,
    }

    let mut per_node: BTreeMap<&str, NodeSpace> = BTreeMap::new();
    for artifact in artifacts {
        let required = backup_sizes.get(&artifact.name).copied().unwrap_or(0);
        let filesystem = sizes::filesystem(executor, &artifact.address, &artifact.remote_path).await?;
        let used = sizes::total_size(executor, &artifact.address, &[artifact.remote_path.clone()]).await?;
        debug!(
            artifact = %artifact.name,
            required,
            used,
            mount = %filesystem.mount,
            free = filesystem.available,
            "Restore sizing"
        );

        let node = per_node.entry(artifact.address.as_str()).or_default();
        node.required += required;
        node.used += used;
        node.free.insert(filesystem.mount, filesystem.available);
    }

    Ok(per_node
        .into_iter()
        .map(|(address, node)| SpacePlan {
            location: address.to_string(),
            required: node.required,
            available: node.used + node.free.values().sum::<u64>(),
        })
        .collect())
}
