//! On-disk layout of a backup location and the data artifacts it holds.
//!
//! ```text
//! <root>/Columnstore.xml        cluster descriptor
//! <root>/releasenum             version file
//! <root>/topology.json          resolved topology snapshot
//! <root>/cnf/<module>/my.cnf    metadata store configs
//! <root>/pm<N>dbroot<M>/        DBRoot M of PM N
//! <root>/pm<N>DB/               metadata store co-located on PM N
//! <root>/um<N>/                 metadata store of UM N
//! <root>/backup.<i>/            generation i, same shape
//! ```

use crate::topology::{ClusterTopology, ModuleNode, Role};
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "Columnstore.xml";
pub const VERSION_FILE: &str = "releasenum";
pub const TOPOLOGY_FILE: &str = "topology.json";
pub const CNF_DIR: &str = "cnf";
pub const MY_CNF: &str = "my.cnf";
const GENERATION_PREFIX: &str = "backup.";

#[derive(Debug, Clone)]
pub struct BackupLayout {
    root: PathBuf,
}

impl BackupLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a top-level entry
    pub fn top(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn generation(&self, index: usize) -> PathBuf {
        self.root.join(generation_name(index))
    }

    /// Path of `name` inside generation `index`
    pub fn in_generation(&self, index: usize, name: &str) -> PathBuf {
        self.generation(index).join(name)
    }

    pub fn cnf_entry(module: &str) -> String {
        format!("{}/{}", CNF_DIR, module)
    }
}

pub fn generation_name(index: usize) -> String {
    format!("{}{}", GENERATION_PREFIX, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// DBRoot in local slot `slot` (0-based) of a PM
    DbRoot { dbroot: u32, slot: usize },
    /// Metadata store data directory
    Metadata,
}

/// A tree copied between one node and one top-level backup directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataArtifact {
    /// Top-level directory name in the backup
    pub name: String,
    pub role: Role,
    pub module_id: u32,
    pub module: String,
    pub address: String,
    pub remote_path: PathBuf,
    pub kind: ArtifactKind,
}

/// Backup directory name of DBRoot `dbroot` taken from PM `pm_id`
pub fn dbroot_artifact_name(pm_id: u32, dbroot: u32) -> String {
    format!("pm{}dbroot{}", pm_id, dbroot)
}

/// Every DBRoot tree, one per (PM, DBRoot), in module then slot order
pub fn dbroot_artifacts(topology: &ClusterTopology) -> Result<Vec<DataArtifact>> {
    let mut artifacts = Vec::new();
    for pm in &topology.pm_modules {
        for (slot, dbroot) in pm.dbroots.iter().enumerate() {
            artifacts.push(DataArtifact {
                name: dbroot_artifact_name(pm.id, *dbroot),
                role: Role::Pm,
                module_id: pm.id,
                module: pm.name(),
                address: pm.address()?.to_string(),
                remote_path: topology.dbroot_path(*dbroot)?.to_path_buf(),
                kind: ArtifactKind::DbRoot { dbroot: *dbroot, slot },
            });
        }
    }
    Ok(artifacts)
}

/// Every metadata store: co-located ones on PMs, then dedicated UMs
pub fn metadata_artifacts(topology: &ClusterTopology, metadata_dir: &Path) -> Result<Vec<DataArtifact>> {
    let mut artifacts = Vec::new();
    if topology.pm_hosts_metadata() {
        for pm in &topology.pm_modules {
            artifacts.push(metadata_artifact(pm, format!("pm{}DB", pm.id), metadata_dir)?);
        }
    }
    for um in topology.dedicated_um_modules() {
        artifacts.push(metadata_artifact(um, format!("um{}", um.id), metadata_dir)?);
    }
    Ok(artifacts)
}

fn metadata_artifact(module: &ModuleNode, name: String, metadata_dir: &Path) -> Result<DataArtifact> {
    Ok(DataArtifact {
        name,
        role: module.role,
        module_id: module.id,
        module: module.name(),
        address: module.address()?.to_string(),
        remote_path: metadata_dir.to_path_buf(),
        kind: ArtifactKind::Metadata,
    })
}
