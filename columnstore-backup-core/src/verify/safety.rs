//! Pre-restore safety gate: the target cluster must be stopped and empty.

use crate::layout::metadata_artifacts;
use crate::remote::{run_checked, RemoteExecutor};
use crate::topology::ClusterTopology;
use crate::utils::errors::{BackupError, Result};
use crate::utils::shell::quote;
use std::path::Path;
use tracing::{debug, error, info};

/// Cluster and metadata store daemons that must not be running during a restore
pub const CLUSTER_PROCESSES: &[&str] = &[
    "ProcMon",
    "ProcMgr",
    "controllernode",
    "workernode",
    "PrimProc",
    "ExeMgr",
    "DMLProc",
    "DDLProc",
    "WriteEngineServ",
    "DecomSvr",
    "StorageManager",
    "mysqld",
    "mariadbd",
];

/// Databases a freshly installed metadata store already contains
pub const SYSTEM_DATABASES: &[&str] = &[
    "mysql",
    "information_schema",
    "performance_schema",
    "sys",
    "calpontsys",
    "infinidb_vtable",
    "columnstore_info",
    "infinidb_querystats",
    "test",
    "lost+found",
];

/// Files that only exist in a DBRoot that has held data
pub const RESIDUAL_MARKERS: &[&str] = &["000.dir", "systemFiles/dbrm/BRM_saves_current"];

/// Names from `ps -eo comm=` output that belong to the cluster, deduplicated
pub fn running_cluster_processes(ps_output: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for name in ps_output.lines().map(str::trim) {
        if CLUSTER_PROCESSES.contains(&name) && !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    }
    found
}

/// Directory names from a data directory listing that are not system databases
pub fn user_databases(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && !SYSTEM_DATABASES.contains(name))
        .map(str::to_string)
        .collect()
}

/// Fail with `ClusterRunning` if any node runs a cluster process.
pub async fn check_processes_stopped(topology: &ClusterTopology, executor: &dyn RemoteExecutor) -> Result<()> {
    let mut running = Vec::new();
    for node in topology.nodes() {
        let address = node.address()?;
        let output = run_checked(executor, address, "ps -eo comm=").await?;
        let found = running_cluster_processes(&output);
        if !found.is_empty() {
            error!(module = %node.name(), processes = %found.join(", "), "Cluster processes running");
            running.push(format!("{} ({})", node.name(), found.join(", ")));
        }
    }
    if !running.is_empty() {
        return Err(BackupError::ClusterRunning(running.join("; ")));
    }
    info!("No cluster processes running on restore target");
    Ok(())
}

/// Fail with `NotPristine` if a metadata store holds user databases or a
/// DBRoot carries residual data.
pub async fn check_targets_pristine(
    topology: &ClusterTopology,
    executor: &dyn RemoteExecutor,
    metadata_dir: &Path,
) -> Result<()> {
    let mut residue = Vec::new();

    for artifact in metadata_artifacts(topology, metadata_dir)? {
        let command = format!(
            "find {} -mindepth 1 -maxdepth 1 -type d -printf '%f\\n' 2>/dev/null",
            quote(&artifact.remote_path.to_string_lossy())
        );
        // A missing data directory lists nothing and counts as pristine
        let output = executor.run(&artifact.address, &command).await?;
        let databases = user_databases(&output.stdout);
        if !databases.is_empty() {
            error!(module = %artifact.module, databases = %databases.join(", "), "User databases present");
            residue.push(format!("{} has databases {}", artifact.module, databases.join(", ")));
        }
    }

    for pm in &topology.pm_modules {
        let address = pm.address()?;
        for dbroot in &pm.dbroots {
            let root = topology.dbroot_path(*dbroot)?;
            for marker in RESIDUAL_MARKERS {
                let path = root.join(marker);
                let command = format!("test -e {}", quote(&path.to_string_lossy()));
                if executor.run(address, &command).await?.success() {
                    error!(module = %pm.name(), path = %path.display(), "Residual DBRoot data");
                    residue.push(format!("{} DBRoot{} contains {}", pm.name(), dbroot, marker));
                } else {
                    debug!(module = %pm.name(), path = %path.display(), "Marker absent");
                }
            }
        }
    }

    if !residue.is_empty() {
        return Err(BackupError::NotPristine(residue.join("; ")));
    }
    info!("Restore target is pristine");
    Ok(())
}
