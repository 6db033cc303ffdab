//! Picks a reachable address for every module.

use super::{ClusterTopology, InstallMode, ModuleNode};
use crate::remote::{probe, RemoteExecutor};
use crate::utils::errors::{BackupError, Result};
use tracing::{info, warn};

/// Resolve every PM and dedicated UM node.
///
/// All modules are probed before failing so the error names every unreachable
/// node at once.
pub async fn resolve_modules(topology: &mut ClusterTopology, executor: &dyn RemoteExecutor) -> Result<()> {
    let single = topology.install_mode == InstallMode::Single;
    let mut unresolved = Vec::new();

    let modules = topology.pm_modules.iter_mut().chain(topology.um_nodes.iter_mut());
    for module in modules {
        module.resolved = None;
        if let Some(address) = resolve_module(module, executor).await {
            info!(module = %module.name(), address = %address, "Resolved module");
            module.resolved = Some(address);
        } else {
            warn!(module = %module.name(), "No reachable address");
            unresolved.push(module.name());
        }

        // Every module of a single-node install shares the one address; one probe is enough
        if single && !unresolved.is_empty() {
            break;
        }
    }

    if !unresolved.is_empty() {
        return Err(BackupError::Unreachable(format!(
            "unreachable modules: {}",
            unresolved.join(", ")
        )));
    }
    Ok(())
}

async fn resolve_module(module: &ModuleNode, executor: &dyn RemoteExecutor) -> Option<String> {
    for (index, candidate) in module.candidates.iter().enumerate() {
        if probe(executor, &candidate.address).await {
            return Some(candidate.address.clone());
        }
        if index + 1 < module.candidates.len() {
            warn!(
                module = %module.name(),
                address = %candidate.address,
                "Primary address unreachable, trying secondary"
            );
        }
    }
    None
}
