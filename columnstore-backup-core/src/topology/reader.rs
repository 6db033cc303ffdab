//! Builds a `ClusterTopology` from descriptor lookups.

use super::{
    AddressCandidate, ClusterTopology, ConfigLookup, InstallMode, ModuleNode, ReleaseInfo, Role,
    ServerType,
};
use crate::remote::{run_checked, RemoteExecutor};
use crate::utils::errors::{BackupError, Result};
use crate::utils::shell::quote;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Secondary NIC slots probed after the primary one
const MAX_NICS: u32 = 2;

/// Read the cluster layout.
///
/// `entry_address` is the node the operator named on the command line; it is
/// the only address used for single-node installs.
pub async fn load_topology(lookup: &dyn ConfigLookup, entry_address: &str) -> Result<ClusterTopology> {
    let system_name = required(lookup, "SystemConfig", "SystemName").await?;

    let install_mode = match optional(lookup, "Installation", "SingleServerInstall").await?.as_deref() {
        Some(v) if v.eq_ignore_ascii_case("y") => InstallMode::Single,
        _ => InstallMode::Multi,
    };

    let server_type = match required(lookup, "Installation", "ServerTypeInstall").await?.as_str() {
        "1" => ServerType::PmOnly,
        "2" => ServerType::CombinedPmUm,
        other => {
            return Err(BackupError::Incompatible(format!("unknown install type '{}'", other)));
        }
    };

    let pm_has_um = optional(lookup, "Installation", "PMwithUM")
        .await?
        .is_some_and(|v| v.eq_ignore_ascii_case("y"));
    let dbroot_storage_type = optional(lookup, "Installation", "DBRootStorageType")
        .await?
        .unwrap_or_else(|| "internal".to_string());

    let pm_module_count = count(lookup, "SystemModuleConfig", "ModuleCount3").await?;
    let dbroot_count = count(lookup, "SystemConfig", "DBRootCount").await?;
    if pm_module_count == 0 {
        return Err(BackupError::Config("descriptor lists no PM modules".into()));
    }

    let mut pm_modules = Vec::with_capacity(pm_module_count);
    for id in 1..=pm_module_count as u32 {
        let candidates = match install_mode {
            InstallMode::Single => single_candidate(entry_address),
            InstallMode::Multi => read_candidates(lookup, Role::Pm, id).await?,
        };
        let dbroots = read_pm_dbroots(lookup, id).await?;
        pm_modules.push(ModuleNode {
            id,
            role: Role::Pm,
            candidates,
            resolved: None,
            dbroots,
        });
    }

    let (um_module_count, um_nodes) = match (server_type, install_mode) {
        (ServerType::CombinedPmUm, _) => (pm_module_count, Vec::new()),
        (ServerType::PmOnly, InstallMode::Single) => (
            1,
            vec![ModuleNode {
                id: 1,
                role: Role::Um,
                candidates: single_candidate(entry_address),
                resolved: None,
                dbroots: Vec::new(),
            }],
        ),
        (ServerType::PmOnly, InstallMode::Multi) => {
            let um_count = count(lookup, "SystemModuleConfig", "ModuleCount2").await?;
            let mut nodes = Vec::with_capacity(um_count);
            for id in 1..=um_count as u32 {
                nodes.push(ModuleNode {
                    id,
                    role: Role::Um,
                    candidates: read_candidates(lookup, Role::Um, id).await?,
                    resolved: None,
                    dbroots: Vec::new(),
                });
            }
            (um_count, nodes)
        }
    };

    let mut dbroot_paths = BTreeMap::new();
    for id in pm_modules.iter().flat_map(|m| m.dbroots.iter().copied()) {
        let path = required(lookup, "SystemConfig", &format!("DBRoot{}", id)).await?;
        dbroot_paths.insert(id, PathBuf::from(path));
    }

    let topology = ClusterTopology {
        system_name,
        install_mode,
        server_type,
        pm_has_um,
        dbroot_storage_type,
        um_module_count,
        pm_module_count,
        dbroot_count,
        dbroot_paths,
        pm_modules,
        um_nodes,
        release: None,
    };

    info!(
        system = %topology.system_name,
        install_mode = ?topology.install_mode,
        server_type = ?topology.server_type,
        pm_count = topology.pm_module_count,
        um_count = topology.um_module_count,
        dbroot_count = topology.dbroot_count,
        "Read cluster topology"
    );
    Ok(topology)
}

/// Read `version=` / `release=` from the version file on a node.
pub async fn read_release_info(executor: &dyn RemoteExecutor, host: &str, version_file: &Path) -> Result<ReleaseInfo> {
    let content = run_checked(executor, host, &format!("cat {}", quote(&version_file.to_string_lossy()))).await?;
    parse_release_info(&content)
}

pub fn parse_release_info(content: &str) -> Result<ReleaseInfo> {
    let mut version = None;
    let mut release = None;
    for line in content.lines() {
        match line.trim().split_once('=') {
            Some(("version", v)) => version = Some(v.trim().to_string()),
            Some(("release", v)) => release = Some(v.trim().to_string()),
            _ => {}
        }
    }
    match (version, release) {
        (Some(version), Some(release)) => Ok(ReleaseInfo { version, release }),
        _ => Err(BackupError::Config("version file lacks version= or release= entry".into())),
    }
}

async fn optional(lookup: &dyn ConfigLookup, section: &str, key: &str) -> Result<Option<String>> {
    let value = lookup.get(section, key).await?;
    debug!(section, key, value = ?value, "Descriptor lookup");
    Ok(value)
}

async fn required(lookup: &dyn ConfigLookup, section: &str, key: &str) -> Result<String> {
    optional(lookup, section, key)
        .await?
        .ok_or_else(|| BackupError::Config(format!("descriptor is missing {}/{}", section, key)))
}

async fn count(lookup: &dyn ConfigLookup, section: &str, key: &str) -> Result<usize> {
    let raw = required(lookup, section, key).await?;
    raw.parse()
        .map_err(|_| BackupError::Config(format!("{}/{} is not a count: '{}'", section, key, raw)))
}

fn single_candidate(address: &str) -> Vec<AddressCandidate> {
    vec![AddressCandidate {
        address: address.to_string(),
        hostname: None,
    }]
}

fn is_assigned(value: &str) -> bool {
    !value.is_empty() && value != "0.0.0.0" && !value.eq_ignore_ascii_case("unassigned")
}

async fn read_candidates(lookup: &dyn ConfigLookup, role: Role, id: u32) -> Result<Vec<AddressCandidate>> {
    let type_id = role.type_id();
    let mut candidates = Vec::new();
    for nic in 1..=MAX_NICS {
        let address = optional(lookup, "SystemModuleConfig", &format!("ModuleIPAddr{}-{}-{}", id, nic, type_id)).await?;
        let Some(address) = address.filter(|a| is_assigned(a)) else {
            continue;
        };
        let hostname = optional(lookup, "SystemModuleConfig", &format!("ModuleHostName{}-{}-{}", id, nic, type_id))
            .await?
            .filter(|h| is_assigned(h));
        candidates.push(AddressCandidate { address, hostname });
    }
    Ok(candidates)
}

async fn read_pm_dbroots(lookup: &dyn ConfigLookup, id: u32) -> Result<Vec<u32>> {
    let slots = match optional(lookup, "SystemModuleConfig", &format!("ModuleDBRootCount{}-3", id)).await? {
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            BackupError::Config(format!("ModuleDBRootCount{}-3 is not a count: '{}'", id, raw))
        })?,
        None => 0,
    };
    let mut dbroots = Vec::with_capacity(slots as usize);
    for slot in 1..=slots {
        let key = format!("ModuleDBRootID{}-{}-3", id, slot);
        let raw = required(lookup, "SystemModuleConfig", &key).await?;
        let dbroot = raw
            .parse()
            .map_err(|_| BackupError::Config(format!("{} is not a DBRoot id: '{}'", key, raw)))?;
        dbroots.push(dbroot);
    }
    Ok(dbroots)
}
