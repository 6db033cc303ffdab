//! Cluster topology model.
//!
//! A `ClusterTopology` is built once per run by the reader, completed by the
//! resolver and then passed by reference to every other component.

pub mod descriptor;
pub mod reader;
pub mod resolver;

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub use descriptor::{ConfigLookup, RemoteConfigLookup};
pub use reader::{load_topology, read_release_info};
pub use resolver::resolve_modules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    /// Dedicated UM nodes next to PM nodes
    PmOnly,
    /// Every PM node also plays the UM role
    CombinedPmUm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pm,
    Um,
}

impl Role {
    pub fn prefix(&self) -> &'static str {
        match self {
            Role::Pm => "pm",
            Role::Um => "um",
        }
    }

    /// Module type number used in descriptor keys
    pub fn type_id(&self) -> u32 {
        match self {
            Role::Pm => 3,
            Role::Um => 2,
        }
    }
}

/// One (address, hostname) pair a module can be reached on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCandidate {
    pub address: String,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleNode {
    pub id: u32,
    pub role: Role,

    /// Primary first, then secondary
    pub candidates: Vec<AddressCandidate>,

    /// First reachable candidate; `None` after resolution means unreachable
    #[serde(default)]
    pub resolved: Option<String>,

    /// Global DBRoot IDs in local slot order (PM only)
    #[serde(default)]
    pub dbroots: Vec<u32>,
}

impl ModuleNode {
    pub fn name(&self) -> String {
        format!("{}{}", self.role.prefix(), self.id)
    }

    /// Resolved address, or `Unreachable` if resolution has not succeeded
    pub fn address(&self) -> Result<&str> {
        self.resolved
            .as_deref()
            .ok_or_else(|| BackupError::Unreachable(format!("{} has no reachable address", self.name())))
    }

    /// True if `address` is one of the recorded candidate addresses or hostnames
    pub fn matches_address(&self, address: &str) -> bool {
        self.candidates
            .iter()
            .any(|c| c.address == address || c.hostname.as_deref() == Some(address))
    }
}

/// Contents of the version file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub release: String,
}

impl fmt::Display for ReleaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.release)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub system_name: String,
    pub install_mode: InstallMode,
    pub server_type: ServerType,
    pub pm_has_um: bool,
    pub dbroot_storage_type: String,
    pub um_module_count: usize,
    pub pm_module_count: usize,
    pub dbroot_count: usize,
    pub dbroot_paths: BTreeMap<u32, PathBuf>,
    pub pm_modules: Vec<ModuleNode>,

    /// Dedicated UM nodes; always empty for combined installs
    #[serde(default)]
    pub um_nodes: Vec<ModuleNode>,

    #[serde(default)]
    pub release: Option<ReleaseInfo>,
}

impl ClusterTopology {
    pub fn is_combined(&self) -> bool {
        self.server_type == ServerType::CombinedPmUm
    }

    /// UM role holders: the PM list itself for combined installs
    pub fn um_modules(&self) -> &[ModuleNode] {
        if self.is_combined() {
            &self.pm_modules
        } else {
            &self.um_nodes
        }
    }

    /// UM nodes that are not also PM nodes
    pub fn dedicated_um_modules(&self) -> &[ModuleNode] {
        if self.is_combined() {
            &[]
        } else {
            &self.um_nodes
        }
    }

    /// PM nodes carry a metadata store of their own
    pub fn pm_hosts_metadata(&self) -> bool {
        self.is_combined() || self.pm_has_um
    }

    /// Every distinct node: PMs then dedicated UMs
    pub fn nodes(&self) -> impl Iterator<Item = &ModuleNode> {
        self.pm_modules.iter().chain(self.dedicated_um_modules().iter())
    }

    pub fn find_module(&self, role: Role, id: u32) -> Option<&ModuleNode> {
        match role {
            Role::Pm => self.pm_modules.iter().find(|m| m.id == id),
            Role::Um => self.um_modules().iter().find(|m| m.id == id),
        }
    }

    pub fn dbroot_path(&self, id: u32) -> Result<&Path> {
        self.dbroot_paths
            .get(&id)
            .map(PathBuf::as_path)
            .ok_or_else(|| BackupError::Config(format!("DBRoot{} has no configured path", id)))
    }

    /// Resolved address of the first PM, where cluster-wide commands are sent
    pub fn coordinator_address(&self) -> Result<&str> {
        self.pm_modules
            .first()
            .ok_or_else(|| BackupError::Config("topology has no PM modules".into()))?
            .address()
    }
}
