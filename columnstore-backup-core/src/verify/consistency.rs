//! Backup-side versus restore-side topology comparison.

use crate::topology::{ClusterTopology, InstallMode};
use crate::utils::errors::{BackupError, Result};
use std::fmt::Debug;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscrepancyKind {
    Version,
    Structure,
    Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub field: String,
    pub backup: String,
    pub restore: String,
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: backup={} restore={}", self.field, self.backup, self.restore)
    }
}

/// Every field that differs between the two topologies.
pub fn compare(backup: &ClusterTopology, restore: &ClusterTopology) -> Vec<Discrepancy> {
    let mut found = Vec::new();

    let show = |r: &Option<crate::topology::ReleaseInfo>| {
        r.as_ref().map(ToString::to_string).unwrap_or_else(|| "unknown".into())
    };
    if backup.release != restore.release {
        found.push(Discrepancy {
            kind: DiscrepancyKind::Version,
            field: "version".into(),
            backup: show(&backup.release),
            restore: show(&restore.release),
        });
    }

    let mut structure = |field: &str, b: &dyn Debug, r: &dyn Debug| {
        let (b, r) = (format!("{:?}", b), format!("{:?}", r));
        if b != r {
            found.push(Discrepancy {
                kind: DiscrepancyKind::Structure,
                field: field.to_string(),
                backup: b,
                restore: r,
            });
        }
    };
    structure("install mode", &backup.install_mode, &restore.install_mode);
    structure("server type", &backup.server_type, &restore.server_type);
    structure("PM with UM", &backup.pm_has_um, &restore.pm_has_um);
    structure("UM module count", &backup.um_module_count, &restore.um_module_count);
    structure("PM module count", &backup.pm_module_count, &restore.pm_module_count);
    structure("DBRoot count", &backup.dbroot_count, &restore.dbroot_count);
    for pm in &backup.pm_modules {
        let restored = restore.pm_modules.iter().find(|m| m.id == pm.id).map(|m| m.dbroots.len());
        structure(&format!("{} DBRoot count", pm.name()), &Some(pm.dbroots.len()), &restored);
    }

    if backup.install_mode == InstallMode::Multi && restore.install_mode == InstallMode::Multi {
        for module in restore.nodes() {
            let Some(address) = module.resolved.as_deref() else {
                continue;
            };
            let known = backup
                .find_module(module.role, module.id)
                .is_some_and(|m| m.matches_address(address));
            if !known {
                let recorded = backup
                    .find_module(module.role, module.id)
                    .map(|m| {
                        m.candidates
                            .iter()
                            .map(|c| c.address.as_str())
                            .collect::<Vec<_>>()
                            .join("|")
                    })
                    .unwrap_or_else(|| "none".into());
                found.push(Discrepancy {
                    kind: DiscrepancyKind::Address,
                    field: format!("{} address", module.name()),
                    backup: recorded,
                    restore: address.to_string(),
                });
            }
        }
    }

    found
}

/// Refuse the restore on any version or structural difference. Address
/// differences are fatal too unless `allow_address_change` is set.
pub fn verify(backup: &ClusterTopology, restore: &ClusterTopology, allow_address_change: bool) -> Result<()> {
    let discrepancies = compare(backup, restore);
    let mut fatal = Vec::new();

    for d in &discrepancies {
        match d.kind {
            DiscrepancyKind::Address if allow_address_change => {
                warn!(field = %d.field, backup = %d.backup, restore = %d.restore, "Module address changed since backup");
            }
            _ => {
                error!(field = %d.field, backup = %d.backup, restore = %d.restore, "Topology mismatch");
                fatal.push(d);
            }
        }
    }

    if let Some(version) = fatal.iter().find(|d| d.kind == DiscrepancyKind::Version) {
        return Err(BackupError::Incompatible(format!(
            "version mismatch, backup is {} but restore target is {}",
            version.backup, version.restore
        )));
    }
    if !fatal.is_empty() {
        let details: Vec<String> = fatal.iter().map(ToString::to_string).collect();
        return Err(BackupError::Incompatible(details.join("; ")));
    }

    info!("Backup and restore topologies are compatible");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::topology_fixture;
    use crate::topology::ReleaseInfo;

    #[test]
    fn test_identical_topologies_match() {
        let backup = topology_fixture(2, 1, &[&[1, 2], &[3]]);
        let restore = backup.clone();
        assert!(compare(&backup, &restore).is_empty());
        assert!(verify(&backup, &restore, false).is_ok());
    }

    #[test]
    fn test_json_round_trip_is_symmetric() {
        let backup = topology_fixture(2, 2, &[&[1], &[2]]);
        let json = serde_json::to_string(&backup).unwrap();
        let reloaded: ClusterTopology = serde_json::from_str(&json).unwrap();
        assert!(verify(&reloaded, &backup, false).is_ok());
        assert!(verify(&backup, &reloaded, false).is_ok());
    }

    #[test]
    fn test_dbroot_count_mismatch_is_fatal() {
        let backup = topology_fixture(2, 1, &[&[1, 2], &[3, 4]]);
        let restore = topology_fixture(2, 1, &[&[1], &[2]]);

        let err = verify(&backup, &restore, true).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        let message = err.to_string();
        assert!(message.contains("DBRoot count"));
        assert!(message.contains("pm1 DBRoot count"));
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let backup = topology_fixture(1, 1, &[&[1]]);
        let mut restore = backup.clone();
        restore.release = Some(ReleaseInfo {
            version: "23.10.1".into(),
            release: "1".into(),
        });

        let err = verify(&backup, &restore, true).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_address_change_policy() {
        let backup = topology_fixture(2, 1, &[&[1], &[2]]);
        let mut restore = backup.clone();
        restore.pm_modules[1].resolved = Some("172.16.0.9".into());

        let found = compare(&backup, &restore);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, DiscrepancyKind::Address);
        assert_eq!(found[0].field, "pm2 address");

        assert_eq!(verify(&backup, &restore, false).unwrap_err().exit_code(), 4);
        assert!(verify(&backup, &restore, true).is_ok());
    }
}
