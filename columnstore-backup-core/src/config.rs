//! Configuration management for backup and restore runs.
//!
//! Loads optional settings from a TOML file; command line flags are applied
//! on top by the front ends before `validate` is called.

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 100;
pub const MIN_GENERATIONS: usize = 1;
pub const MAX_GENERATIONS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteConfig,
    pub cluster: ClusterConfig,
    pub transfer: TransferConfig,
    pub retention: RetentionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Account used for remote commands and rsync
    pub user: String,

    /// SSH port on every node
    pub ssh_port: u16,

    /// Seconds to wait for a TCP connection before declaring a node unreachable
    pub connect_timeout_secs: u64,

    /// Private keys tried after the SSH agent (default: ~/.ssh/id_ed25519, ~/.ssh/id_rsa)
    pub identity_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Installation root on every node
    pub install_dir: PathBuf,

    /// Metadata store data directory (default: <install_dir>/mysql/db)
    pub metadata_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum sync jobs running at once (1-100)
    pub concurrency: usize,

    /// Compress data in transit
    pub compress: bool,

    /// rsync binary on the control host
    pub rsync_path: PathBuf,

    /// Seconds between progress samples
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Incremental generations kept next to the latest backup (1-20)
    pub generations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            ssh_port: 22,
            connect_timeout_secs: 30,
            identity_files: Vec::new(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("/usr/local/mariadb/columnstore"),
            metadata_dir: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            compress: false,
            rsync_path: PathBuf::from("rsync"),
            poll_interval_secs: 5,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { generations: 3 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Check value ranges after command line overrides have been applied
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.transfer.concurrency) {
            return Err(BackupError::Config(format!(
                "concurrency must be between {} and {}, got {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY, self.transfer.concurrency
            )));
        }
        if !(MIN_GENERATIONS..=MAX_GENERATIONS).contains(&self.retention.generations) {
            return Err(BackupError::Config(format!(
                "generation count must be between {} and {}, got {}",
                MIN_GENERATIONS, MAX_GENERATIONS, self.retention.generations
            )));
        }
        if self.remote.user.trim().is_empty() {
            return Err(BackupError::Config("remote user must not be empty".into()));
        }
        if !self.cluster.install_dir.is_absolute() {
            return Err(BackupError::Config(format!(
                "install directory must be absolute: {}",
                self.cluster.install_dir.display()
            )));
        }
        if self.transfer.poll_interval_secs == 0 {
            return Err(BackupError::Config("poll interval must be at least 1 second".into()));
        }
        Ok(())
    }
}

impl ClusterConfig {
    /// Cluster descriptor on each node
    pub fn descriptor_path(&self) -> PathBuf {
        self.install_dir.join("etc/Columnstore.xml")
    }

    /// Version file on each node
    pub fn version_file(&self) -> PathBuf {
        self.install_dir.join("releasenum")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.metadata_dir
            .clone()
            .unwrap_or_else(|| self.install_dir.join("mysql/db"))
    }

    /// Metadata store server config on UM nodes
    pub fn my_cnf_path(&self) -> PathBuf {
        self.install_dir.join("mysql/my.cnf")
    }

    pub fn get_config_tool(&self) -> PathBuf {
        self.install_dir.join("bin/mcsGetConfig")
    }

    pub fn admin_tool(&self) -> PathBuf {
        self.install_dir.join("bin/mcsadmin")
    }
}
