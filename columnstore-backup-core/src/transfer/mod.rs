//! Tree synchronization between the control host and cluster nodes.
//!
//! - `rsync`: the copy primitive
//! - `dispatcher`: blocking and batched concurrent job execution
//! - `progress`: sliding-window rate, percent and ETA math
//! - `monitor`: periodic sampling of destination sizes during a batch

pub mod dispatcher;
pub mod monitor;
pub mod progress;
pub mod rsync;

use crate::utils::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub use dispatcher::{Dispatcher, DispatchSummary};
pub use monitor::{ClusterSizeProbe, ProgressMonitor, SizeProbe};
pub use rsync::RsyncSyncer;

/// One end of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote { host: String, path: PathBuf },
}

impl Location {
    pub fn remote(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Location::Remote {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Location::Local(path) => path,
            Location::Remote { path, .. } => path,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote { host, path } => write!(f, "{}:{}", host, path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Directory contents mirrored into the destination directory
    Tree,
    /// A single file copied to the destination path
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed(i32),
}

#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Artifact name used in logs and failure reports (e.g. `pm1dbroot2`)
    pub label: String,
    pub kind: TransferKind,
    pub source: Location,
    pub destination: Location,

    /// Prior snapshot of the destination; unchanged files are hard-linked from it
    pub link_dest: Option<PathBuf>,

    /// Bytes the job is expected to move, for progress reporting
    pub expected_bytes: u64,

    pub dry_run: bool,
}

impl TransferJob {
    pub fn tree(label: impl Into<String>, source: Location, destination: Location) -> Self {
        Self {
            label: label.into(),
            kind: TransferKind::Tree,
            source,
            destination,
            link_dest: None,
            expected_bytes: 0,
            dry_run: false,
        }
    }

    pub fn file(label: impl Into<String>, source: Location, destination: Location) -> Self {
        Self {
            kind: TransferKind::File,
            ..Self::tree(label, source, destination)
        }
    }

    pub fn with_link_dest(mut self, link_dest: impl Into<PathBuf>) -> Self {
        self.link_dest = Some(link_dest.into());
        self
    }

    pub fn with_expected_bytes(mut self, bytes: u64) -> Self {
        self.expected_bytes = bytes;
        self
    }
}

/// Result of one finished job as recorded in the batch sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub label: String,
    pub status: JobStatus,
}

/// The remote copy primitive.
///
/// Returns the copy tool's exit status; `Err` only when the tool could not
/// be started at all.
#[async_trait]
pub trait Syncer: Send + Sync {
    async fn sync(&self, job: &TransferJob) -> Result<i32>;
}
