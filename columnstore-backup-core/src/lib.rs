//! Columnstore Backup Library
//!
//! Backup and restore orchestration for multi-node columnstore clusters:
//! topology discovery, capacity planning, generation rotation with hard-link
//! de-duplication and bounded-concurrency rsync transfers.

pub mod config;
pub mod fs;
pub mod layout;
pub mod orchestrator;
pub mod planner;
pub mod remote;
pub mod retention;
pub mod suspend;
pub mod topology;
pub mod transfer;
pub mod utils;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Settings;
pub use orchestrator::{run_backup, run_restore, BackupRequest, RestoreRequest, RunContext, RunSummary};
pub use utils::errors::{BackupError, Result};
