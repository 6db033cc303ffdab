//! Utility modules shared by backup and restore.

pub mod errors;
pub mod logger;
pub mod shell;
pub mod shutdown;

pub use errors::{BackupError, Result};
