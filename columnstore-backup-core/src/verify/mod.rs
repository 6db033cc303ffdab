//! Restore preconditions.
//!
//! - `consistency`: the restore target must match the backed-up topology
//! - `safety`: the restore target must be stopped and hold no data

pub mod consistency;
pub mod safety;

pub use consistency::{compare, verify, Discrepancy, DiscrepancyKind};
pub use safety::{check_processes_stopped, check_targets_pristine};
