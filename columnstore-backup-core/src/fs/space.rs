//! Free space on the control host.

use nix::sys::statvfs::statvfs;
use std::path::Path;

/// Bytes available to unprivileged writers on the filesystem holding `path`.
///
/// A path that does not exist yet is measured on its nearest existing ancestor.
pub fn available_bytes(path: &Path) -> std::io::Result<u64> {
    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"));
    let stat = statvfs(existing).map_err(std::io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_available_bytes_on_missing_child() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let direct = available_bytes(temp_dir.path())?;
        let nested = available_bytes(&temp_dir.path().join("not/yet/created"))?;
        assert!(direct > 0);
        // Same filesystem; allow for concurrent writers elsewhere on the host
        let diff = direct.abs_diff(nested);
        assert!(diff < 64 * 1024 * 1024);
        Ok(())
    }
}
