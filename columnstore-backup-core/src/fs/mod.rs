//! Local filesystem queries on the control host.

pub mod space;
pub mod walker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Space accounting for paths on the control host
pub trait LocalStorage: Send + Sync {
    /// Bytes an unprivileged writer can still use on the filesystem holding `path`
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64>;

    /// Apparent size of every regular file below `path` (0 if it does not exist)
    fn tree_size(&self, path: &Path) -> std::io::Result<u64>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStorage;

impl LocalStorage for HostStorage {
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64> {
        space::available_bytes(path)
    }

    fn tree_size(&self, path: &Path) -> std::io::Result<u64> {
        walker::calculate_total_size(path)
    }
}

/// `tree_size` of each path, walked on the blocking pool.
pub async fn tree_sizes(storage: Arc<dyn LocalStorage>, paths: Vec<PathBuf>) -> std::io::Result<Vec<u64>> {
    tokio::task::spawn_blocking(move || paths.iter().map(|p| storage.tree_size(p)).collect())
        .await
        .map_err(std::io::Error::from)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tree_sizes_keep_path_order() {
        let temp_dir = TempDir::new().unwrap();
        let full = temp_dir.path().join("pm1dbroot1");
        std::fs::create_dir_all(full.join("000.dir")).unwrap();
        std::fs::write(full.join("000.dir/FILE000.cdf"), vec![0u8; 300]).unwrap();

        let sizes = tree_sizes(
            Arc::new(HostStorage),
            vec![full, temp_dir.path().join("missing")],
        )
        .await
        .unwrap();
        assert_eq!(sizes, vec![300, 0]);
    }
}
