//! Directory traversal for size accounting.

use std::path::Path;
use walkdir::WalkDir;

/// Calculate total size of all regular files below `root`.
///
/// Symlinks are not followed and count as zero; a missing root is empty.
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    if !root.exists() {
        return Ok(0);
    }

    let mut total_size = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Files can vanish while a sync is rewriting the tree
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(metadata) => total_size += metadata.len(),
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(total_size)
}
