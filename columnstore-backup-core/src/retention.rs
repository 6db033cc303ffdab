//! Incremental generation rotation.
//!
//! The top level of a backup location always holds the latest copy. Before a
//! new copy starts, generations shift down by one and each top-level artifact
//! is moved into `backup.1`, which then serves as the link-dest reference so
//! unchanged files become hard links instead of fresh copies.

use crate::layout::{generation_name, BackupLayout};
use crate::utils::errors::Result;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const DISCARD_PREFIX: &str = ".discard.";

/// One completed filesystem step, kept for rollback
enum Step {
    Renamed { from: PathBuf, to: PathBuf },
    Created(PathBuf),
}

pub struct Retention {
    layout: BackupLayout,
    generations: usize,
}

impl Retention {
    pub fn new(layout: BackupLayout, generations: usize) -> Self {
        Self {
            layout,
            generations: generations.max(1),
        }
    }

    /// Indices of generation directories currently on disk, ascending
    pub fn existing_generations(&self) -> Result<Vec<usize>> {
        let root = self.layout.root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix("backup."))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            if index > 0 {
                found.push(index);
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// Shift generations and create an empty `backup.1`.
    ///
    /// Either every step succeeds or all completed steps are undone.
    pub fn rotate(&self) -> Result<()> {
        let existing = self.existing_generations()?;
        info!(
            generations = self.generations,
            existing = existing.len(),
            "Rotating backup generations"
        );

        let mut steps = Vec::new();
        if let Err(e) = self.rotate_steps(&existing, &mut steps) {
            warn!(error = %e, "Rotation failed, rolling back");
            rollback(steps);
            return Err(e);
        }

        for step in steps {
            if let Step::Renamed { to, .. } = step {
                if is_discard(&to) {
                    debug!(path = %to.display(), "Removing discarded generation");
                    if let Err(e) = fs::remove_dir_all(&to) {
                        warn!(path = %to.display(), error = %e, "Failed to remove discarded generation");
                    }
                }
            }
        }
        Ok(())
    }

    fn rotate_steps(&self, existing: &[usize], steps: &mut Vec<Step>) -> Result<()> {
        // The oldest kept generation and anything beyond the configured count go away
        for &index in existing.iter().filter(|&&i| i >= self.generations) {
            let from = self.layout.generation(index);
            let to = self.layout.top(&format!("{}{}", DISCARD_PREFIX, generation_name(index)));
            if to.exists() {
                fs::remove_dir_all(&to)?;
            }
            rename(&from, &to, steps)?;
        }

        for index in (1..self.generations).rev() {
            if existing.contains(&index) {
                rename(&self.layout.generation(index), &self.layout.generation(index + 1), steps)?;
            }
        }

        let first = self.layout.generation(1);
        fs::create_dir_all(self.layout.root())?;
        fs::create_dir(&first)?;
        steps.push(Step::Created(first));
        Ok(())
    }

    /// Move a top-level artifact into `backup.1`, returning its new path to be
    /// used as link-dest. `None` when there is no previous copy.
    pub fn retire_artifact(&self, name: &str) -> Result<Option<PathBuf>> {
        let current = self.layout.top(name);
        if fs::symlink_metadata(&current).is_err() {
            return Ok(None);
        }
        let retired = self.layout.in_generation(1, name);
        if let Some(parent) = retired.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&current, &retired)?;
        debug!(artifact = name, to = %retired.display(), "Retired artifact into generation 1");
        Ok(Some(retired))
    }
}

fn rename(from: &PathBuf, to: &PathBuf, steps: &mut Vec<Step>) -> Result<()> {
    debug!(from = %from.display(), to = %to.display(), "Rename");
    fs::rename(from, to)?;
    steps.push(Step::Renamed {
        from: from.clone(),
        to: to.clone(),
    });
    Ok(())
}

fn rollback(steps: Vec<Step>) {
    for step in steps.into_iter().rev() {
        let result = match &step {
            Step::Renamed { from, to } => fs::rename(to, from),
            Step::Created(path) => fs::remove_dir(path),
        };
        if let Err(e) = result {
            let path = match &step {
                Step::Renamed { to, .. } => to,
                Step::Created(path) => path,
            };
            warn!(path = %path.display(), error = %e, "Rollback step failed");
        }
    }
}

fn is_discard(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(DISCARD_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn seed(layout: &BackupLayout, count: usize) {
        for i in 1..=count {
            let dir = layout.generation(i);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("marker"), format!("gen{}", i)).unwrap();
        }
    }

    fn marker(layout: &BackupLayout, index: usize) -> Option<String> {
        fs::read_to_string(layout.generation(index).join("marker")).ok()
    }

    fn entries(path: &Path) -> usize {
        fs::read_dir(path).unwrap().count()
    }

    #[test]
    fn test_rotation_shifts_every_generation() {
        for generations in 1..=20 {
            for existing in 0..=generations {
                let temp_dir = TempDir::new().unwrap();
                let layout = BackupLayout::new(temp_dir.path());
                seed(&layout, existing);

                Retention::new(layout.clone(), generations).rotate().unwrap();

                assert!(layout.generation(1).is_dir());
                assert_eq!(entries(&layout.generation(1)), 0, "N={} k={}", generations, existing);
                for i in 2..=generations {
                    let expected = (i - 1 <= existing).then(|| format!("gen{}", i - 1));
                    assert_eq!(marker(&layout, i), expected, "N={} k={} i={}", generations, existing, i);
                }
                assert!(!layout.generation(generations + 1).exists());
                // Only generation directories remain, no discard leftovers
                let extra = fs::read_dir(temp_dir.path())
                    .unwrap()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
                    .count();
                assert_eq!(extra, 0);
            }
        }
    }

    #[test]
    fn test_lowered_generation_count_prunes_extras() {
        let temp_dir = TempDir::new().unwrap();
        let layout = BackupLayout::new(temp_dir.path());
        seed(&layout, 5);

        Retention::new(layout.clone(), 2).rotate().unwrap();
        assert_eq!(marker(&layout, 2).as_deref(), Some("gen1"));
        assert!(!layout.generation(3).exists());
        assert!(!layout.generation(5).exists());
    }

    #[test]
    fn test_failed_rotation_is_rolled_back() {
        let temp_dir = TempDir::new().unwrap();
        let layout = BackupLayout::new(temp_dir.path());
        seed(&layout, 1);
        fs::create_dir_all(layout.generation(3)).unwrap();
        fs::write(layout.generation(3).join("marker"), "gen3").unwrap();
        // A stray file where generation 2 should go makes 1 -> 2 fail
        fs::write(layout.generation(2), "not a directory").unwrap();

        let err = Retention::new(layout.clone(), 3).rotate();
        assert!(err.is_err());

        assert_eq!(marker(&layout, 1).as_deref(), Some("gen1"));
        assert_eq!(marker(&layout, 3).as_deref(), Some("gen3"));
        assert!(layout.generation(2).is_file());
    }

    #[test]
    fn test_retire_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let layout = BackupLayout::new(temp_dir.path());
        let retention = Retention::new(layout.clone(), 3);
        retention.rotate().unwrap();

        assert_eq!(retention.retire_artifact("pm1dbroot1").unwrap(), None);

        fs::create_dir_all(layout.top("cnf/um1")).unwrap();
        fs::write(layout.top("cnf/um1/my.cnf"), "[mysqld]").unwrap();
        let retired = retention.retire_artifact("cnf/um1").unwrap().unwrap();
        assert_eq!(retired, layout.in_generation(1, "cnf/um1"));
        assert!(retired.join("my.cnf").is_file());
        assert!(!layout.top("cnf/um1").exists());
    }
}
