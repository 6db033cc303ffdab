//! Disk usage queries on remote nodes.

use super::{run_checked, RemoteExecutor};
use crate::utils::errors::{BackupError, Result};
use crate::utils::shell::quote;
use std::path::{Path, PathBuf};

/// On-disk size of one tree, failing if it cannot be read.
pub async fn tree_size(executor: &dyn RemoteExecutor, host: &str, path: &Path) -> Result<u64> {
    let command = format!("du -sb {}", quote(&path.to_string_lossy()));
    let stdout = run_checked(executor, host, &command).await?;
    parse_du_line(&stdout).ok_or_else(|| unparsable(host, &command, &stdout))
}

/// Combined size of several trees; missing paths count as empty.
pub async fn total_size(executor: &dyn RemoteExecutor, host: &str, paths: &[PathBuf]) -> Result<u64> {
    if paths.is_empty() {
        return Ok(0);
    }
    let quoted: Vec<String> = paths.iter().map(|p| quote(&p.to_string_lossy())).collect();
    let command = format!("du -sbc {} 2>/dev/null", quoted.join(" "));
    let output = executor.run(host, &command).await?;
    Ok(parse_du_total(&output.stdout))
}

/// Filesystem holding a path, as reported by `df`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub mount: String,
    pub available: u64,
}

/// The filesystem holding `path` and its free bytes.
pub async fn filesystem(executor: &dyn RemoteExecutor, host: &str, path: &Path) -> Result<Filesystem> {
    let command = format!("df -P -B1 {}", quote(&path.to_string_lossy()));
    let stdout = run_checked(executor, host, &command).await?;
    parse_df(&stdout).ok_or_else(|| unparsable(host, &command, &stdout))
}

fn unparsable(host: &str, command: &str, stdout: &str) -> BackupError {
    tracing::error!(host, command, output = %stdout.trim(), "Unexpected output");
    BackupError::RemoteCommand {
        host: host.to_string(),
        command: command.to_string(),
        status: 0,
    }
}

/// First field of the first `du -sb` line
pub fn parse_du_line(stdout: &str) -> Option<u64> {
    stdout.lines().next()?.split_whitespace().next()?.parse().ok()
}

/// `total` line of `du -sbc`; 0 if absent
pub fn parse_du_total(stdout: &str) -> u64 {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let size = fields.next()?;
            (fields.next()? == "total").then(|| size.parse::<u64>().ok()).flatten()
        })
        .last()
        .unwrap_or(0)
}

/// Available and "Mounted on" columns of POSIX `df -B1` output
pub fn parse_df(stdout: &str) -> Option<Filesystem> {
    let fields: Vec<&str> = stdout.lines().nth(1)?.split_whitespace().collect();
    let available = fields.get(3)?.parse().ok()?;
    // Mount points may contain spaces
    let mount = fields.get(5..).filter(|m| !m.is_empty())?.join(" ");
    Some(Filesystem { mount, available })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[test]
    fn test_parse_du_line() {
        assert_eq!(parse_du_line("123456\t/var/lib/columnstore/data1\n"), Some(123456));
        assert_eq!(parse_du_line(""), None);
    }

    #[test]
    fn test_parse_du_total() {
        let out = "100\t/a\n250\t/b\n350\ttotal\n";
        assert_eq!(parse_du_total(out), 350);
        assert_eq!(parse_du_total(""), 0);
    }

    #[test]
    fn test_parse_df() {
        let out = "Filesystem     1-blocks      Used Available Capacity Mounted on\n\
                   /dev/sdb1   1000000000 400000000 600000000      40% /data\n";
        assert_eq!(
            parse_df(out),
            Some(Filesystem {
                mount: "/data".into(),
                available: 600000000
            })
        );
        let spaced = "Filesystem 1-blocks Used Available Capacity Mounted on\n\
                      /dev/sdc1 10 4 6 40% /mnt/cold store\n";
        assert_eq!(parse_df(spaced).map(|fs| fs.mount).as_deref(), Some("/mnt/cold store"));
        assert_eq!(parse_df("garbage"), None);
    }

    #[tokio::test]
    async fn test_tree_size_via_executor() {
        let cluster = FakeCluster::new();
        cluster.set_size("10.0.0.1", "/data1", 4096);
        let size = tree_size(&cluster, "10.0.0.1", Path::new("/data1")).await.unwrap();
        assert_eq!(size, 4096);

        let total = total_size(
            &cluster,
            "10.0.0.1",
            &[PathBuf::from("/data1"), PathBuf::from("/missing")],
        )
        .await
        .unwrap();
        assert_eq!(total, 4096);
    }
}
