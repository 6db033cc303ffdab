//! Key lookup into the cluster descriptor.

use crate::remote::RemoteExecutor;
use crate::utils::errors::Result;
use crate::utils::shell::quote;
use async_trait::async_trait;
use std::path::PathBuf;

/// Read-only view of the cluster descriptor: `(section, key) -> value`.
#[async_trait]
pub trait ConfigLookup: Send + Sync {
    async fn get(&self, section: &str, key: &str) -> Result<Option<String>>;
}

/// Looks keys up by running the cluster's config tool on a node.
pub struct RemoteConfigLookup<'a> {
    executor: &'a dyn RemoteExecutor,
    host: String,
    tool: PathBuf,
}

impl<'a> RemoteConfigLookup<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, host: impl Into<String>, tool: PathBuf) -> Self {
        Self {
            executor,
            host: host.into(),
            tool,
        }
    }

    fn command(&self, section: &str, key: &str) -> String {
        format!(
            "{} {} {}",
            quote(&self.tool.to_string_lossy()),
            quote(section),
            quote(key)
        )
    }
}

#[async_trait]
impl ConfigLookup for RemoteConfigLookup<'_> {
    async fn get(&self, section: &str, key: &str) -> Result<Option<String>> {
        let output = self.executor.run(&self.host, &self.command(section, key)).await?;
        let value = output.stdout.trim();
        if !output.success() || value.is_empty() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[tokio::test]
    async fn test_remote_lookup_reads_values() {
        let cluster = FakeCluster::new();
        cluster.set_config("SystemConfig", "SystemName", "columnstore-1");

        let lookup = RemoteConfigLookup::new(&cluster, "10.0.0.1", PathBuf::from("/opt/cs/bin/mcsGetConfig"));
        assert_eq!(
            lookup.get("SystemConfig", "SystemName").await.unwrap().as_deref(),
            Some("columnstore-1")
        );
        assert_eq!(lookup.get("SystemConfig", "Missing").await.unwrap(), None);
        assert_eq!(
            cluster.commands_on("10.0.0.1")[0],
            "/opt/cs/bin/mcsGetConfig SystemConfig SystemName"
        );
    }
}
