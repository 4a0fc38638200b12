//! Node diagnostics and runtime log level changes.

use crate::error::Result;
use crate::models::DebugInfo;
use crate::node::{LogLevel, Node};

/// Snapshot of a node: identity, state, operation counters and, while the
/// node is started, storage usage and open sessions.
pub fn debug(node: &Node) -> DebugInfo {
    let datasets = node.datasets();
    DebugInfo {
        id: node.id().to_string(),
        version: crate::version().to_string(),
        state: node.state().to_string(),
        repo_kind: node.config().repo_kind.to_string(),
        data_dir: node.data_dir().map(|d| d.to_path_buf()),
        log_level: node.log_level().to_string(),
        operations: node.operation_counts(),
        upload_sessions: datasets.as_ref().map_or(0, |d| d.upload_sessions()),
        download_sessions: datasets.as_ref().map_or(0, |d| d.download_sessions()),
        space: datasets.map(|d| d.space()),
    }
}

/// Change the level of the process-wide log filter.
pub fn update_log_level(node: &Node, level: LogLevel) -> Result<()> {
    crate::logging::set_level(level)?;
    node.set_log_level(level);
    node.dump_diagnostics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeConfig, RepoKind};

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_follows_lifecycle() {
        let node = Node::new(NodeConfig::new().repo_kind(RepoKind::Memory).log_level(LogLevel::Warn)).unwrap();
        let info = debug(&node);
        assert_eq!(info.id, node.id());
        assert_eq!(info.repo_kind, "memory");
        assert!(info.space.is_none());

        node.start().unwrap();
        node.put(b"counted".to_vec()).await.unwrap();
        let info = debug(&node);
        assert_eq!(info.state, "started");
        assert_eq!(info.operations.completed, 1);
        assert_eq!(info.space.unwrap().total_blocks, 1);

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("repoKind").is_some());
        assert!(json["operations"].get("inFlight").is_some());
        node.stop().await.unwrap();
    }
}
