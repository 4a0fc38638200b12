// tests/block_store_test.rs
//
// Block operations through a started node, on both repo kinds.
//
// This test verifies:
//   1. put then get returns identical bytes
//   2. identical content is stored once, including under concurrent puts
//   3. unknown digests fail with a message naming the digest
//   4. quota overflow and stopped nodes fail with ERR

use std::sync::Arc;

use anyhow::Result;
use codex_store::{Digest, LogLevel, Node, NodeConfig, RepoKind, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn memory_node(quota: u64) -> Result<Node> {
    let node = Node::new(
        NodeConfig::new()
            .repo_kind(RepoKind::Memory)
            .storage_quota(quota)
            .log_level(LogLevel::Warn),
    )?;
    node.start()?;
    Ok(node)
}

fn fs_node(dir: &std::path::Path) -> Result<Node> {
    let node = Node::new(NodeConfig::new().data_dir(dir).log_level(LogLevel::Warn))?;
    node.start()?;
    Ok(node)
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread")]
async fn put_get_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for node in [memory_node(1 << 20)?, fs_node(dir.path())?] {
        let data = b"\x00binary\xffpayload\x00".to_vec();
        let digest = node.put(data.clone()).await?;
        assert_eq!(digest, Digest::of(&data));
        assert_eq!(node.get(&digest).await?, data);
        node.stop().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_content_is_stored_once() -> Result<()> {
    let node = memory_node(1 << 20)?;
    let first = node.put(b"same".to_vec()).await?;
    let second = node.put(b"same".to_vec()).await?;
    assert_eq!(first, second);

    let space = node.space().await?;
    assert_eq!(space.total_blocks, 1);
    assert_eq!(space.quota_used_bytes, 4);
    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_puts_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let node = Arc::new(fs_node(dir.path())?);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let node = node.clone();
        tasks.push(tokio::spawn(async move { node.put(vec![9u8; 8192]).await }));
    }
    let mut digests = Vec::new();
    for task in tasks {
        digests.push(task.await??);
    }
    assert!(digests.windows(2).all(|w| w[0] == w[1]));

    let space = node.space().await?;
    assert_eq!(space.total_blocks, 1);
    assert_eq!(space.quota_used_bytes, 8192);
    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_digest_names_the_digest() -> Result<()> {
    let node = memory_node(1 << 20)?;
    let missing = Digest::of(b"never stored");
    let err = node.get(&missing).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(err.to_string().contains(&missing.to_hex()));
    assert!(!node.has(&missing).await?);
    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_overflow_fails_put() -> Result<()> {
    let node = memory_node(16)?;
    node.put(vec![1u8; 10]).await?;
    let err = node.put(vec![2u8; 10]).await.unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded { .. }), "{err}");
    // what was already stored is unaffected
    assert_eq!(node.space().await?.quota_used_bytes, 10);
    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn blocks_survive_a_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let node = fs_node(dir.path())?;
    let digest = node.put(b"durable".to_vec()).await?;
    node.stop().await?;

    node.start()?;
    assert_eq!(node.get(&digest).await?, b"durable");
    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_node_rejects_operations() -> Result<()> {
    let node = memory_node(1 << 20)?;
    node.stop().await?;
    let err = node.put(b"late".to_vec()).await.unwrap_err();
    assert!(matches!(err, StoreError::NodeState { .. }), "{err}");
    assert!(err.to_string().contains("stopped"));
    Ok(())
}
