// tests/dataset_test.rs
//
// Datasets end to end through a started node.
//
// This test verifies:
//   1. upload via session, finalize, then stream back the original bytes
//   2. files uploaded from disk download to disk unchanged
//   3. deleting a dataset keeps blocks another dataset still uses
//   4. a stream cancelled mid-way ends with Cancelled and no partial file
//   5. download progress positions strictly increase up to the size
//   6. blocks put on their own or held by an open upload survive a delete
//   7. concurrent downloads of one dataset do not cancel each other

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use codex_store::callback::ProgressFn;
use codex_store::{
    Digest, DownloadStreamOptions, LogLevel, Node, NodeConfig, Progress, RepoKind, StoreError,
    UploadOptions,
};

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn memory_node() -> Result<Node> {
    let node = Node::new(
        NodeConfig::new()
            .repo_kind(RepoKind::Memory)
            .block_size(1024)
            .log_level(LogLevel::Warn),
    )?;
    node.start()?;
    Ok(node)
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn upload(node: &Node, filename: &str, data: &[u8], block_size: usize) -> Result<String> {
    let session = node
        .upload_init(UploadOptions::new().filename(filename).block_size(block_size))
        .await?;
    // uneven chunks on purpose, so blocks straddle chunk boundaries
    for chunk in data.chunks(700) {
        node.upload_chunk(&session, chunk.to_vec(), None).await?;
    }
    Ok(node.upload_finalize(&session).await?)
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread")]
async fn session_upload_then_stream_back() -> Result<()> {
    let node = memory_node()?;
    let data = sample(5000);
    let cid = upload(&node, "notes.txt", &data, 1024).await?;

    let manifest = node.download_manifest(&cid).await?;
    assert_eq!(manifest.filename, "notes.txt");
    assert_eq!(manifest.mimetype, "text/plain");
    assert_eq!(manifest.dataset_size, 5000);
    assert_eq!(manifest.blocks.len(), 5);

    assert!(node.exists(&cid).await?);
    assert_eq!(node.download_bytes(&cid, None).await?, data);

    // chunked download hands back one block per call, then an empty chunk
    node.download_init(&cid).await?;
    let mut chunked = Vec::new();
    loop {
        let chunk = node.download_chunk(&cid).await?;
        if chunk.is_empty() {
            break;
        }
        chunked.extend_from_slice(&chunk);
    }
    assert_eq!(chunked, data);

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn file_upload_and_stream_to_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let node = Node::new(
        NodeConfig::new()
            .data_dir(dir.path().join("repo"))
            .block_size(4096)
            .log_level(LogLevel::Warn),
    )?;
    node.start()?;

    let source = dir.path().join("photo.png");
    let data = sample(20_000);
    std::fs::write(&source, &data)?;

    let uploaded = node.upload_file(&source, UploadOptions::new(), None).await?;
    assert_eq!(uploaded.size, 20_000);
    assert_eq!(uploaded.blocks, 5);

    let target = dir.path().join("copy.png");
    let downloaded = node
        .download_stream(&uploaded.cid, DownloadStreamOptions::new().filepath(&target), None)
        .await?;
    assert!(downloaded.verified);
    assert_eq!(downloaded.filepath.as_deref(), Some(target.as_path()));
    assert_eq!(std::fs::read(&target)?, data);

    let listed = node.manifests().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].mimetype, "image/png");

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_keeps_shared_blocks() -> Result<()> {
    let node = memory_node()?;
    let first = upload(&node, "a.bin", b"aaaabbbb", 4).await?;
    let second = upload(&node, "b.bin", b"aaaacccc", 4).await?;

    node.delete(&first).await?;

    assert!(!node.exists(&first).await?);
    assert!(node.has(&Digest::of(b"aaaa")).await?);
    assert!(!node.has(&Digest::of(b"bbbb")).await?);
    assert_eq!(node.download_bytes(&second, None).await?, b"aaaacccc");

    let err = node.delete(&first).await.unwrap_err();
    assert!(matches!(err, StoreError::ManifestNotFound { .. }), "{err}");

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_stream_ends_with_cancelled() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let node = memory_node()?;
    let cid = upload(&node, "big.bin", &sample(8 * 1024), 1024).await?;

    // hold the stream inside its first progress call until the cancel landed
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(Some(started_tx));
    let resume_rx = Mutex::new(resume_rx);
    let on_progress: ProgressFn = Box::new(move |_: &Progress| {
        if let Some(tx) = started_tx.lock().unwrap().take() {
            tx.send(()).unwrap();
            resume_rx.lock().unwrap().recv().unwrap();
        }
    });

    let target = dir.path().join("partial.bin");
    let stream = {
        let node = node.clone();
        let cid = cid.clone();
        let options = DownloadStreamOptions::new().filepath(&target);
        tokio::spawn(async move { node.download_stream(&cid, options, Some(on_progress)).await })
    };

    tokio::task::spawn_blocking(move || started_rx.recv()).await??;
    node.download_cancel(&cid).await?;
    resume_tx.send(())?;

    let err = stream.await?.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled { .. }), "{err}");
    assert!(!target.exists());
    assert_eq!(node.operation_counts().cancelled, 1);

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn download_progress_is_strictly_increasing() -> Result<()> {
    let node = memory_node()?;
    let data = sample(10_000);
    let cid = upload(&node, "series.bin", &data, 1024).await?;

    let positions = Arc::new(Mutex::new(Vec::new()));
    let seen = positions.clone();
    let bytes = node
        .download_bytes(
            &cid,
            Some(Box::new(move |p: &Progress| {
                seen.lock().unwrap().push((p.position, p.len, p.chunk.is_some()));
            })),
        )
        .await?;
    assert_eq!(bytes, data);

    let positions = positions.lock().unwrap();
    assert_eq!(positions.len(), 10);
    assert!(positions.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(positions.iter().all(|(_, len, chunk)| *len > 0 && *chunk));
    assert_eq!(positions.last().map(|p| p.0), Some(10_000));

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_upload_session_is_gone() -> Result<()> {
    let node = memory_node()?;
    let session = node.upload_init(UploadOptions::new().filename("x.bin")).await?;
    node.upload_chunk(&session, vec![1u8; 3000], None).await?;
    node.upload_cancel(&session).await?;

    let err = node.upload_finalize(&session).await.unwrap_err();
    assert!(matches!(err, StoreError::Session { .. }), "{err}");
    assert!(node.manifests().await?.is_empty());

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_keeps_blocks_put_on_their_own() -> Result<()> {
    let node = memory_node()?;
    let loose = node.put(b"aaaa".to_vec()).await?;
    let cid = upload(&node, "shared.bin", b"aaaabbbb", 4).await?;

    node.delete(&cid).await?;

    assert_eq!(node.get(&loose).await?, b"aaaa");
    assert!(!node.has(&Digest::of(b"bbbb")).await?);

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_during_open_upload_keeps_its_blocks() -> Result<()> {
    let node = memory_node()?;
    let first = upload(&node, "first.bin", b"aaaa", 4).await?;

    let session = node
        .upload_init(UploadOptions::new().filename("second.bin").block_size(4))
        .await?;
    node.upload_chunk(&session, b"aaaacc".to_vec(), None).await?;
    node.delete(&first).await?;
    let second = node.upload_finalize(&session).await?;

    assert!(!node.exists(&first).await?);
    assert_eq!(node.download_bytes(&second, None).await?, b"aaaacc");

    node.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_downloads_of_one_dataset_both_complete() -> Result<()> {
    let node = memory_node()?;
    let data = sample(8 * 1024);
    let cid = upload(&node, "popular.bin", &data, 1024).await?;

    // the first stream waits inside its first progress call until the second
    // stream has run to completion
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(Some(started_tx));
    let resume_rx = Mutex::new(resume_rx);
    let on_progress: ProgressFn = Box::new(move |_: &Progress| {
        if let Some(tx) = started_tx.lock().unwrap().take() {
            tx.send(()).unwrap();
            resume_rx.lock().unwrap().recv().unwrap();
        }
    });

    let first = {
        let node = node.clone();
        let cid = cid.clone();
        tokio::spawn(async move { node.download_bytes(&cid, Some(on_progress)).await })
    };
    tokio::task::spawn_blocking(move || started_rx.recv()).await??;

    assert_eq!(node.download_bytes(&cid, None).await?, data);
    resume_tx.send(())?;

    assert_eq!(first.await??, data);
    assert_eq!(node.operation_counts().cancelled, 0);

    node.stop().await?;
    Ok(())
}
