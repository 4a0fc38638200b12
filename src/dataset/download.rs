// src/dataset/download.rs
//
// Download sessions and streaming downloads. A session walks a manifest's
// blocks in order; a stream does the same in one go, reporting every block
// as progress and checking it against its digest. Any number of sessions
// and streams may run for one cid; cancelling the cid stops all of them at
// the next block boundary, and nothing else does.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::callback::ProgressReporter;
use crate::dataset::{Datasets, lock, parse_cid};
use crate::error::{Result, StoreError};
use crate::models::{DownloadResult, Manifest};
use crate::store::Digest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadStreamOptions {
    /// Write the dataset here. Without a path the bytes only travel as
    /// progress chunks.
    pub filepath: Option<PathBuf>,
}

impl DownloadStreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filepath<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.filepath = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    /// Walked one block per `download_chunk` call
    Chunked,
    /// Owned by a single running stream
    Stream,
}

pub struct DownloadSession {
    manifest: Manifest,
    kind: SessionKind,
    next: Mutex<usize>,
    cancelled: AtomicBool,
}

impl DownloadSession {
    fn new(manifest: Manifest, kind: SessionKind) -> Self {
        Self {
            manifest,
            kind,
            next: Mutex::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Datasets {
    pub fn download_manifest(&self, cid: &str) -> Result<Manifest> {
        self.manifest(cid)
    }

    /// Start walking a dataset block by block. An earlier chunked session
    /// for the same cid starts over; running streams are left alone.
    pub fn download_init(&self, cid: &str) -> Result<Manifest> {
        let manifest = self.manifest(cid)?;
        let session = Arc::new(DownloadSession::new(manifest.clone(), SessionKind::Chunked));
        {
            let mut downloads = lock(&self.downloads);
            let sessions = downloads.entry(manifest.cid.clone()).or_default();
            sessions.retain(|s| s.kind != SessionKind::Chunked);
            sessions.push(session);
        }
        tracing::debug!(cid = %manifest.cid, blocks = manifest.block_count(), "download session opened");
        Ok(manifest)
    }

    fn download_session(&self, cid: &str) -> Result<(String, Arc<DownloadSession>)> {
        let cid = parse_cid(cid)?.to_hex();
        let session = lock(&self.downloads)
            .get(&cid)
            .and_then(|sessions| sessions.iter().find(|s| s.kind == SessionKind::Chunked))
            .cloned()
            .ok_or_else(|| StoreError::session(format!("no download session for {cid}")))?;
        Ok((cid, session))
    }

    /// Next block of a session; empty once every block was returned, which
    /// also closes the session.
    pub fn download_chunk(&self, cid: &str) -> Result<Bytes> {
        let (cid, session) = self.download_session(cid)?;
        let mut next = lock(&session.next);
        if session.is_cancelled() {
            return Err(StoreError::cancelled("download_chunk"));
        }
        let Some(digest) = session.manifest.blocks.get(*next) else {
            self.close_download(&cid, &session);
            return Ok(Bytes::new());
        };
        let block = self.verified_block(digest)?;
        *next += 1;
        Ok(block)
    }

    /// Cancel every session and running stream of `cid`.
    pub fn download_cancel(&self, cid: &str) -> Result<()> {
        let cid = parse_cid(cid)?.to_hex();
        let sessions = lock(&self.downloads)
            .remove(&cid)
            .ok_or_else(|| StoreError::session(format!("no download session for {cid}")))?;
        for session in &sessions {
            session.cancel();
        }
        tracing::debug!(%cid, sessions = sessions.len(), "download cancelled");
        Ok(())
    }

    /// Stream a whole dataset. Each block is reported as progress carrying
    /// its bytes and written to `options.filepath` when one is given.
    pub fn download_stream(
        &self,
        cid: &str,
        options: &DownloadStreamOptions,
        reporter: &ProgressReporter,
    ) -> Result<DownloadResult> {
        let Some(path) = &options.filepath else {
            return self.stream_blocks(cid, reporter, |_| Ok(()));
        };

        let mut out = create_output(path)?;
        let result = self
            .stream_blocks(cid, reporter, |block| {
                out.write_all(block)
                    .map_err(|e| StoreError::failed(format!("writing {}: {e}", path.display())))
            })
            .and_then(|result| {
                out.flush()
                    .map_err(|e| StoreError::failed(format!("writing {}: {e}", path.display())))?;
                Ok(result)
            });

        match result {
            Ok(mut result) => {
                result.filepath = Some(path.clone());
                Ok(result)
            }
            Err(err) => {
                drop(out);
                let _ = std::fs::remove_file(path);
                Err(err)
            }
        }
    }

    /// Whole dataset in memory.
    pub fn download_bytes(&self, cid: &str, reporter: &ProgressReporter) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.stream_blocks(cid, reporter, |block| {
            data.extend_from_slice(block);
            Ok(())
        })?;
        Ok(data)
    }

    fn stream_blocks<F>(&self, cid: &str, reporter: &ProgressReporter, mut on_block: F) -> Result<DownloadResult>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let started = Instant::now();
        let manifest = self.manifest(cid)?;
        let cid = manifest.cid.clone();
        let session = Arc::new(DownloadSession::new(manifest, SessionKind::Stream));
        lock(&self.downloads)
            .entry(cid.clone())
            .or_default()
            .push(session.clone());

        let outcome = (|| {
            let mut position = 0u64;
            for digest in &session.manifest.blocks {
                if session.is_cancelled() {
                    tracing::debug!(%cid, position, "stream cancelled");
                    return Err(StoreError::cancelled("download_stream"));
                }
                let block = self.verified_block(digest)?;
                on_block(&block)?;
                position += block.len() as u64;
                reporter.progress(position, block.len(), Some(&block));
            }
            Ok(position)
        })();
        self.close_download(&cid, &session);

        let size = outcome?;
        Ok(DownloadResult {
            cid,
            size,
            blocks: session.manifest.block_count(),
            duration_ms: started.elapsed().as_millis() as u64,
            verified: true,
            filepath: None,
        })
    }

    fn verified_block(&self, digest: &Digest) -> Result<Bytes> {
        let block = self.store.get(digest)?;
        if !digest.matches(&block) {
            return Err(StoreError::Corrupt {
                digest: digest.to_hex(),
                actual: Digest::of(&block).to_hex(),
            });
        }
        Ok(block)
    }

    // Removes `session` only; other sessions of the cid stay registered.
    fn close_download(&self, cid: &str, session: &Arc<DownloadSession>) {
        let mut downloads = lock(&self.downloads);
        if let Some(sessions) = downloads.get_mut(cid) {
            sessions.retain(|current| !Arc::ptr_eq(current, session));
            if sessions.is_empty() {
                downloads.remove(cid);
            }
        }
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::invalid_parameter("filepath", format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let file = File::create(path).map_err(|e| {
        StoreError::invalid_parameter("filepath", format!("cannot create {}: {e}", path.display()))
    })?;
    Ok(BufWriter::new(file))
}
