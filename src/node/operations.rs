// src/node/operations.rs
//
// Every operation a node offers, in two forms:
//
//   submit_*  - takes an optional sink, returns the submission status and
//               reports the outcome through the sink (used by the C surface)
//   async fn  - Rust API; submits with a channel sink and awaits it
//
// Terminal payloads are what C callers receive: raw bytes for block and
// chunk reads, hex for digests, "true"/"false" for predicates, JSON for
// structured results.

use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::actors::{ActorMessage, DriverCommand, Job};
use crate::callback::{self, OperationHandle, OperationSink, ProgressFn, ProgressReporter};
use crate::dataset::{Datasets, DownloadStreamOptions, UploadOptions};
use crate::error::{Result, StoreError};
use crate::models::{DebugInfo, DownloadResult, Manifest, Space, UploadResult};
use crate::node::{LogLevel, Node, NodeState, lock};
use crate::status::StatusCode;
use crate::store::Digest;

fn json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn from_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

fn flag(value: bool) -> Vec<u8> {
    if value { b"true".to_vec() } else { b"false".to_vec() }
}

fn parse_flag(payload: &[u8]) -> Result<bool> {
    match payload {
        b"true" => Ok(true),
        b"false" => Ok(false),
        other => Err(StoreError::failed(format!(
            "unexpected payload {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn utf8(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload).map_err(|e| StoreError::failed(format!("payload is not UTF-8: {e}")))
}

fn parse_digest(digest: &str) -> Result<Digest> {
    digest.trim().parse()
}

impl Node {
    // ═══════════════════════════════════════════════════════════════════════
    // SUBMISSION
    // ═══════════════════════════════════════════════════════════════════════

    /// Queue `body` on the driver.
    ///
    /// Without a sink nothing runs and `MissingCallback` is returned. On a
    /// node that is not started the sink receives `ERR` before this returns.
    pub fn submit<F, Fut>(&self, operation: &'static str, sink: Option<Box<dyn OperationSink>>, body: F) -> StatusCode
    where
        F: FnOnce(Arc<Datasets>, ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let Some(sink) = sink else {
            tracing::warn!(operation, "operation submitted without a callback");
            return StatusCode::MissingCallback;
        };
        let handle = OperationHandle::new(operation, sink);

        let target = lock(&self.inner.services)
            .as_ref()
            .map(|s| (s.datasets.clone(), s.driver.cmd_tx.clone()));
        let Some((datasets, cmd_tx)) = target else {
            let state = self.state();
            return self.finish_now(handle, Err(StoreError::node_state(operation, state)));
        };

        let job: Job = Box::new(move |reporter| body(datasets, reporter).boxed());
        if let Err(err) = cmd_tx.send(ActorMessage::Domain(DriverCommand::Run { handle, job })) {
            if let ActorMessage::Domain(DriverCommand::Run { handle, .. }) = err.0 {
                handle.fail(StoreError::node_state(operation, NodeState::Stopping));
            }
            return StatusCode::Err;
        }
        StatusCode::Ok
    }

    /// [`Node::submit`] for bodies that do blocking I/O.
    pub fn submit_blocking<F>(&self, operation: &'static str, sink: Option<Box<dyn OperationSink>>, body: F) -> StatusCode
    where
        F: FnOnce(&Datasets, &ProgressReporter) -> Result<Vec<u8>> + Send + 'static,
    {
        self.submit(operation, sink, move |datasets, reporter| async move {
            tokio::task::spawn_blocking(move || body(&datasets, &reporter))
                .await
                .unwrap_or_else(|e| Err(e.into()))
        })
    }

    /// Deliver a result computed on the calling thread.
    fn submit_now<F>(&self, operation: &'static str, sink: Option<Box<dyn OperationSink>>, body: F) -> StatusCode
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let Some(sink) = sink else {
            tracing::warn!(operation, "operation submitted without a callback");
            return StatusCode::MissingCallback;
        };
        self.finish_now(OperationHandle::new(operation, sink), body())
    }

    async fn call<S>(&self, on_progress: Option<ProgressFn>, submit: S) -> Result<Vec<u8>>
    where
        S: FnOnce(Box<dyn OperationSink>) -> StatusCode,
    {
        let (sink, pending) = callback::channel(on_progress);
        let status = submit(Box::new(sink));
        tracing::trace!(%status, "operation submitted");
        pending.wait().await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCKS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn submit_put(&self, data: Vec<u8>, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_blocking("put", sink, move |datasets, _| {
            Ok(datasets.put_block(&data)?.to_hex().into_bytes())
        })
    }

    pub fn submit_get(&self, digest: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let digest = digest.to_string();
        self.submit_blocking("get", sink, move |datasets, _| {
            Ok(datasets.store().get(&parse_digest(&digest)?)?.to_vec())
        })
    }

    pub fn submit_has(&self, digest: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let digest = digest.to_string();
        self.submit_blocking("has", sink, move |datasets, _| {
            Ok(flag(datasets.store().has(&parse_digest(&digest)?)?))
        })
    }

    pub fn submit_delete_block(&self, digest: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let digest = digest.to_string();
        self.submit_blocking("delete_block", sink, move |datasets, _| {
            Ok(flag(datasets.delete_block(&parse_digest(&digest)?)?))
        })
    }

    /// Store one block and return its digest.
    pub async fn put(&self, data: impl Into<Vec<u8>>) -> Result<Digest> {
        let data = data.into();
        let payload = self.call(None, |sink| self.submit_put(data, Some(sink))).await?;
        parse_digest(&utf8(payload)?)
    }

    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.call(None, |sink| self.submit_get(&digest.to_hex(), Some(sink))).await
    }

    pub async fn has(&self, digest: &Digest) -> Result<bool> {
        let payload = self.call(None, |sink| self.submit_has(&digest.to_hex(), Some(sink))).await?;
        parse_flag(&payload)
    }

    /// Remove a block that no dataset references. Returns whether it existed.
    pub async fn delete_block(&self, digest: &Digest) -> Result<bool> {
        let payload = self
            .call(None, |sink| self.submit_delete_block(&digest.to_hex(), Some(sink)))
            .await?;
        parse_flag(&payload)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UPLOAD
    // ═══════════════════════════════════════════════════════════════════════

    pub fn submit_upload_init(&self, options: UploadOptions, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_blocking("upload_init", sink, move |datasets, _| {
            Ok(datasets.upload_init(&options)?.into_bytes())
        })
    }

    pub fn submit_upload_chunk(&self, session_id: &str, data: Vec<u8>, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let session_id = session_id.to_string();
        self.submit_blocking("upload_chunk", sink, move |datasets, reporter| {
            Ok(datasets.upload_chunk(&session_id, &data, reporter)?.to_string().into_bytes())
        })
    }

    pub fn submit_upload_finalize(&self, session_id: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let session_id = session_id.to_string();
        self.submit_blocking("upload_finalize", sink, move |datasets, reporter| {
            Ok(datasets.upload_finalize(&session_id, reporter)?.cid.into_bytes())
        })
    }

    pub fn submit_upload_cancel(&self, session_id: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let session_id = session_id.to_string();
        self.submit_blocking("upload_cancel", sink, move |datasets, _| {
            datasets.upload_cancel(&session_id)?;
            Ok(Vec::new())
        })
    }

    pub fn submit_upload_file(
        &self,
        path: PathBuf,
        options: UploadOptions,
        sink: Option<Box<dyn OperationSink>>,
    ) -> StatusCode {
        self.submit_blocking("upload_file", sink, move |datasets, reporter| {
            json(&datasets.upload_file(&path, &options, reporter)?)
        })
    }

    /// Open an upload session and return its id.
    pub async fn upload_init(&self, options: UploadOptions) -> Result<String> {
        utf8(self.call(None, |sink| self.submit_upload_init(options, Some(sink))).await?)
    }

    /// Append bytes to a session; progress reports each committed block.
    /// Returns the number of bytes the session has received.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        data: impl Into<Vec<u8>>,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64> {
        let data = data.into();
        let payload = self
            .call(on_progress, |sink| self.submit_upload_chunk(session_id, data, Some(sink)))
            .await?;
        utf8(payload)?
            .parse()
            .map_err(|e| StoreError::failed(format!("bad byte count: {e}")))
    }

    /// Close a session and return the dataset's cid.
    pub async fn upload_finalize(&self, session_id: &str) -> Result<String> {
        utf8(self.call(None, |sink| self.submit_upload_finalize(session_id, Some(sink))).await?)
    }

    pub async fn upload_cancel(&self, session_id: &str) -> Result<()> {
        self.call(None, |sink| self.submit_upload_cancel(session_id, Some(sink))).await?;
        Ok(())
    }

    pub async fn upload_file(
        &self,
        path: impl Into<PathBuf>,
        options: UploadOptions,
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadResult> {
        let path = path.into();
        let payload = self
            .call(on_progress, |sink| self.submit_upload_file(path, options, Some(sink)))
            .await?;
        from_json(&payload)
    }

    /// Upload everything `reader` yields as one dataset.
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        options: UploadOptions,
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadResult>
    where
        R: Read + Send + 'static,
    {
        let payload = self
            .call(on_progress, |sink| {
                self.submit_blocking("upload_reader", Some(sink), move |datasets, reporter| {
                    json(&datasets.upload_reader(reader, &options, reporter)?)
                })
            })
            .await?;
        from_json(&payload)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DOWNLOAD
    // ═══════════════════════════════════════════════════════════════════════

    pub fn submit_download_manifest(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("download_manifest", sink, move |datasets, _| {
            json(&datasets.download_manifest(&cid)?)
        })
    }

    pub fn submit_download_init(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("download_init", sink, move |datasets, _| json(&datasets.download_init(&cid)?))
    }

    pub fn submit_download_chunk(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("download_chunk", sink, move |datasets, _| {
            Ok(datasets.download_chunk(&cid)?.to_vec())
        })
    }

    pub fn submit_download_cancel(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("download_cancel", sink, move |datasets, _| {
            datasets.download_cancel(&cid)?;
            Ok(Vec::new())
        })
    }

    pub fn submit_download_stream(
        &self,
        cid: &str,
        options: DownloadStreamOptions,
        sink: Option<Box<dyn OperationSink>>,
    ) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("download_stream", sink, move |datasets, reporter| {
            json(&datasets.download_stream(&cid, &options, reporter)?)
        })
    }

    pub async fn download_manifest(&self, cid: &str) -> Result<Manifest> {
        from_json(&self.call(None, |sink| self.submit_download_manifest(cid, Some(sink))).await?)
    }

    pub async fn download_init(&self, cid: &str) -> Result<Manifest> {
        from_json(&self.call(None, |sink| self.submit_download_init(cid, Some(sink))).await?)
    }

    /// Next block of a download session; empty at the end.
    pub async fn download_chunk(&self, cid: &str) -> Result<Vec<u8>> {
        self.call(None, |sink| self.submit_download_chunk(cid, Some(sink))).await
    }

    pub async fn download_cancel(&self, cid: &str) -> Result<()> {
        self.call(None, |sink| self.submit_download_cancel(cid, Some(sink))).await?;
        Ok(())
    }

    /// Stream a dataset; every block arrives as progress carrying its bytes.
    pub async fn download_stream(
        &self,
        cid: &str,
        options: DownloadStreamOptions,
        on_progress: Option<ProgressFn>,
    ) -> Result<DownloadResult> {
        let payload = self
            .call(on_progress, |sink| self.submit_download_stream(cid, options, Some(sink)))
            .await?;
        from_json(&payload)
    }

    /// Whole dataset in memory.
    pub async fn download_bytes(&self, cid: &str, on_progress: Option<ProgressFn>) -> Result<Vec<u8>> {
        let cid = cid.to_string();
        self.call(on_progress, |sink| {
            self.submit_blocking("download_bytes", Some(sink), move |datasets, reporter| {
                datasets.download_bytes(&cid, reporter)
            })
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STORAGE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn submit_exists(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("exists", sink, move |datasets, _| Ok(flag(datasets.exists(&cid)?)))
    }

    pub fn submit_delete(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("delete", sink, move |datasets, _| {
            datasets.delete(&cid)?;
            Ok(Vec::new())
        })
    }

    pub fn submit_fetch(&self, cid: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let cid = cid.to_string();
        self.submit_blocking("fetch", sink, move |datasets, _| json(&datasets.fetch(&cid)?))
    }

    pub fn submit_manifests(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_blocking("manifests", sink, |datasets, _| json(&datasets.manifests()?))
    }

    pub fn submit_space(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_blocking("space", sink, |datasets, _| json(&datasets.space()))
    }

    pub async fn exists(&self, cid: &str) -> Result<bool> {
        parse_flag(&self.call(None, |sink| self.submit_exists(cid, Some(sink))).await?)
    }

    /// Delete a dataset and the blocks only it referenced.
    pub async fn delete(&self, cid: &str) -> Result<()> {
        self.call(None, |sink| self.submit_delete(cid, Some(sink))).await?;
        Ok(())
    }

    pub async fn fetch(&self, cid: &str) -> Result<Manifest> {
        from_json(&self.call(None, |sink| self.submit_fetch(cid, Some(sink))).await?)
    }

    pub async fn manifests(&self) -> Result<Vec<Manifest>> {
        from_json(&self.call(None, |sink| self.submit_manifests(Some(sink))).await?)
    }

    pub async fn space(&self) -> Result<Space> {
        from_json(&self.call(None, |sink| self.submit_space(Some(sink))).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // NODE INFO
    // ═══════════════════════════════════════════════════════════════════════

    /// Data directory, or "memory" for a memory repo without one.
    pub fn repo(&self) -> String {
        match self.data_dir() {
            Some(dir) => dir.display().to_string(),
            None => "memory".to_string(),
        }
    }

    pub fn submit_version(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_now("version", sink, || Ok(crate::version().as_bytes().to_vec()))
    }

    pub fn submit_repo(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_now("repo", sink, || Ok(self.repo().into_bytes()))
    }

    pub fn submit_debug(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_now("debug", sink, || json(&crate::debug::debug(self)))
    }

    pub fn submit_log_level(&self, level: &str, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        self.submit_now("log_level", sink, || {
            let level: LogLevel = level.parse()?;
            crate::debug::update_log_level(self, level)?;
            Ok(Vec::new())
        })
    }

    pub fn debug(&self) -> DebugInfo {
        crate::debug::debug(self)
    }
}
