// src/dataset/upload.rs
//
// Upload sessions. Incoming bytes are cut into blocks of the session's block
// size; full blocks are committed right away, the tail stays buffered until
// more bytes arrive or the session is finalized. Progress positions are the
// cumulative number of committed bytes. Committed blocks stay held against
// deletes until the manifest naming them is indexed or the session ends.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::callback::ProgressReporter;
use crate::dataset::{Datasets, HeldBlocks, lock};
use crate::error::{Result, StoreError};
use crate::models::{Manifest, UploadResult};
use crate::node::config::MAX_BLOCK_SIZE;
use crate::store::Digest;

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadOptions {
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    /// Overrides the node's block size for this upload
    pub block_size: Option<usize>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = Some(size);
        self
    }

    fn resolved_block_size(&self, default: usize) -> Result<usize> {
        match self.block_size {
            None => Ok(default),
            Some(size) if size == 0 || size > MAX_BLOCK_SIZE => Err(StoreError::invalid_parameter(
                "block-size",
                format!("must be between 1 and {MAX_BLOCK_SIZE} bytes"),
            )),
            Some(size) => Ok(size),
        }
    }
}

/// Guess a mimetype from a filename extension.
pub fn guess_mimetype(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("js") => "application/javascript",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => DEFAULT_MIMETYPE,
    }
}

pub struct UploadSession {
    id: String,
    filename: String,
    mimetype: String,
    block_size: usize,
    buffer: Vec<u8>,
    blocks: Vec<Digest>,
    committed: u64,
    started: Instant,
    closed: bool,
}

impl UploadSession {
    fn new(options: &UploadOptions, default_block_size: usize) -> Result<Self> {
        let block_size = options.resolved_block_size(default_block_size)?;
        let filename = options.filename.clone().unwrap_or_default();
        let mimetype = match &options.mimetype {
            Some(m) if !m.is_empty() => m.clone(),
            _ if !filename.is_empty() => guess_mimetype(&filename).to_string(),
            _ => String::new(),
        };
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename,
            mimetype,
            block_size,
            buffer: Vec::with_capacity(block_size),
            blocks: Vec::new(),
            committed: 0,
            started: Instant::now(),
            closed: false,
        })
    }

    /// Bytes received but not committed as a block yet.
    pub fn reserved(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn received(&self) -> u64 {
        self.committed + self.reserved()
    }

    fn push(&mut self, datasets: &Datasets, mut data: &[u8], reporter: &ProgressReporter) -> Result<()> {
        if self.closed {
            return Err(StoreError::session(format!("upload session {} is closed", self.id)));
        }
        while !data.is_empty() {
            let take = (self.block_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.block_size {
                self.flush(datasets, reporter)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, datasets: &Datasets, reporter: &ProgressReporter) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        // Held before the write, so a concurrent delete either finishes first
        // or leaves the block alone.
        let digest = Digest::of(&self.buffer);
        datasets.held.hold(digest);
        if let Err(err) = datasets.store.put(&self.buffer) {
            datasets.held.release(&[digest]);
            return Err(err);
        }
        let len = self.buffer.len();
        self.blocks.push(digest);
        self.committed += len as u64;
        self.buffer.clear();
        reporter.progress(self.committed, len, None);
        Ok(())
    }

    fn finish(&mut self, datasets: &Datasets, reporter: &ProgressReporter) -> Result<Manifest> {
        self.flush(datasets, reporter)?;
        self.closed = true;
        if self.blocks.is_empty() {
            return Err(StoreError::invalid_parameter("data", "nothing was uploaded"));
        }
        let manifest = Manifest::new(self.blocks.clone(), self.committed, self.block_size)
            .filename(std::mem::take(&mut self.filename))
            .mimetype(std::mem::take(&mut self.mimetype));
        Ok(manifest)
    }

    fn release(&mut self, held: &HeldBlocks) {
        held.release(&self.blocks);
        self.blocks.clear();
    }
}

fn result(manifest: &Manifest, started: Instant) -> UploadResult {
    UploadResult {
        cid: manifest.cid.clone(),
        size: manifest.dataset_size,
        blocks: manifest.block_count(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

impl Datasets {
    /// Open an upload session and return its id.
    pub fn upload_init(&self, options: &UploadOptions) -> Result<String> {
        let session = UploadSession::new(options, self.block_size)?;
        let id = session.id.clone();
        tracing::debug!(
            session = %id,
            filename = %session.filename,
            block_size = session.block_size,
            "upload session opened"
        );
        lock(&self.uploads).insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    fn upload_session(&self, session_id: &str) -> Result<Arc<Mutex<UploadSession>>> {
        lock(&self.uploads)
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::session(format!("no upload session {session_id}")))
    }

    /// Append bytes to a session. Returns the total received so far.
    pub fn upload_chunk(&self, session_id: &str, data: &[u8], reporter: &ProgressReporter) -> Result<u64> {
        if data.is_empty() {
            return Err(StoreError::invalid_parameter("chunk", "chunk is empty"));
        }
        let session = self.upload_session(session_id)?;
        let mut session = lock(&session);
        session.push(self, data, reporter)?;
        Ok(session.received())
    }

    /// Commit the buffered tail, store the manifest, close the session.
    pub fn upload_finalize(&self, session_id: &str, reporter: &ProgressReporter) -> Result<UploadResult> {
        let session = lock(&self.uploads)
            .remove(session_id)
            .ok_or_else(|| StoreError::session(format!("no upload session {session_id}")))?;
        // Waits for a chunk still being written to this session.
        let mut session = lock(&session);
        let manifest = self.commit(&mut session, reporter)?;
        tracing::debug!(session = %session_id, cid = %manifest.cid, "upload session finalized");
        Ok(result(&manifest, session.started))
    }

    /// Drop a session. Blocks it already committed stay in the store.
    pub fn upload_cancel(&self, session_id: &str) -> Result<()> {
        let session = lock(&self.uploads)
            .remove(session_id)
            .ok_or_else(|| StoreError::session(format!("no upload session {session_id}")))?;
        let mut session = lock(&session);
        session.closed = true;
        tracing::debug!(
            session = %session_id,
            committed_blocks = session.blocks.len(),
            "upload session cancelled"
        );
        session.release(&self.held);
        Ok(())
    }

    /// Store the session's manifest, then stop holding its blocks: from here
    /// on the index protects them.
    fn commit(&self, session: &mut UploadSession, reporter: &ProgressReporter) -> Result<Manifest> {
        let stored = session
            .finish(self, reporter)
            .and_then(|manifest| self.store_manifest(manifest));
        session.release(&self.held);
        stored
    }

    /// Upload everything `reader` yields as one dataset.
    pub fn upload_reader<R: Read>(
        &self,
        mut reader: R,
        options: &UploadOptions,
        reporter: &ProgressReporter,
    ) -> Result<UploadResult> {
        let mut session = UploadSession::new(options, self.block_size)?;
        let mut buf = vec![0u8; session.block_size];
        let read = (|| -> Result<()> {
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(StoreError::failed(format!("reading upload source: {e}"))),
                };
                session.push(self, &buf[..n], reporter)?;
            }
        })();
        if let Err(err) = read {
            session.release(&self.held);
            return Err(err);
        }
        let manifest = self.commit(&mut session, reporter)?;
        Ok(result(&manifest, session.started))
    }

    /// Upload a file. The filename defaults to the file's name and the
    /// mimetype to a guess from its extension.
    pub fn upload_file(&self, path: &Path, options: &UploadOptions, reporter: &ProgressReporter) -> Result<UploadResult> {
        let file = std::fs::File::open(path).map_err(|e| {
            StoreError::invalid_parameter("filepath", format!("cannot open {}: {e}", path.display()))
        })?;
        let mut options = options.clone();
        if options.filename.is_none() {
            options.filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        }
        tracing::debug!(path = %path.display(), "uploading file");
        self.upload_reader(std::io::BufReader::new(file), &options, reporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{Notification, OperationHandle, OperationSink};
    use crate::dataset::tests::datasets;

    #[derive(Clone, Default)]
    struct Positions(Arc<Mutex<Vec<(u64, usize)>>>);

    impl OperationSink for Positions {
        fn deliver(&mut self, notification: Notification<'_>) {
            if let Notification::Progress { position, len, .. } = notification {
                self.0.lock().unwrap().push((position, len));
            }
        }
    }

    #[test]
    fn session_commits_full_blocks_and_buffers_the_tail() {
        let datasets = datasets(4);
        let id = datasets.upload_init(&UploadOptions::new().filename("a.txt")).unwrap();

        let positions = Positions::default();
        let handle = OperationHandle::new("upload_chunk", Box::new(positions.clone()));
        let received = datasets.upload_chunk(&id, b"0123456789", &handle.reporter()).unwrap();
        handle.complete(Vec::new());

        assert_eq!(received, 10);
        assert_eq!(*positions.0.lock().unwrap(), vec![(4, 4), (8, 4)]);
        assert_eq!(datasets.space().quota_reserved_bytes, 2);

        let result = datasets.upload_finalize(&id, &ProgressReporter::detached()).unwrap();
        assert_eq!(result.size, 10);
        assert_eq!(result.blocks, 3);
        assert_eq!(datasets.upload_sessions(), 0);

        let manifest = datasets.manifest(&result.cid).unwrap();
        assert_eq!(manifest.filename, "a.txt");
        assert_eq!(manifest.mimetype, "text/plain");
        assert_eq!(manifest.blocks[2], Digest::of(b"89"));
    }

    #[test]
    fn empty_upload_is_rejected() {
        let datasets = datasets(4);
        let id = datasets.upload_init(&UploadOptions::new()).unwrap();
        assert!(matches!(
            datasets.upload_finalize(&id, &ProgressReporter::detached()),
            Err(StoreError::InvalidParameter { .. })
        ));
        assert!(datasets.upload_reader(&b""[..], &UploadOptions::new(), &ProgressReporter::detached()).is_err());
    }

    #[test]
    fn unknown_and_cancelled_sessions() {
        let datasets = datasets(4);
        let reporter = ProgressReporter::detached();
        assert!(matches!(
            datasets.upload_chunk("nope", b"x", &reporter),
            Err(StoreError::Session { .. })
        ));

        let id = datasets.upload_init(&UploadOptions::new()).unwrap();
        datasets.upload_chunk(&id, b"abcdef", &reporter).unwrap();
        datasets.upload_cancel(&id).unwrap();
        assert!(datasets.upload_finalize(&id, &reporter).is_err());
        assert!(datasets.upload_cancel(&id).is_err());
        // the committed block is left behind
        assert!(datasets.store().has(&Digest::of(b"abcd")).unwrap());
    }

    #[test]
    fn committed_blocks_are_held_until_the_session_ends() {
        let datasets = datasets(4);
        let reporter = ProgressReporter::detached();
        let id = datasets.upload_init(&UploadOptions::new()).unwrap();
        datasets.upload_chunk(&id, b"abcdef", &reporter).unwrap();

        assert!(matches!(
            datasets.delete_block(&Digest::of(b"abcd")),
            Err(StoreError::InvalidParameter { .. })
        ));
        datasets.upload_cancel(&id).unwrap();
        assert!(datasets.delete_block(&Digest::of(b"abcd")).unwrap());
    }

    #[test]
    fn per_upload_block_size() {
        let datasets = datasets(4);
        let result = datasets
            .upload_reader(&[7u8; 10][..], &UploadOptions::new().block_size(5), &ProgressReporter::detached())
            .unwrap();
        assert_eq!(result.blocks, 2);
        assert!(UploadOptions::new().block_size(0).resolved_block_size(4).is_err());
    }

    #[test]
    fn file_upload_takes_name_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.PNG");
        std::fs::write(&path, b"not really a png").unwrap();

        let datasets = datasets(8);
        let result = datasets
            .upload_file(&path, &UploadOptions::new(), &ProgressReporter::detached())
            .unwrap();
        let manifest = datasets.manifest(&result.cid).unwrap();
        assert_eq!(manifest.filename, "photo.PNG");
        assert_eq!(manifest.mimetype, "image/png");
        assert_eq!(manifest.dataset_size, 16);

        assert!(datasets
            .upload_file(&dir.path().join("missing"), &UploadOptions::new(), &ProgressReporter::detached())
            .is_err());
    }
}
