// src/dataset/mod.rs
//
// Datasets: files split into blocks, described by a manifest block.
//
// Structure:
//   index.rs    - SQLite index of manifests and block references
//   upload.rs   - upload sessions and whole-stream uploads
//   download.rs - download sessions and streaming downloads
//
// Everything here is blocking; the node runs it from spawn_blocking.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StoreError};
use crate::models::{Manifest, Space};
use crate::store::{BlockStore, Digest};

pub mod download;
pub mod index;
pub mod upload;

pub use download::DownloadStreamOptions;
pub use index::ManifestIndex;
pub use upload::UploadOptions;

use download::DownloadSession;
use upload::UploadSession;

const INDEX_FILE: &str = "manifests.db";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocks written by uploads whose manifest is not indexed yet, with the
/// number of uploads holding each. Deletes keep these blocks.
#[derive(Default)]
pub(crate) struct HeldBlocks(Mutex<HashMap<Digest, usize>>);

impl HeldBlocks {
    fn lock(&self) -> MutexGuard<'_, HashMap<Digest, usize>> {
        lock(&self.0)
    }

    pub(crate) fn hold(&self, digest: Digest) {
        *self.lock().entry(digest).or_default() += 1;
    }

    pub(crate) fn release(&self, digests: &[Digest]) {
        let mut held = self.lock();
        for digest in digests {
            if let Some(count) = held.get_mut(digest) {
                *count -= 1;
                if *count == 0 {
                    held.remove(digest);
                }
            }
        }
    }
}

pub struct Datasets {
    store: Arc<dyn BlockStore>,
    index: ManifestIndex,
    block_size: usize,
    held: HeldBlocks,
    uploads: Mutex<HashMap<String, Arc<Mutex<UploadSession>>>>,
    downloads: Mutex<HashMap<String, Vec<Arc<DownloadSession>>>>,
}

impl Datasets {
    /// Open the dataset layer over `store`. The index lives in
    /// `<data_dir>/manifests.db`, or in memory without a data dir.
    pub fn open(store: Arc<dyn BlockStore>, data_dir: Option<&Path>, block_size: usize) -> Result<Self> {
        let index = match data_dir {
            Some(dir) => ManifestIndex::open(&dir.join(INDEX_FILE))?,
            None => ManifestIndex::in_memory()?,
        };
        tracing::debug!(manifests = index.count()?, block_size, "dataset index ready");
        Ok(Self::with_index(store, index, block_size))
    }

    pub fn with_index(store: Arc<dyn BlockStore>, index: ManifestIndex, block_size: usize) -> Self {
        Self {
            store,
            index,
            block_size,
            held: HeldBlocks::default(),
            uploads: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn index(&self) -> &ManifestIndex {
        &self.index
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn upload_sessions(&self) -> usize {
        lock(&self.uploads).len()
    }

    pub fn download_sessions(&self) -> usize {
        lock(&self.downloads).values().map(Vec::len).sum()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCKS
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a single block and pin it, so it outlives any dataset that
    /// happens to share its content.
    pub fn put_block(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::of(data);
        self.held.hold(digest);
        // The hold keeps a concurrent delete off the block until it is pinned.
        let stored = self
            .store
            .put(data)
            .and_then(|digest| self.index.pin(&digest).map(|()| digest));
        self.held.release(&[digest]);
        stored
    }

    /// Remove a single block. Blocks that belong to a dataset, or that an
    /// open upload already wrote, can only go away through
    /// [`Datasets::delete`].
    pub fn delete_block(&self, digest: &Digest) -> Result<bool> {
        let held = self.held.lock();
        if self.index.is_referenced(digest, None)? {
            return Err(StoreError::invalid_parameter(
                "digest",
                format!("block {digest} belongs to a dataset"),
            ));
        }
        if held.contains_key(digest) {
            return Err(StoreError::invalid_parameter(
                "digest",
                format!("block {digest} is part of an open upload"),
            ));
        }
        self.index.unpin(digest)?;
        self.store.delete(digest)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MANIFESTS & STORAGE
    // ═══════════════════════════════════════════════════════════════════════

    /// Write `manifest` as a block, index it and return it with its cid set.
    pub(crate) fn store_manifest(&self, mut manifest: Manifest) -> Result<Manifest> {
        let digest = self.store.put(&manifest.encode()?)?;
        manifest.cid = digest.to_hex();
        self.index.insert(&manifest)?;
        tracing::info!(
            cid = %manifest.cid,
            size = manifest.dataset_size,
            blocks = manifest.block_count(),
            "stored dataset"
        );
        Ok(manifest)
    }

    /// Read the manifest block for `cid`.
    pub fn manifest(&self, cid: &str) -> Result<Manifest> {
        let digest = parse_cid(cid)?;
        let bytes = match self.store.get(&digest) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => return Err(StoreError::manifest_not_found(cid)),
            Err(err) => return Err(err),
        };
        Manifest::decode(&digest.to_hex(), &bytes).map_err(|e| {
            StoreError::invalid_parameter("cid", format!("{cid} is not a manifest: {e}"))
        })
    }

    pub fn exists(&self, cid: &str) -> Result<bool> {
        let digest = parse_cid(cid)?;
        self.index.contains(&digest.to_hex())
    }

    /// Check that the dataset is complete locally and (re)index it.
    pub fn fetch(&self, cid: &str) -> Result<Manifest> {
        let manifest = self.manifest(cid)?;
        for digest in &manifest.blocks {
            if !self.store.has(digest)? {
                return Err(StoreError::not_found(digest));
            }
        }
        if !self.index.contains(&manifest.cid)? {
            tracing::info!(cid = %manifest.cid, "indexing fetched dataset");
            self.index.insert(&manifest)?;
        }
        Ok(manifest)
    }

    /// Every indexed manifest, oldest first.
    pub fn manifests(&self) -> Result<Vec<Manifest>> {
        self.index.cids()?.iter().map(|cid| self.manifest(cid)).collect()
    }

    /// Remove a dataset: its manifest plus the blocks nothing else uses.
    /// Blocks another dataset references, pinned blocks and blocks an open
    /// upload wrote all stay.
    pub fn delete(&self, cid: &str) -> Result<()> {
        let digest = parse_cid(cid)?;
        let cid = digest.to_hex();
        // Held for the whole delete so no upload can reuse a block between
        // the orphan check and its removal.
        let held = self.held.lock();
        let orphans = self
            .index
            .remove(&cid)?
            .ok_or_else(|| StoreError::manifest_not_found(&cid))?;

        for session in lock(&self.downloads).remove(&cid).unwrap_or_default() {
            session.cancel();
        }

        let mut removed = 0usize;
        let mut kept = 0usize;
        for block in &orphans {
            if held.contains_key(block) {
                kept += 1;
            } else if self.store.delete(block)? {
                removed += 1;
            }
        }
        if !self.index.is_referenced(&digest, None)?
            && !self.index.is_pinned(&digest)?
            && !held.contains_key(&digest)
        {
            self.store.delete(&digest)?;
        }
        tracing::info!(%cid, removed, kept, "deleted dataset");
        Ok(())
    }

    pub fn space(&self) -> Space {
        let stats = self.store.stats();
        let reserved = lock(&self.uploads)
            .values()
            .map(|session| lock(session).reserved())
            .sum();
        Space {
            total_blocks: stats.blocks,
            quota_max_bytes: self.store.quota(),
            quota_used_bytes: stats.used_bytes,
            quota_reserved_bytes: reserved,
        }
    }
}

pub(crate) fn parse_cid(cid: &str) -> Result<Digest> {
    cid.trim()
        .parse::<Digest>()
        .map_err(|_| StoreError::invalid_parameter("cid", format!("'{cid}' is not a content id")))
}
