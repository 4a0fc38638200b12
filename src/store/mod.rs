// src/store/mod.rs
//
// Content-addressed block storage.
//
// Structure:
//   digest.rs - BLAKE3 block identity
//   memory.rs - volatile backend
//   fs.rs     - one file per block under <data-dir>/blocks

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::node::RepoKind;

pub mod digest;
pub mod fs;
pub mod memory;

pub use digest::Digest;
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Counters reported by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blocks: u64,
    pub used_bytes: u64,
}

/// Blocking block store interface. The driver calls it from
/// `spawn_blocking`, so implementations may do synchronous I/O.
///
/// `put` is idempotent: storing content that is already present returns the
/// same digest and leaves the counters untouched, including when two puts of
/// the same content race.
pub trait BlockStore: Send + Sync + 'static {
    fn put(&self, data: &[u8]) -> Result<Digest>;

    /// Fails with `NotFound` when no block has this digest.
    fn get(&self, digest: &Digest) -> Result<Bytes>;

    fn has(&self, digest: &Digest) -> Result<bool>;

    /// Returns whether a block was removed.
    fn delete(&self, digest: &Digest) -> Result<bool>;

    fn stats(&self) -> StoreStats;

    /// Maximum number of bytes the store accepts.
    fn quota(&self) -> u64;

    /// Mark the medium unavailable. Later calls fail with `Unavailable`.
    fn close(&self);
}

/// Open the backend selected by `kind`.
pub fn open_store(kind: RepoKind, data_dir: Option<&Path>, quota: u64) -> Result<Arc<dyn BlockStore>> {
    match (kind, data_dir) {
        (RepoKind::Memory, _) => Ok(Arc::new(MemoryStore::new(quota))),
        (RepoKind::Fs, Some(dir)) => Ok(Arc::new(FsStore::open(dir.join("blocks"), quota)?)),
        (RepoKind::Fs, None) => Err(crate::error::StoreError::config(
            "the fs repo needs a data directory",
        )),
    }
}
