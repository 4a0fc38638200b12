// src/store/fs.rs
//
// Filesystem backend: <root>/<first two hex chars>/<full hex digest>.
// Blocks are written to a uniquely named temp file and renamed into place,
// so a reader never observes a partial block.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::store::{BlockStore, Digest, StoreStats};

const TEMP_SUFFIX: &str = "tmp";

pub struct FsStore {
    root: PathBuf,
    quota: u64,
    // Serializes the final existence check, rename and counter update.
    counters: Mutex<StoreStats>,
    closed: AtomicBool,
}

impl FsStore {
    /// Open (creating if needed) the block directory at `root`. Counters are
    /// rebuilt from the files on disk and stale temp files are removed.
    pub fn open(root: impl Into<PathBuf>, quota: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::unavailable(format!("cannot create {}: {e}", root.display())))?;

        let stats = scan(&root)?;
        tracing::info!(
            root = %root.display(),
            blocks = stats.blocks,
            used_bytes = stats.used_bytes,
            "opened block store"
        );

        Ok(Self {
            root,
            quota,
            counters: Mutex::new(stats),
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::unavailable(format!(
                "block store at {} is closed",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn counters(&self) -> MutexGuard<'_, StoreStats> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_quota(&self, stats: &StoreStats, needed: u64) -> Result<()> {
        if stats.used_bytes + needed > self.quota {
            return Err(StoreError::QuotaExceeded {
                needed,
                available: self.quota.saturating_sub(stats.used_bytes),
            });
        }
        Ok(())
    }
}

fn unavailable(action: &str, path: &Path, err: std::io::Error) -> StoreError {
    StoreError::unavailable(format!("{action} {}: {err}", path.display()))
}

fn scan(root: &Path) -> Result<StoreStats> {
    let mut stats = StoreStats::default();
    let entries = fs::read_dir(root).map_err(|e| unavailable("cannot read", root, e))?;
    for prefix in entries {
        let prefix = prefix.map_err(|e| unavailable("cannot read", root, e))?;
        if !prefix.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let dir = prefix.path();
        for entry in fs::read_dir(&dir).map_err(|e| unavailable("cannot read", &dir, e))? {
            let entry = entry.map_err(|e| unavailable("cannot read", &dir, e))?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(TEMP_SUFFIX) {
                tracing::debug!(path = %path.display(), "removing stale temp block");
                let _ = fs::remove_file(&path);
                continue;
            }
            if name.parse::<Digest>().is_err() {
                continue;
            }
            let len = entry
                .metadata()
                .map_err(|e| unavailable("cannot stat", &path, e))?
                .len();
            stats.blocks += 1;
            stats.used_bytes += len;
        }
    }
    Ok(stats)
}

impl BlockStore for FsStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        self.ensure_open()?;
        let digest = Digest::of(data);
        let path = self.block_path(&digest);
        let needed = data.len() as u64;

        if path.exists() {
            return Ok(digest);
        }
        self.check_quota(&self.counters(), needed)?;

        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| unavailable("cannot create", dir, e))?;
        let temp = dir.join(format!("{}.{}.{TEMP_SUFFIX}", digest.to_hex(), uuid::Uuid::new_v4()));
        fs::write(&temp, data).map_err(|e| unavailable("cannot write", &temp, e))?;

        let mut stats = self.counters();
        if path.exists() {
            let _ = fs::remove_file(&temp);
            return Ok(digest);
        }
        if let Err(err) = self.check_quota(&stats, needed) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        if let Err(err) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(unavailable("cannot commit", &path, err));
        }
        stats.blocks += 1;
        stats.used_bytes += needed;
        tracing::trace!(%digest, size = data.len(), "stored block");
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Bytes> {
        self.ensure_open()?;
        let path = self.block_path(digest);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StoreError::not_found(digest)),
            Err(err) => return Err(unavailable("cannot read", &path, err)),
        };
        let actual = Digest::of(&data);
        if actual != *digest {
            tracing::error!(%digest, %actual, "block content does not match its digest");
            return Err(StoreError::Corrupt {
                digest: digest.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(Bytes::from(data))
    }

    fn has(&self, digest: &Digest) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.block_path(digest).is_file())
    }

    fn delete(&self, digest: &Digest) -> Result<bool> {
        self.ensure_open()?;
        let path = self.block_path(digest);
        let mut stats = self.counters();
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(unavailable("cannot stat", &path, err)),
        };
        fs::remove_file(&path).map_err(|e| unavailable("cannot remove", &path, e))?;
        stats.blocks = stats.blocks.saturating_sub(1);
        stats.used_bytes = stats.used_bytes.saturating_sub(len);
        Ok(true)
    }

    fn stats(&self) -> StoreStats {
        *self.counters()
    }

    fn quota(&self) -> u64 {
        self.quota
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::debug!(root = %self.root.display(), "block store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn blocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let digest = {
            let store = FsStore::open(dir.path(), 1 << 20).unwrap();
            store.put(b"durable").unwrap()
        };
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        assert_eq!(&store.get(&digest).unwrap()[..], b"durable");
        assert_eq!(store.stats(), StoreStats { blocks: 1, used_bytes: 7 });
    }

    #[test]
    fn layout_uses_hex_prefix_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        let digest = store.put(b"layout").unwrap();
        let hex = digest.to_hex();
        assert!(dir.path().join(&hex[..2]).join(&hex).is_file());
    }

    #[test]
    fn concurrent_identical_puts_store_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(dir.path(), 1 << 20).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.put(&[42u8; 4096]).unwrap())
            })
            .collect();
        let digests: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.stats(), StoreStats { blocks: 1, used_bytes: 4096 });
    }

    #[test]
    fn missing_medium_fails_put() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blocks");
        let store = FsStore::open(&root, 1 << 20).unwrap();

        // replace the directory with a plain file so nothing can be created below it
        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        let err = store.put(b"anything").unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }), "{err}");
    }

    #[test]
    fn corrupted_block_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        let digest = store.put(b"original").unwrap();
        let hex = digest.to_hex();
        fs::write(dir.path().join(&hex[..2]).join(&hex), b"tampered").unwrap();
        assert!(matches!(store.get(&digest), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn delete_updates_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        let digest = store.put(b"short-lived").unwrap();
        assert!(store.delete(&digest).unwrap());
        assert!(!store.delete(&digest).unwrap());
        assert_eq!(store.stats(), StoreStats::default());
        assert!(matches!(store.get(&digest), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn stale_temp_files_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab")).unwrap();
        let stale = dir.path().join("ab").join("abcdef.1234.tmp");
        fs::write(&stale, b"partial").unwrap();
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        assert!(!stale.exists());
        assert_eq!(store.stats().blocks, 0);
    }
}
