// src/store/memory.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::store::{BlockStore, Digest, StoreStats};

#[derive(Default)]
struct Blocks {
    map: HashMap<Digest, Bytes>,
    used_bytes: u64,
}

/// Blocks held in a map, lost when the store is dropped.
pub struct MemoryStore {
    blocks: RwLock<Blocks>,
    quota: u64,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(quota: u64) -> Self {
        Self {
            blocks: RwLock::new(Blocks::default()),
            quota,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("memory store is closed"));
        }
        Ok(())
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        self.ensure_open()?;
        let digest = Digest::of(data);

        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        if blocks.map.contains_key(&digest) {
            return Ok(digest);
        }
        let needed = data.len() as u64;
        if blocks.used_bytes + needed > self.quota {
            return Err(StoreError::QuotaExceeded {
                needed,
                available: self.quota.saturating_sub(blocks.used_bytes),
            });
        }
        blocks.map.insert(digest, Bytes::copy_from_slice(data));
        blocks.used_bytes += needed;
        tracing::trace!(%digest, size = data.len(), "stored block in memory");
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Bytes> {
        self.ensure_open()?;
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .get(digest)
            .cloned()
            .ok_or_else(|| StoreError::not_found(digest))
    }

    fn has(&self, digest: &Digest) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .contains_key(digest))
    }

    fn delete(&self, digest: &Digest) -> Result<bool> {
        self.ensure_open()?;
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        match blocks.map.remove(digest) {
            Some(block) => {
                blocks.used_bytes -= block.len() as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> StoreStats {
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        StoreStats {
            blocks: blocks.map.len() as u64,
            used_bytes: blocks.used_bytes,
        }
    }

    fn quota(&self) -> u64 {
        self.quota
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn put_get_round_trip() {
        let store = MemoryStore::new(1024);
        let digest = store.put(b"payload").unwrap();
        assert_eq!(&store.get(&digest).unwrap()[..], b"payload");
        assert!(store.has(&digest).unwrap());
    }

    #[test]
    fn duplicate_put_does_not_grow() {
        let store = MemoryStore::new(1024);
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats(), StoreStats { blocks: 1, used_bytes: 4 });
    }

    #[test]
    fn unknown_digest_is_not_found() {
        let store = MemoryStore::new(1024);
        let err = store.get(&Digest::of(b"missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn quota_is_enforced() {
        let store = MemoryStore::new(8);
        store.put(b"12345").unwrap();
        let err = store.put(b"67890").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 5, available: 3 }));
        // already-present content needs no space
        store.put(b"12345").unwrap();
    }

    #[test]
    fn delete_frees_quota() {
        let store = MemoryStore::new(8);
        let digest = store.put(b"12345").unwrap();
        assert!(store.delete(&digest).unwrap());
        assert!(!store.delete(&digest).unwrap());
        assert_eq!(store.stats(), StoreStats { blocks: 0, used_bytes: 0 });
        store.put(b"678901").unwrap();
        assert_eq!(store.stats().used_bytes, 6);
    }

    #[test]
    fn closed_store_is_unavailable() {
        let store = MemoryStore::new(1024);
        store.close();
        assert!(matches!(store.put(b"x"), Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn concurrent_identical_puts_store_once() {
        let store = Arc::new(MemoryStore::new(1 << 20));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.put(&[7u8; 512]).unwrap())
            })
            .collect();
        let digests: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.stats().blocks, 1);
    }
}
