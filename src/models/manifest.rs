// src/models/manifest.rs
//
// A manifest describes one dataset: its ordered blocks plus file metadata.
// It is stored as a block of its own; the digest of that block is the
// dataset's content id (cid).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Digest of the manifest block. Not part of the stored document.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
    /// BLAKE3 over the concatenated block digests
    pub tree_cid: String,
    pub dataset_size: u64,
    pub block_size: usize,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mimetype: String,
    pub blocks: Vec<Digest>,
    /// Unix seconds
    pub created_at: i64,
}

impl Manifest {
    pub fn new(blocks: Vec<Digest>, dataset_size: u64, block_size: usize) -> Self {
        Self {
            cid: String::new(),
            tree_cid: tree_cid(&blocks).to_hex(),
            dataset_size,
            block_size,
            filename: String::new(),
            mimetype: String::new(),
            blocks,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    /// Bytes stored as the manifest block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut stored = self.clone();
        stored.cid.clear();
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Parse a manifest block read back under `cid`.
    pub fn decode(cid: &str, bytes: &[u8]) -> Result<Self> {
        let mut manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.cid = cid.to_string();
        Ok(manifest)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

pub fn tree_cid(blocks: &[Digest]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    for block in blocks {
        hasher.update(block.as_bytes());
    }
    Digest::from_bytes(*hasher.finalize().as_bytes())
}

/// Storage usage of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub total_blocks: u64,
    pub quota_max_bytes: u64,
    pub quota_used_bytes: u64,
    /// Bytes buffered by upload sessions that are not committed yet
    pub quota_reserved_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_document_uses_camel_case_without_cid() {
        let mut manifest = Manifest::new(vec![Digest::of(b"a"), Digest::of(b"b")], 2, 1)
            .filename("notes.txt")
            .mimetype("text/plain");
        manifest.cid = "ignored".to_string();

        let json: serde_json::Value = serde_json::from_slice(&manifest.encode().unwrap()).unwrap();
        assert!(json.get("cid").is_none());
        assert_eq!(json["datasetSize"], 2);
        assert_eq!(json["blockSize"], 1);
        assert_eq!(json["blocks"][0], Digest::of(b"a").to_hex());
        assert_eq!(json["treeCid"], manifest.tree_cid);
    }

    #[test]
    fn decode_attaches_cid() {
        let manifest = Manifest::new(vec![Digest::of(b"x")], 1, 4).filename("x.bin");
        let decoded = Manifest::decode("abc", &manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded.cid, "abc");
        assert_eq!(decoded.filename, "x.bin");
        assert_eq!(decoded.blocks, manifest.blocks);
    }

    #[test]
    fn tree_cid_depends_on_order() {
        let a = Digest::of(b"a");
        let b = Digest::of(b"b");
        assert_ne!(tree_cid(&[a, b]), tree_cid(&[b, a]));
    }
}
