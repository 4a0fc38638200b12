// src/dataset/index.rs
//
// SQLite index of manifests and the blocks they reference, plus the blocks
// stored on their own through a single-block put. The manifest blocks
// themselves are the source of truth for content; the index answers "which
// cids exist" and "which blocks are still referenced" without reading every
// manifest.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::models::Manifest;
use crate::store::Digest;

pub struct ManifestIndex {
    db: Mutex<Connection>,
}

impl ManifestIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening manifest index {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS manifests (
                cid TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                mimetype TEXT NOT NULL,
                dataset_size INTEGER NOT NULL,
                block_size INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS manifest_blocks (
                cid TEXT NOT NULL REFERENCES manifests(cid) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                digest TEXT NOT NULL,
                PRIMARY KEY (cid, position)
            );
            CREATE INDEX IF NOT EXISTS idx_manifest_blocks_digest ON manifest_blocks(digest);
            CREATE TABLE IF NOT EXISTS pinned_blocks (
                digest TEXT PRIMARY KEY
            );
            "#,
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, manifest: &Manifest) -> Result<()> {
        let mut db = self.db();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO manifests (cid, filename, mimetype, dataset_size, block_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                manifest.cid,
                manifest.filename,
                manifest.mimetype,
                manifest.dataset_size as i64,
                manifest.block_size as i64,
                manifest.created_at
            ],
        )?;
        tx.execute("DELETE FROM manifest_blocks WHERE cid = ?1", params![manifest.cid])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO manifest_blocks (cid, position, digest) VALUES (?1, ?2, ?3)")?;
            for (position, digest) in manifest.blocks.iter().enumerate() {
                stmt.execute(params![manifest.cid, position as i64, digest.to_hex()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn contains(&self, cid: &str) -> Result<bool> {
        let found = self
            .db()
            .query_row("SELECT 1 FROM manifests WHERE cid = ?1", params![cid], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// All indexed cids, oldest first.
    pub fn cids(&self) -> Result<Vec<String>> {
        let db = self.db();
        let mut stmt = db.prepare("SELECT cid FROM manifests ORDER BY created_at, cid")?;
        let cids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cids)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .db()
            .query_row("SELECT COUNT(*) FROM manifests", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Whether any manifest other than `except` references `digest`.
    pub fn is_referenced(&self, digest: &Digest, except: Option<&str>) -> Result<bool> {
        let found = self
            .db()
            .query_row(
                "SELECT 1 FROM manifest_blocks WHERE digest = ?1 AND cid != ?2 LIMIT 1",
                params![digest.to_hex(), except.unwrap_or("")],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a block stored on its own, so deleting a dataset that shares
    /// its content leaves it in place.
    pub fn pin(&self, digest: &Digest) -> Result<()> {
        self.db().execute(
            "INSERT OR IGNORE INTO pinned_blocks (digest) VALUES (?1)",
            params![digest.to_hex()],
        )?;
        Ok(())
    }

    pub fn unpin(&self, digest: &Digest) -> Result<bool> {
        let removed = self
            .db()
            .execute("DELETE FROM pinned_blocks WHERE digest = ?1", params![digest.to_hex()])?;
        Ok(removed > 0)
    }

    pub fn is_pinned(&self, digest: &Digest) -> Result<bool> {
        let found = self
            .db()
            .query_row(
                "SELECT 1 FROM pinned_blocks WHERE digest = ?1",
                params![digest.to_hex()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Drop `cid` and return the block digests that neither another manifest
    /// nor a pin references.
    /// Returns `None` when the cid is not indexed.
    pub fn remove(&self, cid: &str) -> Result<Option<Vec<Digest>>> {
        let mut db = self.db();
        let tx = db.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM manifests WHERE cid = ?1", params![cid], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let orphans = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT digest FROM manifest_blocks
                 WHERE cid = ?1
                   AND digest NOT IN (SELECT digest FROM manifest_blocks WHERE cid != ?1)
                   AND digest NOT IN (SELECT digest FROM pinned_blocks)",
            )?;
            let hexes = stmt
                .query_map(params![cid], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            hexes
                .iter()
                .filter_map(|hex| hex.parse::<Digest>().ok())
                .collect::<Vec<_>>()
        };

        tx.execute("DELETE FROM manifest_blocks WHERE cid = ?1", params![cid])?;
        tx.execute("DELETE FROM manifests WHERE cid = ?1", params![cid])?;
        tx.commit()?;
        Ok(Some(orphans))
    }
}
