//! SQLite metadata store: docs, heading nodes, leaves, embedding cache.
//!
//! One database file per snapshot, opened in WAL mode. Builders write to a
//! staged snapshot's store; the active snapshot's store only ever serves
//! reads. Embedding BLOBs are little-endian f32 (4096 bytes at 1024 dims)
//! and double as the embedding cache consulted by incremental rebuilds and
//! by BM25-only hybrid scoring.

pub mod fts;

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{EngineError, Result};
use crate::scanner::FileMeta;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS docs (
    doc_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_uri      TEXT NOT NULL UNIQUE,
    mtime_ms     INTEGER NOT NULL,
    size         INTEGER NOT NULL,
    content_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    node_id      TEXT PRIMARY KEY,
    doc_id       INTEGER NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
    level        INTEGER NOT NULL,
    title        TEXT NOT NULL,
    heading_path TEXT NOT NULL,
    start_char   INTEGER NOT NULL,
    end_char     INTEGER NOT NULL,
    shard_id     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_doc ON nodes(doc_id);

CREATE TABLE IF NOT EXISTS leaves (
    leaf_id      TEXT PRIMARY KEY,
    doc_id       INTEGER NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
    node_id      TEXT NOT NULL,
    heading_path TEXT NOT NULL,
    start_char   INTEGER NOT NULL,
    end_char     INTEGER NOT NULL,
    text_hash    TEXT NOT NULL,
    shard_id     INTEGER NOT NULL,
    token_count  INTEGER NOT NULL,
    embedding    BLOB
);
CREATE INDEX IF NOT EXISTS idx_leaves_doc ON leaves(doc_id);
CREATE INDEX IF NOT EXISTS idx_leaves_shard ON leaves(shard_id);

-- Contentless full-text index over leaf text; rowids mirror leaves.rowid.
CREATE VIRTUAL TABLE IF NOT EXISTS leaf_fts USING fts5(body, content='');

-- FTS5 'delete' on a contentless table needs the original text back, so it
-- is retained here keyed on the shared rowid.
CREATE TABLE IF NOT EXISTS leaf_text (
    leaf_rowid INTEGER PRIMARY KEY,
    body       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Scan-time identity of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMeta {
    pub doc_uri: String,
    pub mtime_ms: i64,
    pub size: i64,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct NodeRow {
    pub node_id: String,
    pub level: u8,
    pub title: String,
    pub heading_path: String,
    pub start_char: i64,
    pub end_char: i64,
    pub shard_id: u32,
}

#[derive(Debug, Clone)]
pub struct LeafRow {
    pub leaf_id: String,
    pub node_id: String,
    pub heading_path: String,
    pub start_char: i64,
    pub end_char: i64,
    pub text_hash: String,
    pub shard_id: u32,
    pub token_count: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// Leaf metadata hydrated for search results.
#[derive(Debug, Clone)]
pub struct LeafMeta {
    pub leaf_id: String,
    pub doc_uri: String,
    pub heading_path: String,
    pub start_char: usize,
    pub end_char: usize,
    pub shard_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl Changes {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub docs: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub shards: usize,
}

pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    /// Open (creating if missing) a store in WAL mode with the schema applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or refresh one doc row. Running it twice with the same uri
    /// leaves exactly one row carrying the second call's fields.
    pub fn upsert_doc(&self, doc: &DocMeta) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            r"INSERT INTO docs(doc_uri, mtime_ms, size, content_hash)
              VALUES (?1, ?2, ?3, ?4)
              ON CONFLICT(doc_uri) DO UPDATE SET
                mtime_ms = excluded.mtime_ms,
                size = excluded.size,
                content_hash = excluded.content_hash",
            params![doc.doc_uri, doc.mtime_ms, doc.size, doc.content_hash],
        )?;
        let doc_id: i64 = conn.query_row(
            "SELECT doc_id FROM docs WHERE doc_uri = ?1",
            params![doc.doc_uri],
            |row| row.get(0),
        )?;
        Ok(doc_id)
    }

    /// Index one document in a single transaction: upsert the doc row,
    /// replace its nodes/leaves, and refresh the full-text index.
    pub fn index_document(&self, doc: &DocMeta, nodes: &[NodeRow], leaves: &[LeafRow]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        Self::delete_doc_tx(&tx, &doc.doc_uri)?;
        tx.execute(
            r"INSERT INTO docs(doc_uri, mtime_ms, size, content_hash)
              VALUES (?1, ?2, ?3, ?4)",
            params![doc.doc_uri, doc.mtime_ms, doc.size, doc.content_hash],
        )?;
        let doc_id = tx.last_insert_rowid();

        {
            let mut node_stmt = tx.prepare_cached(
                r"INSERT INTO nodes(node_id, doc_id, level, title, heading_path,
                                    start_char, end_char, shard_id)
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for node in nodes {
                node_stmt.execute(params![
                    node.node_id,
                    doc_id,
                    node.level,
                    node.title,
                    node.heading_path,
                    node.start_char,
                    node.end_char,
                    node.shard_id,
                ])?;
            }

            let mut leaf_stmt = tx.prepare_cached(
                r"INSERT INTO leaves(leaf_id, doc_id, node_id, heading_path, start_char,
                                     end_char, text_hash, shard_id, token_count, embedding)
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut fts_stmt =
                tx.prepare_cached("INSERT INTO leaf_fts(rowid, body) VALUES (?1, ?2)")?;
            let mut text_stmt =
                tx.prepare_cached("INSERT INTO leaf_text(leaf_rowid, body) VALUES (?1, ?2)")?;
            for leaf in leaves {
                leaf_stmt.execute(params![
                    leaf.leaf_id,
                    doc_id,
                    leaf.node_id,
                    leaf.heading_path,
                    leaf.start_char,
                    leaf.end_char,
                    leaf.text_hash,
                    leaf.shard_id,
                    leaf.token_count,
                    leaf.embedding.as_deref().map(vec_to_blob),
                ])?;
                let leaf_rowid = tx.last_insert_rowid();
                fts_stmt.execute(params![leaf_rowid, leaf.text])?;
                text_stmt.execute(params![leaf_rowid, leaf.text])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove a document and everything hanging off it. Returns whether it
    /// existed.
    pub fn delete_doc(&self, doc_uri: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existed = Self::delete_doc_tx(&tx, doc_uri)?;
        tx.commit()?;
        Ok(existed)
    }

    fn delete_doc_tx(tx: &rusqlite::Transaction<'_>, doc_uri: &str) -> Result<bool> {
        let doc_id: Option<i64> = tx
            .query_row(
                "SELECT doc_id FROM docs WHERE doc_uri = ?1",
                params![doc_uri],
                |row| row.get(0),
            )
            .optional()?;
        let Some(doc_id) = doc_id else {
            return Ok(false);
        };

        // Contentless FTS rows must be deleted with the original text; the
        // leaf_text side table retains it for exactly this moment.
        {
            let mut stmt = tx.prepare_cached(
                r"SELECT l.rowid, t.body FROM leaves l
                  JOIN leaf_text t ON t.leaf_rowid = l.rowid
                  WHERE l.doc_id = ?1",
            )?;
            let rows: Vec<(i64, String)> = stmt
                .query_map(params![doc_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            let mut fts_del = tx.prepare_cached(
                "INSERT INTO leaf_fts(leaf_fts, rowid, body) VALUES ('delete', ?1, ?2)",
            )?;
            let mut text_del = tx.prepare_cached("DELETE FROM leaf_text WHERE leaf_rowid = ?1")?;
            for (rowid, body) in rows {
                fts_del.execute(params![rowid, body])?;
                text_del.execute(params![rowid])?;
            }
        }

        tx.execute("DELETE FROM docs WHERE doc_id = ?1", params![doc_id])?;
        Ok(true)
    }

    /// Diff the current scan against stored docs. Modified means mtime or
    /// size differs.
    pub fn get_changed_docs(&self, current: &[FileMeta]) -> Result<Changes> {
        let stored = self.all_docs()?;
        let mut changes = Changes::default();
        let stored_by_uri: HashMap<&str, &DocMeta> =
            stored.iter().map(|d| (d.doc_uri.as_str(), d)).collect();
        let current_uris: std::collections::HashSet<&str> =
            current.iter().map(|f| f.doc_uri.as_str()).collect();

        for file in current {
            match stored_by_uri.get(file.doc_uri.as_str()) {
                None => changes.added.push(file.doc_uri.clone()),
                Some(doc) => {
                    if doc.mtime_ms != file.mtime_ms || doc.size != file.size {
                        changes.modified.push(file.doc_uri.clone());
                    }
                }
            }
        }
        for doc in &stored {
            if !current_uris.contains(doc.doc_uri.as_str()) {
                changes.deleted.push(doc.doc_uri.clone());
            }
        }
        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        Ok(changes)
    }

    pub fn all_docs(&self) -> Result<Vec<DocMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT doc_uri, mtime_ms, size, content_hash FROM docs ORDER BY doc_uri")?;
        let rows = stmt.query_map([], |row| {
            Ok(DocMeta {
                doc_uri: row.get(0)?,
                mtime_ms: row.get(1)?,
                size: row.get(2)?,
                content_hash: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn doc_uris_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let like = format!("{}%", prefix.replace('%', r"\%").replace('_', r"\_"));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r"SELECT doc_uri FROM docs WHERE doc_uri LIKE ?1 ESCAPE '\' ORDER BY doc_uri",
        )?;
        let rows = stmt.query_map(params![like], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Hydrate leaf metadata for a candidate set. Missing ids are absent
    /// from the result map.
    pub fn leaf_meta(&self, leaf_ids: &[String]) -> Result<HashMap<String, LeafMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r"SELECT l.leaf_id, d.doc_uri, l.heading_path, l.start_char, l.end_char, l.shard_id
              FROM leaves l JOIN docs d ON d.doc_id = l.doc_id
              WHERE l.leaf_id = ?1",
        )?;
        let mut out = HashMap::with_capacity(leaf_ids.len());
        for leaf_id in leaf_ids {
            let meta = stmt
                .query_row(params![leaf_id], |row| {
                    Ok(LeafMeta {
                        leaf_id: row.get(0)?,
                        doc_uri: row.get(1)?,
                        heading_path: row.get(2)?,
                        start_char: row.get::<_, i64>(3)? as usize,
                        end_char: row.get::<_, i64>(4)? as usize,
                        shard_id: row.get(5)?,
                    })
                })
                .optional()?;
            if let Some(meta) = meta {
                out.insert(leaf_id.clone(), meta);
            }
        }
        Ok(out)
    }

    /// Cached embedding for one leaf, if present.
    pub fn leaf_embedding(&self, leaf_id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT embedding FROM leaves WHERE leaf_id = ?1",
                params![leaf_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.flatten().map(|b| blob_to_vec(&b)))
    }

    /// Embedding cache for a whole document, keyed by leaf id. Consulted by
    /// incremental rebuilds before the old rows are deleted.
    pub fn embeddings_for_doc(&self, doc_uri: &str) -> Result<HashMap<String, Vec<f32>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r"SELECT l.leaf_id, l.embedding FROM leaves l
              JOIN docs d ON d.doc_id = l.doc_id
              WHERE d.doc_uri = ?1 AND l.embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![doc_uri], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (leaf_id, blob) = row?;
            out.insert(leaf_id, blob_to_vec(&blob));
        }
        Ok(out)
    }

    /// All leaves of a shard with their vectors, ordered by (doc_uri,
    /// start_char) so index builds are deterministic.
    pub fn leaves_for_shard(&self, shard_id: u32) -> Result<Vec<(String, Option<Vec<f32>>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r"SELECT l.leaf_id, l.embedding FROM leaves l
              JOIN docs d ON d.doc_id = l.doc_id
              WHERE l.shard_id = ?1
              ORDER BY d.doc_uri, l.start_char, l.end_char",
        )?;
        let rows = stmt.query_map(params![shard_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (leaf_id, blob) = row?;
            out.push((leaf_id, blob.map(|b| blob_to_vec(&b))));
        }
        Ok(out)
    }

    /// Distinct non-empty shard ids, ascending.
    pub fn shard_ids(&self) -> Result<Vec<u32>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT shard_id FROM leaves ORDER BY shard_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn nodes_for_doc(&self, doc_uri: &str) -> Result<Vec<NodeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r"SELECT n.node_id, n.level, n.title, n.heading_path, n.start_char, n.end_char, n.shard_id
              FROM nodes n JOIN docs d ON d.doc_id = n.doc_id
              WHERE d.doc_uri = ?1
              ORDER BY n.start_char, n.level",
        )?;
        let rows = stmt.query_map(params![doc_uri], |row| {
            Ok(NodeRow {
                node_id: row.get(0)?,
                level: row.get(1)?,
                title: row.get(2)?,
                heading_path: row.get(3)?,
                start_char: row.get(4)?,
                end_char: row.get(5)?,
                shard_id: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Leaf ranges and vectors of a document, ordered by position.
    pub fn leaf_vectors_for_doc(
        &self,
        doc_uri: &str,
    ) -> Result<Vec<(String, i64, i64, Option<Vec<f32>>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r"SELECT l.leaf_id, l.start_char, l.end_char, l.embedding
              FROM leaves l JOIN docs d ON d.doc_id = l.doc_id
              WHERE d.doc_uri = ?1
              ORDER BY l.start_char, l.end_char",
        )?;
        let rows = stmt.query_map(params![doc_uri], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, start, end, blob) = row?;
            out.push((id, start, end, blob.map(|b| blob_to_vec(&b))));
        }
        Ok(out)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r"INSERT INTO meta(key, value) VALUES (?1, ?2)
              ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let docs: i64 = conn.query_row("SELECT COUNT(*) FROM docs", [], |r| r.get(0))?;
        let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
        let leaves: i64 = conn.query_row("SELECT COUNT(*) FROM leaves", [], |r| r.get(0))?;
        let shards: i64 =
            conn.query_row("SELECT COUNT(DISTINCT shard_id) FROM leaves", [], |r| r.get(0))?;
        Ok(StoreStats {
            docs: docs as usize,
            nodes: nodes as usize,
            leaves: leaves as usize,
            shards: shards as usize,
        })
    }

    /// Flush the WAL into the main database file so the file is complete
    /// for hashing and copying.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(()))?;
        Ok(())
    }

    /// Fast structural integrity check, used by snapshot validation.
    pub fn integrity_check(&self) -> Result<()> {
        let conn = self.conn.lock();
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(EngineError::Internal(format!(
                "sqlite quick_check failed: {verdict}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::shard_for_doc;

    fn open_temp() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(&dir.path().join("meta.sqlite")).unwrap();
        (dir, store)
    }

    fn sample_doc(uri: &str) -> (DocMeta, Vec<NodeRow>, Vec<LeafRow>) {
        let shard = shard_for_doc(uri);
        let doc = DocMeta {
            doc_uri: uri.to_string(),
            mtime_ms: 1000,
            size: 64,
            content_hash: "h1".to_string(),
        };
        let nodes = vec![NodeRow {
            node_id: format!("node-{uri}"),
            level: 1,
            title: "H".to_string(),
            heading_path: "H".to_string(),
            start_char: 0,
            end_char: 64,
            shard_id: shard,
        }];
        let leaves = vec![LeafRow {
            leaf_id: format!("leaf-{uri}"),
            node_id: format!("node-{uri}"),
            heading_path: "H".to_string(),
            start_char: 4,
            end_char: 64,
            text_hash: "t1".to_string(),
            shard_id: shard,
            token_count: 15,
            text: "the quick brown fox jumps over the lazy dog".to_string(),
            embedding: Some(vec![0.5f32; 8]),
        }];
        (doc, nodes, leaves)
    }

    #[test]
    fn test_upsert_doc_idempotent() {
        let (_dir, store) = open_temp();
        let mut doc = DocMeta {
            doc_uri: "a.md".into(),
            mtime_ms: 1,
            size: 2,
            content_hash: "x".into(),
        };
        let id1 = store.upsert_doc(&doc).unwrap();
        doc.mtime_ms = 9;
        let id2 = store.upsert_doc(&doc).unwrap();
        assert_eq!(id1, id2);
        let docs = store.all_docs().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].mtime_ms, 9);
    }

    #[test]
    fn test_index_and_hydrate_document() {
        let (_dir, store) = open_temp();
        let (doc, nodes, leaves) = sample_doc("notes/a.md");
        store.index_document(&doc, &nodes, &leaves).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.docs, 1);
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.leaves, 1);
        assert_eq!(stats.shards, 1);

        let metas = store.leaf_meta(&[leaves[0].leaf_id.clone()]).unwrap();
        let meta = &metas[&leaves[0].leaf_id];
        assert_eq!(meta.doc_uri, "notes/a.md");
        assert_eq!(meta.start_char, 4);
        assert_eq!(meta.shard_id, shard_for_doc("notes/a.md"));
    }

    #[test]
    fn test_delete_cascades_and_cleans_fts() {
        let (_dir, store) = open_temp();
        let (doc, nodes, leaves) = sample_doc("notes/a.md");
        store.index_document(&doc, &nodes, &leaves).unwrap();

        assert!(store.delete_doc("notes/a.md").unwrap());
        assert!(!store.delete_doc("notes/a.md").unwrap());
        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats::default());
        // FTS no longer matches the deleted content.
        let hits = store.bm25_search("quick brown", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_reindex_replaces_rows() {
        let (_dir, store) = open_temp();
        let (doc, nodes, mut leaves) = sample_doc("notes/a.md");
        store.index_document(&doc, &nodes, &leaves).unwrap();
        leaves[0].text = "entirely different words now".into();
        leaves[0].leaf_id = "leaf-v2".into();
        store.index_document(&doc, &nodes, &leaves).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.leaves, 1);
        assert!(store.bm25_search("quick", 10).unwrap().is_empty());
        assert!(!store.bm25_search("different", 10).unwrap().is_empty());
    }

    #[test]
    fn test_changed_docs_diff() {
        let (_dir, store) = open_temp();
        let (doc, nodes, leaves) = sample_doc("keep.md");
        store.index_document(&doc, &nodes, &leaves).unwrap();
        let (doc2, nodes2, leaves2) = sample_doc("gone.md");
        store.index_document(&doc2, &nodes2, &leaves2).unwrap();

        let current = vec![
            FileMeta {
                doc_uri: "keep.md".into(),
                size: 64,
                mtime_ms: 1000,
            },
            FileMeta {
                doc_uri: "new.md".into(),
                size: 10,
                mtime_ms: 5,
            },
            FileMeta {
                doc_uri: "touched.md".into(),
                size: 1,
                mtime_ms: 1,
            },
        ];
        let (doc3, nodes3, leaves3) = sample_doc("touched.md");
        store.index_document(&doc3, &nodes3, &leaves3).unwrap();

        let changes = store.get_changed_docs(&current).unwrap();
        assert_eq!(changes.added, vec!["new.md"]);
        assert_eq!(changes.modified, vec!["touched.md"]);
        assert_eq!(changes.deleted, vec!["gone.md"]);
    }

    #[test]
    fn test_embedding_cache_roundtrip() {
        let (_dir, store) = open_temp();
        let (doc, nodes, leaves) = sample_doc("a.md");
        store.index_document(&doc, &nodes, &leaves).unwrap();
        let cached = store.leaf_embedding(&leaves[0].leaf_id).unwrap().unwrap();
        assert_eq!(cached, vec![0.5f32; 8]);
        let by_doc = store.embeddings_for_doc("a.md").unwrap();
        assert_eq!(by_doc.len(), 1);
        assert!(store.leaf_embedding("missing").unwrap().is_none());
    }

    #[test]
    fn test_meta_kv() {
        let (_dir, store) = open_temp();
        assert!(store.get_meta("k").unwrap().is_none());
        store.set_meta("k", "v1").unwrap();
        store.set_meta("k", "v2").unwrap();
        assert_eq!(store.get_meta("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_prefix_lookup_escapes_like_metachars() {
        let (_dir, store) = open_temp();
        for uri in ["notes/a.md", "notes/b.md", "other/c.md", "n_tes/x.md"] {
            let (doc, nodes, leaves) = sample_doc(uri);
            store.index_document(&doc, &nodes, &leaves).unwrap();
        }
        let hits = store.doc_uris_with_prefix("notes/").unwrap();
        assert_eq!(hits, vec!["notes/a.md", "notes/b.md"]);
    }

    #[test]
    fn test_integrity_check_passes() {
        let (_dir, store) = open_temp();
        store.integrity_check().unwrap();
    }
}
