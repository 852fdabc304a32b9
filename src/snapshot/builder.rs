//! Snapshot construction: full and incremental builds into a staging
//! directory.
//!
//! A full build parses, chunks, and embeds every file. An incremental build
//! copies the previous snapshot's metadata store, drops the affected
//! documents, re-processes only the changed files — reusing cached
//! embeddings for chunks whose byte ranges survived — and rebuilds only the
//! affected shards, copying untouched shard files verbatim. The outline is
//! rebuilt either way because it depends on every node embedding.
//!
//! Per-file failures are counted and logged, never fatal to the build.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::ann::LeafShardIndex;
use crate::config::{EngineConfig, CHUNKER_VERSION};
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::ids::{sha256_hex, shard_for_doc};
use crate::markdown::{chunk_node, detect_fences, normalize, parse_heading_tree};
use crate::node_embedding::node_vector;
use crate::outline::{OutlineEntry, OutlineIndex};
use crate::scanner::FileMeta;
use crate::snapshot::manifest::{BuildScope, Manifest, SnapshotStats};
use crate::snapshot::SnapshotLayout;
use crate::store::{Changes, DocMeta, LeafRow, MetaStore, NodeRow};

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub snapshot_id: String,
    pub stats: SnapshotStats,
    pub duration_ms: u64,
}

pub struct SnapshotBuilder {
    layout: SnapshotLayout,
    vault_root: PathBuf,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
}

#[derive(Default)]
struct BuildCounters {
    files_failed: usize,
    chunks_embedded: usize,
    chunks_reused: usize,
}

impl SnapshotBuilder {
    pub fn new(
        layout: SnapshotLayout,
        vault_root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            layout,
            vault_root: vault_root.into(),
            embedder,
            config,
        }
    }

    /// Build a complete snapshot from every scanned file. Returns the id of
    /// the staged (not yet activated) snapshot.
    pub fn build_full(&self, files: &[FileMeta]) -> Result<BuildOutcome> {
        let started = Instant::now();
        let id = new_snapshot_id();
        let staging = self.stage(&id)?;
        tracing::info!(snapshot = %id, files = files.len(), "full build started");

        let store = MetaStore::open(&SnapshotLayout::store_path(&staging))?;
        let mut counters = BuildCounters::default();
        let empty_cache = HashMap::new();

        for file in files {
            if let Err(err) = self.process_file(&store, file, &empty_cache, &mut counters) {
                counters.files_failed += 1;
                tracing::warn!(doc_uri = %file.doc_uri, error = %err, "file skipped during build");
            }
        }

        self.build_shard_indexes(&store, &staging, None, None)?;
        self.build_outline(&store, &staging)?;
        self.finalize(store, staging, id, BuildScope::Full, None, started, counters)
    }

    /// Build a snapshot on top of `prev_id`, reprocessing only `changes`.
    /// `current_files` is the present vault scan (source of mtime/size for
    /// added and modified docs).
    pub fn build_incremental(
        &self,
        prev_id: &str,
        changes: &Changes,
        current_files: &[FileMeta],
    ) -> Result<BuildOutcome> {
        let started = Instant::now();
        let id = new_snapshot_id();
        let staging = self.stage(&id)?;
        let prev_dir = self.layout.snapshot_dir(prev_id);
        tracing::info!(
            snapshot = %id,
            previous = %prev_id,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "incremental build started"
        );

        std::fs::copy(
            SnapshotLayout::store_path(&prev_dir),
            SnapshotLayout::store_path(&staging),
        )
        .map_err(|e| EngineError::io_op(prev_dir.display().to_string(), "copy", e))?;
        let store = MetaStore::open(&SnapshotLayout::store_path(&staging))?;

        // Harvest the embedding cache of modified docs before their rows go.
        let mut cache: HashMap<String, Vec<f32>> = HashMap::new();
        for doc_uri in &changes.modified {
            cache.extend(store.embeddings_for_doc(doc_uri)?);
        }

        for doc_uri in changes.deleted.iter().chain(&changes.modified) {
            store.delete_doc(doc_uri)?;
        }

        let by_uri: HashMap<&str, &FileMeta> = current_files
            .iter()
            .map(|f| (f.doc_uri.as_str(), f))
            .collect();
        let mut counters = BuildCounters::default();
        for doc_uri in changes.added.iter().chain(&changes.modified) {
            let Some(file) = by_uri.get(doc_uri.as_str()) else {
                counters.files_failed += 1;
                tracing::warn!(doc_uri = %doc_uri, "changed file vanished before rebuild");
                continue;
            };
            if let Err(err) = self.process_file(&store, file, &cache, &mut counters) {
                counters.files_failed += 1;
                tracing::warn!(doc_uri = %doc_uri, error = %err, "file skipped during build");
            }
        }

        let affected: BTreeSet<u32> = changes
            .added
            .iter()
            .chain(&changes.modified)
            .chain(&changes.deleted)
            .map(|uri| shard_for_doc(uri))
            .collect();
        self.build_shard_indexes(&store, &staging, Some(&affected), Some(&prev_dir))?;
        self.build_outline(&store, &staging)?;
        self.finalize(
            store,
            staging,
            id,
            BuildScope::Incremental,
            Some(prev_id.to_string()),
            started,
            counters,
        )
    }

    fn stage(&self, id: &str) -> Result<PathBuf> {
        let staging = self.layout.building_dir(id);
        for dir in [
            staging.clone(),
            staging.join("shards"),
            staging.join("id_maps"),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| EngineError::io_op(dir.display().to_string(), "create_dir", e))?;
        }
        Ok(staging)
    }

    /// Parse, chunk, and embed one file, then write its rows in one
    /// transaction. Cache hits skip the model.
    fn process_file(
        &self,
        store: &MetaStore,
        file: &FileMeta,
        cache: &HashMap<String, Vec<f32>>,
        counters: &mut BuildCounters,
    ) -> Result<()> {
        let mut path = self.vault_root.clone();
        for segment in file.doc_uri.split('/') {
            path.push(segment);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::io_op(path.display().to_string(), "read", e))?;
        let text = normalize(&raw);
        let fences = detect_fences(&text);
        let tree = parse_heading_tree(&file.doc_uri, &text, &fences);
        let shard_id = shard_for_doc(&file.doc_uri);

        let count_tokens = |s: &str| self.embedder.count_tokens(s);
        let mut nodes = Vec::new();
        let mut chunks = Vec::new();
        for node in tree.nodes() {
            nodes.push(NodeRow {
                node_id: node.node_id.clone(),
                level: node.level,
                title: node.title.clone(),
                heading_path: node.heading_path.clone(),
                start_char: node.start_char as i64,
                end_char: node.end_char as i64,
                shard_id,
            });
            chunks.extend(chunk_node(
                &file.doc_uri,
                &text,
                node,
                &fences,
                shard_id,
                &self.config.chunking,
                &count_tokens,
            ));
        }

        // Embed only the chunks the cache cannot satisfy.
        let mut vectors: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut miss_texts: Vec<&str> = Vec::new();
        let mut miss_ids: Vec<&str> = Vec::new();
        for chunk in &chunks {
            if let Some(hit) = cache.get(&chunk.leaf_id) {
                vectors.insert(chunk.leaf_id.as_str(), hit.clone());
                counters.chunks_reused += 1;
            } else {
                miss_texts.push(chunk.text.as_str());
                miss_ids.push(chunk.leaf_id.as_str());
            }
        }
        if !miss_texts.is_empty() {
            let embedded = self.embedder.embed_batch(&miss_texts)?;
            counters.chunks_embedded += embedded.len();
            for (leaf_id, embedding) in miss_ids.iter().zip(embedded) {
                vectors.insert(leaf_id, embedding.vector);
            }
        }

        let leaves: Vec<LeafRow> = chunks
            .iter()
            .map(|chunk| LeafRow {
                leaf_id: chunk.leaf_id.clone(),
                node_id: chunk.node_id.clone(),
                heading_path: chunk.heading_path.clone(),
                start_char: chunk.start_char as i64,
                end_char: chunk.end_char as i64,
                text_hash: chunk.text_hash.clone(),
                shard_id: chunk.shard_id,
                token_count: chunk.token_count as i64,
                text: chunk.text.clone(),
                embedding: vectors.get(chunk.leaf_id.as_str()).cloned(),
            })
            .collect();

        let doc = DocMeta {
            doc_uri: file.doc_uri.clone(),
            mtime_ms: file.mtime_ms,
            size: file.size,
            content_hash: sha256_hex(text.as_bytes()),
        };
        store.index_document(&doc, &nodes, &leaves)
    }

    /// Build (or copy forward) every non-empty shard index. `rebuild` of
    /// `None` rebuilds everything; otherwise only the named shards are
    /// rebuilt and the rest are copied byte-for-byte from `prev_dir`.
    fn build_shard_indexes(
        &self,
        store: &MetaStore,
        staging: &Path,
        rebuild: Option<&BTreeSet<u32>>,
        prev_dir: Option<&Path>,
    ) -> Result<()> {
        for shard_id in store.shard_ids()? {
            let must_rebuild = rebuild.map_or(true, |set| set.contains(&shard_id));
            if !must_rebuild {
                if let Some(prev) = prev_dir {
                    let prev_ann = SnapshotLayout::shard_path(prev, shard_id);
                    let prev_ids = SnapshotLayout::shard_ids_path(prev, shard_id);
                    if prev_ann.is_file() && prev_ids.is_file() {
                        copy_file(&prev_ann, &SnapshotLayout::shard_path(staging, shard_id))?;
                        copy_file(&prev_ids, &SnapshotLayout::shard_ids_path(staging, shard_id))?;
                        continue;
                    }
                    tracing::warn!(shard_id, "previous shard files missing; rebuilding");
                }
            }

            let entries: Vec<(String, Vec<f32>)> = store
                .leaves_for_shard(shard_id)?
                .into_iter()
                .filter_map(|(leaf_id, vector)| match vector {
                    Some(v) => Some((leaf_id, v)),
                    None => {
                        tracing::warn!(leaf_id = %leaf_id, "leaf has no embedding; excluded from ANN");
                        None
                    }
                })
                .collect();
            if entries.is_empty() {
                continue;
            }
            let index = LeafShardIndex::build(
                &entries,
                self.embedder.dimension(),
                self.config.ann.ivfpq_threshold,
                self.config.ann.nprobe,
            )?;
            index.save(
                &SnapshotLayout::shard_path(staging, shard_id),
                &SnapshotLayout::shard_ids_path(staging, shard_id),
            )?;
        }
        Ok(())
    }

    /// Rebuild the outline from every node's descendant leaf vectors. A
    /// node's descendants are exactly the leaves inside its byte range.
    fn build_outline(&self, store: &MetaStore, staging: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for doc in store.all_docs()? {
            let nodes = store.nodes_for_doc(&doc.doc_uri)?;
            let leaves = store.leaf_vectors_for_doc(&doc.doc_uri)?;
            let shard_id = shard_for_doc(&doc.doc_uri);
            for node in nodes {
                let vectors: Vec<&[f32]> = leaves
                    .iter()
                    .filter(|(_, start, end, vector)| {
                        *start >= node.start_char && *end <= node.end_char && vector.is_some()
                    })
                    .filter_map(|(_, _, _, vector)| vector.as_deref())
                    .collect();
                if let Some(vector) = node_vector(&vectors) {
                    entries.push(OutlineEntry {
                        node_id: node.node_id,
                        vector,
                        shard_ids: std::iter::once(shard_id).collect(),
                    });
                }
            }
        }
        let outline = OutlineIndex::build(&entries, self.embedder.dimension())?;
        outline.save(
            &SnapshotLayout::outline_path(staging),
            &SnapshotLayout::outline_ids_path(staging),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        store: MetaStore,
        staging: PathBuf,
        id: String,
        scope: BuildScope,
        previous: Option<String>,
        started: Instant,
        counters: BuildCounters,
    ) -> Result<BuildOutcome> {
        store.set_meta("snapshot_id", &id)?;
        store.set_meta("chunker_version", &CHUNKER_VERSION.to_string())?;
        let store_stats = store.stats()?;
        store.checkpoint()?;
        drop(store);

        // The WAL should be empty after the truncate checkpoint; remove the
        // sidecar files so the directory hashes cleanly.
        for suffix in ["-wal", "-shm"] {
            let sidecar = staging.join(format!("meta.sqlite{suffix}"));
            if sidecar.exists() {
                let _ = std::fs::remove_file(sidecar);
            }
        }

        let stats = SnapshotStats {
            docs: store_stats.docs,
            nodes: store_stats.nodes,
            leaves: store_stats.leaves,
            shards: store_stats.shards,
            files_failed: counters.files_failed,
            chunks_embedded: counters.chunks_embedded,
            chunks_reused: counters.chunks_reused,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let manifest = Manifest {
            snapshot_id: id.clone(),
            created_at: Utc::now(),
            build_duration_ms: duration_ms,
            scope,
            previous_snapshot_id: previous,
            embedding_model: self.embedder.model_id().to_string(),
            embedding_dimension: self.embedder.dimension(),
            shard_count: self.config.sharding.shard_count,
            chunker_version: CHUNKER_VERSION,
            stats,
            file_hashes: hash_snapshot_files(&staging)?,
        };
        manifest.save(&SnapshotLayout::manifest_path(&staging))?;

        tracing::info!(
            snapshot = %id,
            duration_ms,
            docs = stats.docs,
            leaves = stats.leaves,
            embedded = stats.chunks_embedded,
            reused = stats.chunks_reused,
            failed = stats.files_failed,
            "build staged"
        );
        Ok(BuildOutcome {
            snapshot_id: id,
            stats,
            duration_ms,
        })
    }
}

fn new_snapshot_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| EngineError::io_op(from.display().to_string(), "copy", e))
}

/// SHA-256 every file under the snapshot directory (manifest excluded),
/// keyed by forward-slash relative path.
fn hash_snapshot_files(dir: &Path) -> Result<std::collections::BTreeMap<String, String>> {
    let mut hashes = std::collections::BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| EngineError::Internal(format!("walk snapshot: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| EngineError::Internal("snapshot walk escaped root".into()))?;
        let rel_str = rel
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(p) => Some(p.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        if rel_str == "manifest.json" {
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .map_err(|e| EngineError::io_op(entry.path().display().to_string(), "read", e))?;
        hashes.insert(rel_str, sha256_hex(&bytes));
    }
    Ok(hashes)
}
