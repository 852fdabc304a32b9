//! Snapshot manifest: identity, provenance, stats, and file hashes.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildScope {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub docs: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub shards: usize,
    pub files_failed: usize,
    /// Chunks run through the model during this build.
    pub chunks_embedded: usize,
    /// Chunks satisfied from the embedding cache.
    pub chunks_reused: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub build_duration_ms: u64,
    pub scope: BuildScope,
    pub previous_snapshot_id: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub shard_count: u32,
    /// Chunk boundaries key the embedding cache; a chunker change
    /// invalidates it, so the version rides along for incremental builds to
    /// compare against.
    pub chunker_version: u32,
    pub stats: SnapshotStats,
    /// Snapshot-relative path → SHA-256 hex, for every file except the
    /// manifest itself.
    pub file_hashes: BTreeMap<String, String>,
}

impl Manifest {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| EngineError::io_op(path.display().to_string(), "write", e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| EngineError::io_op(path.display().to_string(), "read", e))?;
        serde_json::from_slice(&raw).map_err(Into::into)
    }
}
