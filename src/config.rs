//! Tuning constants and runtime configuration.
//!
//! Compile-time parameters that govern index construction and retrieval live
//! here as documented constants. Runtime settings are carried by
//! [`EngineConfig`], a serde-deserializable tree with defaults, validation,
//! and `MSRL_*` environment overrides. Parsing a config file into the tree is
//! the host's job.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Number of logical shards. Fixed for the v1 on-disk format: shard
/// assignment is `fnv1a32(doc_uri) % SHARD_COUNT` and must stay stable
/// across rebuilds.
pub const SHARD_COUNT: u32 = 128;

/// Embedding dimensionality produced by the model contract.
pub const EMBEDDING_DIM: usize = 1024;

/// Shards at or above this leaf count use IVFPQ; smaller shards use the
/// exact flat index.
pub const IVFPQ_THRESHOLD: usize = 1000;

/// Number of PQ subspaces per vector (one u8 code each).
pub const PQ_SUBSPACES: usize = 64;

/// Centroids per PQ subspace. Must be 256 so codes fit in a u8.
pub const PQ_NUM_CENTROIDS: usize = 256;

/// K-means refinement iterations for coarse and PQ training.
pub const KMEANS_ITERATIONS: usize = 12;

/// Inverted lists probed per IVFPQ query. Tuned for recall over latency.
pub const DEFAULT_NPROBE: usize = 16;

/// HNSW bidirectional links per outline node (layer 0 uses `2 * M`).
pub const OUTLINE_HNSW_M: usize = 32;

/// HNSW candidate list size during outline construction.
pub const OUTLINE_HNSW_EF_CONSTRUCTION: usize = 200;

/// HNSW candidate list size during outline search.
pub const OUTLINE_HNSW_EF_SEARCH: usize = 64;

/// Maximum HNSW layers.
pub const OUTLINE_HNSW_MAX_LAYERS: usize = 16;

/// Heading nodes fetched when routing a query through the outline.
pub const ROUTE_TOP_NODES: usize = 32;

/// MMR relevance/diversity trade-off for node embeddings.
pub const MMR_LAMBDA: f32 = 0.7;

/// Candidate over-fetch multiplier: absorbs loss from filtering and span
/// merging before the final `top_k` cut.
pub const FETCH_MULTIPLIER: usize = 3;

/// Seconds a superseded snapshot directory is kept on disk after a swap so
/// in-flight readers can drain.
pub const SNAPSHOT_RELEASE_GRACE_SECS: u64 = 5;

/// Recent snapshots retained by cleanup.
pub const SNAPSHOT_KEEP_COUNT: usize = 3;

/// Bump when chunk boundary rules change: cached embeddings are keyed on
/// byte ranges, so a chunker change invalidates every cache entry.
pub const CHUNKER_VERSION: u32 = 1;

/// Directory names never scanned or watched.
pub const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "target", ".obsidian"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root of the Markdown vault. Required.
    pub vault_root: PathBuf,
    /// Snapshot storage root. Defaults to `<vault_root>/.msrl`.
    pub snapshot_dir: Option<PathBuf>,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub sharding: ShardingConfig,
    pub retrieval: RetrievalConfig,
    pub ann: AnnConfig,
    pub watcher: WatcherConfig,
    /// One of `debug`, `info`, `warn`, `error`. Consumed by the host when
    /// installing its tracing subscriber.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::new(),
            snapshot_dir: None,
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            sharding: ShardingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ann: AnnConfig::default(),
            watcher: WatcherConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file. `None` selects the hashing fallback.
    pub model_path: Option<PathBuf>,
    /// Path to the HF tokenizer JSON next to the model.
    pub tokenizer_path: Option<PathBuf>,
    pub max_sequence_length: usize,
    pub num_threads: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            tokenizer_path: None,
            max_sequence_length: 8192,
            num_threads: 4,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    pub target_min: usize,
    pub target_max: usize,
    pub hard_max: usize,
    pub min_preferred: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_min: 600,
            target_max: 1000,
            hard_max: 1200,
            min_preferred: 200,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardingConfig {
    pub shard_count: u32,
    pub max_shards_per_query: usize,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: SHARD_COUNT,
            max_shards_per_query: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub default_max_excerpt_chars: usize,
    pub max_max_excerpt_chars: usize,
    pub span_merge_gap_threshold: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.75,
            bm25_weight: 0.25,
            default_top_k: 8,
            max_top_k: 50,
            default_max_excerpt_chars: 4000,
            max_max_excerpt_chars: 20_000,
            span_merge_gap_threshold: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnnConfig {
    /// Per-shard indexes kept resident; cold shards load from disk.
    pub max_cached_shards: usize,
    pub ivfpq_threshold: usize,
    pub nprobe: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            max_cached_shards: 16,
            ivfpq_threshold: IVFPQ_THRESHOLD,
            nprobe: DEFAULT_NPROBE,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Resolved snapshot root (`snapshot_dir` or `<vault_root>/.msrl`).
    #[must_use]
    pub fn snapshot_root(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| self.vault_root.join(".msrl"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.vault_root.as_os_str().is_empty() {
            return Err(EngineError::invalid_argument(
                "vault_root",
                "",
                "a vault root directory is required",
            ));
        }
        let c = &self.chunking;
        if c.target_min == 0 || c.target_min > c.target_max || c.target_max > c.hard_max {
            return Err(EngineError::invalid_argument(
                "chunking",
                format!("{}/{}/{}", c.target_min, c.target_max, c.hard_max),
                "require 0 < target_min <= target_max <= hard_max",
            ));
        }
        if c.min_preferred > c.target_min {
            return Err(EngineError::invalid_argument(
                "chunking.min_preferred",
                c.min_preferred,
                "must not exceed target_min",
            ));
        }
        if self.sharding.shard_count != SHARD_COUNT {
            return Err(EngineError::invalid_argument(
                "sharding.shard_count",
                self.sharding.shard_count,
                format!("fixed at {SHARD_COUNT} in the v1 on-disk format"),
            ));
        }
        if self.sharding.max_shards_per_query == 0 {
            return Err(EngineError::invalid_argument(
                "sharding.max_shards_per_query",
                0,
                "must be >= 1",
            ));
        }
        let r = &self.retrieval;
        if (r.vector_weight + r.bm25_weight - 1.0).abs() > 1e-6 {
            return Err(EngineError::invalid_argument(
                "retrieval",
                format!("{} + {}", r.vector_weight, r.bm25_weight),
                "vector_weight and bm25_weight must sum to 1.0",
            ));
        }
        if r.default_top_k == 0 || r.default_top_k > r.max_top_k {
            return Err(EngineError::invalid_argument(
                "retrieval.default_top_k",
                r.default_top_k,
                format!("must be in [1, {}]", r.max_top_k),
            ));
        }
        if r.default_max_excerpt_chars < 200 || r.default_max_excerpt_chars > r.max_max_excerpt_chars
        {
            return Err(EngineError::invalid_argument(
                "retrieval.default_max_excerpt_chars",
                r.default_max_excerpt_chars,
                format!("must be in [200, {}]", r.max_max_excerpt_chars),
            ));
        }
        if self.ann.max_cached_shards == 0 {
            return Err(EngineError::invalid_argument(
                "ann.max_cached_shards",
                0,
                "must be >= 1",
            ));
        }
        if self.watcher.debounce_ms < 100 {
            return Err(EngineError::invalid_argument(
                "watcher.debounce_ms",
                self.watcher.debounce_ms,
                "must be >= 100",
            ));
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(EngineError::invalid_argument(
                    "log_level",
                    other,
                    "must be one of debug, info, warn, error",
                ));
            }
        }
        Ok(())
    }

    /// Apply `MSRL_*` environment overrides on top of the loaded values.
    /// Unparseable values are rejected rather than ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("MSRL_VAULT_ROOT") {
            self.vault_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MSRL_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MSRL_MODEL_PATH") {
            self.embedding.model_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MSRL_EMBEDDING_THREADS") {
            self.embedding.num_threads = parse_env("MSRL_EMBEDDING_THREADS", &v)?;
        }
        if let Ok(v) = std::env::var("MSRL_WATCHER_ENABLED") {
            self.watcher.enabled = parse_env("MSRL_WATCHER_ENABLED", &v)?;
        }
        if let Ok(v) = std::env::var("MSRL_WATCHER_DEBOUNCE_MS") {
            self.watcher.debounce_ms = parse_env("MSRL_WATCHER_DEBOUNCE_MS", &v)?;
        }
        if let Ok(v) = std::env::var("MSRL_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        EngineError::invalid_argument(name, raw, "environment override is not parseable")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EngineConfig {
        EngineConfig {
            vault_root: PathBuf::from("/vault"),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_missing_vault_root_rejected() {
        let cfg = EngineConfig::default();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut cfg = base_config();
        cfg.retrieval.vector_weight = 0.9;
        assert!(cfg.validate().is_err());
        cfg.retrieval.bm25_weight = 0.1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_chunking_bounds_ordered() {
        let mut cfg = base_config();
        cfg.chunking.target_max = cfg.chunking.hard_max + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_debounce_floor() {
        let mut cfg = base_config();
        cfg.watcher.debounce_ms = 99;
        assert!(cfg.validate().is_err());
        cfg.watcher.debounce_ms = 100;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_snapshot_root_defaults_under_vault() {
        let cfg = base_config();
        assert_eq!(cfg.snapshot_root(), PathBuf::from("/vault/.msrl"));
    }
}
