//! # msrl
//!
//! Markdown-native hybrid retrieval engine. Indexes a vault of `.md` files
//! and answers semantic + lexical queries with byte-exact excerpts and
//! hierarchical provenance (doc uri, heading path, character offsets).
//!
//! The crate is the embeddable core for a host program (e.g. an MCP
//! server): no async runtime, no network surface. Queries fan out across
//! per-document shards (flat or IVFPQ leaf indexes routed through an HNSW
//! outline over heading embeddings), fuse with BM25 from a contentless FTS5
//! index, merge adjacent spans, and read excerpts back from the source
//! files. Index state lives in immutable snapshots that are staged,
//! validated, and atomically activated; incremental rebuilds reuse cached
//! embeddings for unchanged chunks.

/// Approximate-nearest-neighbor leaf indexes (flat / IVFPQ) and id maps.
pub mod ann;
/// Tuning constants and runtime configuration.
pub mod config;
/// Embedding backends and vector utilities.
pub mod embedding;
/// Engine lifecycle: queries, reindexing, watcher, status.
pub mod engine;
/// Crate-wide error type with stable codes.
pub mod error;
/// HNSW graph for the outline index.
pub mod hnsw;
/// Deterministic identity hashes and FNV-1a shard routing.
pub mod ids;
/// Markdown front end: normalization, fences, heading tree, chunking.
pub mod markdown;
/// Node vectors via MMR representative selection.
pub mod node_embedding;
/// Outline index: heading-node ANN + shard routing.
pub mod outline;
/// Query pipeline: route, search, fuse, merge, excerpt.
pub mod pipeline;
/// Vault scanning and doc-uri conversion.
pub mod scanner;
/// Search primitives: hybrid fusion, span merge, excerpts, filters.
pub mod search;
/// Snapshot lifecycle: build, validate, activate, recover.
pub mod snapshot;
/// SQLite metadata store with FTS5 and the embedding cache.
pub mod store;
/// Debounced filesystem watcher.
pub mod watcher;

pub use embedding::{Embedder, HashingEmbedder};
pub use engine::{Engine, EngineState, EngineStatus, ReindexOptions, ReindexOutcome, ReindexScope};
pub use error::{EngineError, Result};
pub use search::{QueryParams, QueryResponse, SearchFilters, SearchResult};
