//! Hierarchical Navigable Small World graph over heading-node vectors.
//!
//! The outline index holds thousands of nodes, not millions, so the graph
//! stores raw f32 vectors in a contiguous arena and skips quantization.
//! Layer assignment is derived from the insertion index instead of ambient
//! randomness: two builds over the same input produce the same graph.

/// Graph structure and configuration.
pub mod graph;
/// Insertion with bidirectional links and heuristic neighbor pruning.
pub mod insert;
/// Layer search and multi-layer KNN.
pub mod search;
/// Generation-based visited set.
pub mod visited;

pub use graph::{HnswConfig, HnswGraph};
pub use search::knn_search;
