//! Markdown front end: normalization, fence detection, heading tree, chunking.

/// Fenced code region detection with binary-search membership.
pub mod fence;

/// Heading-aware chunker producing byte-exact leaf chunks.
pub mod chunker;

/// Text normalization and ATX heading tree construction.
pub mod parser;

pub use chunker::{chunk_node, Chunk};
pub use fence::{detect_fences, FenceMap, FenceRegion};
pub use parser::{normalize, parse_heading_tree, HeadingNode, HeadingTree};
