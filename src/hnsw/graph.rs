//! HNSW graph structure and configuration.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::embedding::dot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Bidirectional links per node above layer 0.
    pub m: usize,
    /// Links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search.
    pub ef_search: usize,
    pub max_layers: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::OUTLINE_HNSW_M,
            m_max0: config::OUTLINE_HNSW_M * 2,
            ef_construction: config::OUTLINE_HNSW_EF_CONSTRUCTION,
            ef_search: config::OUTLINE_HNSW_EF_SEARCH,
            max_layers: config::OUTLINE_HNSW_MAX_LAYERS,
        }
    }
}

/// Struct-of-arrays graph: vectors in one contiguous f32 arena, neighbor
/// lists indexed `[node][layer]`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    pub config: HnswConfig,
    pub dimension: usize,
    pub vectors: Vec<f32>,
    pub neighbors: Vec<Vec<Vec<u32>>>,
    pub layers: Vec<u8>,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    pub node_count: u32,
}

impl HnswGraph {
    #[must_use]
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        Self {
            config,
            dimension,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            entry_point: None,
            max_layer: 0,
            node_count: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.node_count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    #[inline]
    #[must_use]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Cosine distance between the query and a stored node (vectors are
    /// normalized, so this is `1 - dot`).
    #[inline]
    #[must_use]
    pub fn distance(&self, query: &[f32], id: u32) -> f32 {
        1.0 - dot(query, self.vector(id))
    }

    /// Layer for the node inserted at `index`. Uses the exponential layer
    /// distribution from the HNSW paper, driven by a splitmix64 of the
    /// insertion index so identical builds produce identical graphs.
    #[must_use]
    pub fn level_for(&self, index: u32) -> usize {
        let mixed = splitmix64(u64::from(index).wrapping_add(0x9e37_79b9_7f4a_7c15));
        let unit = (mixed >> 11) as f64 / (1u64 << 53) as f64;
        // Guard against ln(0).
        let unit = unit.max(f64::MIN_POSITIVE);
        let ml = 1.0 / (self.config.m as f64).ln();
        let level = (-unit.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_graph() {
        let g = HnswGraph::new(8, HnswConfig::default());
        assert!(g.is_empty());
        assert!(g.entry_point.is_none());
        assert_eq!(g.config.m_max0, g.config.m * 2);
    }

    #[test]
    fn test_level_deterministic_and_bounded() {
        let g = HnswGraph::new(8, HnswConfig::default());
        for i in 0..1000u32 {
            let level = g.level_for(i);
            assert!(level < g.config.max_layers);
            assert_eq!(level, g.level_for(i));
        }
        // The distribution is exponential: level 0 dominates.
        let zeros = (0..1000u32).filter(|&i| g.level_for(i) == 0).count();
        assert!(zeros > 500, "expected mostly level 0, got {zeros}");
    }

    #[test]
    fn test_distance_of_identical_vector_is_zero() {
        let mut g = HnswGraph::new(3, HnswConfig::default());
        g.vectors.extend_from_slice(&[0.6, 0.8, 0.0]);
        g.node_count = 1;
        let d = g.distance(&[0.6, 0.8, 0.0], 0);
        assert!(d.abs() < 1e-6);
    }
}
