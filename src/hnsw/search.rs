//! HNSW search: single-layer beam search and multi-layer KNN.

use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;

/// A traversal candidate: max-heap on negated distance gives closest-first.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry: max-heap on distance keeps the worst on top for pruning.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search one layer: the `ef` closest nodes to `query`, ascending by
/// distance. `visited` is cleared on entry and reused across layers.
pub fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = graph.distance(query, ep);
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            results.push(ResultEntry {
                distance: OrderedFloat(dist),
                id: ep,
            });
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst {
            break;
        }
        let node = candidate.id as usize;
        if layer >= graph.neighbors[node].len() {
            continue;
        }
        for &neighbor in &graph.neighbors[node][layer] {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = graph.distance(query, neighbor);
            if results.len() < ef || dist < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: neighbor,
                });
                if results.len() > ef {
                    results.pop();
                }
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Multi-layer KNN. Returns `(id, similarity)` descending — similarity is
/// the inner product, i.e. `1 - distance` for normalized vectors.
#[must_use]
pub fn knn_search(graph: &HnswGraph, query: &[f32], k: usize) -> Vec<(u32, f32)> {
    let Some(entry_point) = graph.entry_point else {
        return Vec::new();
    };

    let mut visited = VisitedSet::new(graph.node_count as usize);
    let mut current = entry_point;

    for layer in (1..=graph.max_layer).rev() {
        let hits = search_layer(
            graph,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            &mut visited,
        );
        if let Some(&(_, nearest)) = hits.first() {
            current = nearest;
        }
    }

    let ef = graph.config.ef_search.max(k);
    let mut hits = search_layer(
        graph,
        query,
        std::slice::from_ref(&current),
        ef,
        0,
        &mut visited,
    );
    hits.truncate(k);
    hits.into_iter().map(|(dist, id)| (id, 1.0 - dist)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;
    use crate::hnsw::graph::HnswConfig;

    fn build_graph(n: usize, dim: usize) -> (HnswGraph, Vec<Vec<f32>>) {
        let mut graph = HnswGraph::new(dim, HnswConfig::default());
        let mut raw = Vec::new();
        for i in 0..n {
            let mut v: Vec<f32> = (0..dim)
                .map(|j| ((i * 13 + j * 7) % 23) as f32 / 23.0 - 0.5)
                .collect();
            l2_normalize(&mut v);
            graph.insert(i as u32, &v);
            raw.push(v);
        }
        (graph, raw)
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let graph = HnswGraph::new(4, HnswConfig::default());
        assert!(knn_search(&graph, &[1.0, 0.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_finds_exact_match_first() {
        let (graph, raw) = build_graph(200, 8);
        for probe in [0usize, 57, 199] {
            let hits = knn_search(&graph, &raw[probe], 5);
            assert!(!hits.is_empty());
            assert_eq!(hits[0].0, probe as u32, "probe {probe}");
            assert!((hits[0].1 - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_similarity_descending() {
        let (graph, raw) = build_graph(100, 8);
        let hits = knn_search(&graph, &raw[10], 10);
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_k_truncation() {
        let (graph, raw) = build_graph(50, 8);
        assert_eq!(knn_search(&graph, &raw[0], 7).len(), 7);
    }
}
