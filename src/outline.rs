//! Outline index: HNSW over heading-node vectors, used to route queries to
//! candidate shards.
//!
//! Every heading node with at least one descendant leaf gets a vector (see
//! [`crate::node_embedding`]) and a shard set — the shards holding its
//! descendant leaves. Routing searches the top nodes for a query and unions
//! their shard sets in rank order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ann::persist;
use crate::error::{EngineError, Result};
use crate::hnsw::{knn_search, HnswConfig, HnswGraph};

/// One heading node entering the outline.
#[derive(Debug, Clone)]
pub struct OutlineEntry {
    pub node_id: String,
    pub vector: Vec<f32>,
    pub shard_ids: BTreeSet<u32>,
}

#[derive(Debug)]
pub struct OutlineIndex {
    graph: HnswGraph,
    node_ids: Vec<String>,
    node_to_ann: HashMap<String, u32>,
    node_shards: Vec<BTreeSet<u32>>,
}

/// JSON sidecar persisted as `id_maps/outline_ids.json`.
#[derive(Debug, Serialize, Deserialize)]
struct OutlineIdMap {
    node_ids: Vec<String>,
    node_shards: BTreeMap<String, Vec<u32>>,
}

impl OutlineIndex {
    /// Build from node entries. Input order defines ANN ids; callers pass a
    /// deterministically ordered slice. HNSW needs no training.
    pub fn build(entries: &[OutlineEntry], dimension: usize) -> Result<Self> {
        let mut graph = HnswGraph::new(dimension, HnswConfig::default());
        let mut node_ids = Vec::with_capacity(entries.len());
        let mut node_to_ann = HashMap::with_capacity(entries.len());
        let mut node_shards = Vec::with_capacity(entries.len());

        for (ann_id, entry) in entries.iter().enumerate() {
            if entry.vector.len() != dimension {
                return Err(EngineError::Internal(format!(
                    "outline node {} has a {}-d vector, expected {dimension}-d",
                    entry.node_id,
                    entry.vector.len()
                )));
            }
            graph.insert(ann_id as u32, &entry.vector);
            node_to_ann.insert(entry.node_id.clone(), ann_id as u32);
            node_ids.push(entry.node_id.clone());
            node_shards.push(entry.shard_ids.clone());
        }

        Ok(Self {
            graph,
            node_ids,
            node_to_ann,
            node_shards,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.node_to_ann.contains_key(node_id)
    }

    /// Top-k nodes by similarity.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        knn_search(&self.graph, query, k)
            .into_iter()
            .filter_map(|(ann_id, score)| {
                self.node_ids
                    .get(ann_id as usize)
                    .map(|id| (id.clone(), score))
            })
            .collect()
    }

    /// Route a query: search `top_nodes` nodes, union their shard sets in
    /// rank order, deduplicate, truncate to `max_shards`.
    #[must_use]
    pub fn route(&self, query: &[f32], top_nodes: usize, max_shards: usize) -> Vec<u32> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for (ann_id, _) in knn_search(&self.graph, query, top_nodes) {
            if let Some(shards) = self.node_shards.get(ann_id as usize) {
                for &shard in shards {
                    if seen.insert(shard) {
                        out.push(shard);
                        if out.len() >= max_shards {
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn save(&self, index_path: &Path, id_map_path: &Path) -> Result<()> {
        persist::save_index(&self.graph, index_path)?;
        let id_map = OutlineIdMap {
            node_ids: self.node_ids.clone(),
            node_shards: self
                .node_ids
                .iter()
                .zip(self.node_shards.iter())
                .map(|(id, shards)| (id.clone(), shards.iter().copied().collect()))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&id_map)?;
        std::fs::write(id_map_path, json)
            .map_err(|e| EngineError::io_op(id_map_path.display().to_string(), "write", e))?;
        Ok(())
    }

    pub fn load(index_path: &Path, id_map_path: &Path) -> Result<Self> {
        let graph: HnswGraph = persist::load_index(index_path)?;
        let raw = std::fs::read(id_map_path)
            .map_err(|e| EngineError::io_op(id_map_path.display().to_string(), "read", e))?;
        let id_map: OutlineIdMap = serde_json::from_slice(&raw)?;

        if graph.len() != id_map.node_ids.len() {
            return Err(EngineError::Internal(format!(
                "outline id map lists {} nodes but graph holds {}",
                id_map.node_ids.len(),
                graph.len()
            )));
        }

        let node_shards = id_map
            .node_ids
            .iter()
            .map(|id| {
                id_map
                    .node_shards
                    .get(id)
                    .map(|v| v.iter().copied().collect())
                    .unwrap_or_default()
            })
            .collect();
        let node_to_ann = id_map
            .node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as u32))
            .collect();

        Ok(Self {
            graph,
            node_ids: id_map.node_ids,
            node_to_ann,
            node_shards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;

    fn entry(name: &str, hot: usize, dim: usize, shards: &[u32]) -> OutlineEntry {
        let mut v = vec![0.01; dim];
        v[hot] = 1.0;
        l2_normalize(&mut v);
        OutlineEntry {
            node_id: name.to_string(),
            vector: v,
            shard_ids: shards.iter().copied().collect(),
        }
    }

    #[test]
    fn test_route_rank_order_dedup_truncate() {
        let dim = 8;
        let entries = vec![
            entry("n0", 0, dim, &[3, 7]),
            entry("n1", 1, dim, &[7, 12]),
            entry("n2", 2, dim, &[9]),
        ];
        let outline = OutlineIndex::build(&entries, dim).unwrap();

        let query = &entries[0].vector;
        let routed = outline.route(query, 3, 16);
        // n0's shards come first; 7 is not repeated when n1 follows.
        assert_eq!(routed[0], 3);
        assert_eq!(routed[1], 7);
        assert!(routed.contains(&12));
        assert_eq!(routed.iter().filter(|&&s| s == 7).count(), 1);

        let truncated = outline.route(query, 3, 2);
        assert_eq!(truncated.len(), 2);
    }

    #[test]
    fn test_empty_outline_routes_nowhere() {
        let outline = OutlineIndex::build(&[], 8).unwrap();
        assert!(outline.is_empty());
        assert!(outline.route(&[1.0; 8], 10, 16).is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dim = 8;
        let entries: Vec<OutlineEntry> = (0..20)
            .map(|i| entry(&format!("node-{i}"), i % dim, dim, &[i as u32 % 5]))
            .collect();
        let outline = OutlineIndex::build(&entries, dim).unwrap();
        let ann = dir.path().join("outline.ann");
        let ids = dir.path().join("outline_ids.json");
        outline.save(&ann, &ids).unwrap();

        let loaded = OutlineIndex::load(&ann, &ids).unwrap();
        assert_eq!(loaded.len(), 20);
        assert!(loaded.contains("node-7"));
        assert_eq!(
            loaded.route(&entries[4].vector, 5, 16),
            outline.route(&entries[4].vector, 5, 16)
        );
    }
}
