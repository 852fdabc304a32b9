//! Per-shard leaf index: adaptive structure + leaf-id maps.
//!
//! Shards below the IVFPQ threshold get an exact flat index; larger shards
//! get IVFPQ. Externally everything is addressed by leaf id; the internal
//! ANN id is the build-order index, persisted as a JSON id map next to the
//! index file (`shards/shard_NNN.ann` + `id_maps/shard_NNN_ids.json`).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ann::flat::FlatIndex;
use crate::ann::ivfpq::IvfPqIndex;
use crate::ann::persist;
use crate::error::{EngineError, Result};

#[derive(Debug, Serialize, Deserialize)]
enum LeafIndexKind {
    Flat(FlatIndex),
    IvfPq(IvfPqIndex),
}

#[derive(Debug)]
pub struct LeafShardIndex {
    kind: LeafIndexKind,
    /// ANN id → leaf id, in build order.
    leaf_ids: Vec<String>,
    leaf_to_ann: HashMap<String, u32>,
    nprobe: usize,
}

impl LeafShardIndex {
    /// Build from the shard's full `(leaf_id, vector)` set. Input order
    /// defines ANN ids, so callers pass a deterministically ordered slice.
    pub fn build(
        entries: &[(String, Vec<f32>)],
        dimension: usize,
        ivfpq_threshold: usize,
        nprobe: usize,
    ) -> Result<Self> {
        let mut leaf_ids = Vec::with_capacity(entries.len());
        let mut leaf_to_ann = HashMap::with_capacity(entries.len());
        for (ann_id, (leaf_id, vector)) in entries.iter().enumerate() {
            if vector.len() != dimension {
                return Err(EngineError::Internal(format!(
                    "leaf {leaf_id} has a {}-d vector, shard expects {dimension}-d",
                    vector.len()
                )));
            }
            if leaf_to_ann.insert(leaf_id.clone(), ann_id as u32).is_some() {
                return Err(EngineError::Internal(format!(
                    "duplicate leaf id {leaf_id} in shard build input"
                )));
            }
            leaf_ids.push(leaf_id.clone());
        }

        let kind = if entries.len() < ivfpq_threshold {
            let mut flat = FlatIndex::new(dimension);
            for (_, vector) in entries {
                flat.add(vector);
            }
            LeafIndexKind::Flat(flat)
        } else {
            let mut arena = Vec::with_capacity(entries.len() * dimension);
            for (_, vector) in entries {
                arena.extend_from_slice(vector);
            }
            LeafIndexKind::IvfPq(IvfPqIndex::build(dimension, &arena))
        };

        Ok(Self {
            kind,
            leaf_ids,
            leaf_to_ann,
            nprobe,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leaf_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaf_ids.is_empty()
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self.kind, LeafIndexKind::Flat(_))
    }

    #[must_use]
    pub fn ann_id(&self, leaf_id: &str) -> Option<u32> {
        self.leaf_to_ann.get(leaf_id).copied()
    }

    /// Leaf ids in ANN order, for persisting the id map.
    #[must_use]
    pub fn id_map(&self) -> &[String] {
        &self.leaf_ids
    }

    /// Top-k `(leaf_id, inner_product)` pairs, descending by score.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let hits = match &self.kind {
            LeafIndexKind::Flat(flat) => flat.search(query, k),
            LeafIndexKind::IvfPq(ivf) => ivf.search(query, k, self.nprobe),
        };
        hits.into_iter()
            .filter_map(|(ann_id, score)| {
                self.leaf_ids
                    .get(ann_id as usize)
                    .map(|leaf| (leaf.clone(), score))
            })
            .collect()
    }

    /// Write the index file (`.ann`, checksummed bincode) and the JSON id map.
    pub fn save(&self, index_path: &Path, id_map_path: &Path) -> Result<()> {
        persist::save_index(&self.kind, index_path)?;
        let json = serde_json::to_vec_pretty(&self.leaf_ids)?;
        std::fs::write(id_map_path, json)
            .map_err(|e| EngineError::io_op(id_map_path.display().to_string(), "write", e))?;
        Ok(())
    }

    /// Load an index file and its id map, rebuilding the reverse map.
    pub fn load(index_path: &Path, id_map_path: &Path, nprobe: usize) -> Result<Self> {
        let kind: LeafIndexKind = persist::load_index(index_path)?;
        let raw = std::fs::read(id_map_path)
            .map_err(|e| EngineError::io_op(id_map_path.display().to_string(), "read", e))?;
        let leaf_ids: Vec<String> = serde_json::from_slice(&raw)?;

        let indexed = match &kind {
            LeafIndexKind::Flat(flat) => flat.len(),
            LeafIndexKind::IvfPq(ivf) => ivf.len(),
        };
        if indexed != leaf_ids.len() {
            return Err(EngineError::Internal(format!(
                "id map {} lists {} leaves but index holds {indexed}",
                id_map_path.display(),
                leaf_ids.len()
            )));
        }

        let leaf_to_ann = leaf_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as u32))
            .collect();
        Ok(Self {
            kind,
            leaf_ids,
            leaf_to_ann,
            nprobe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;

    fn entries(n: usize, dim: usize) -> Vec<(String, Vec<f32>)> {
        (0..n)
            .map(|i| {
                let mut v: Vec<f32> = (0..dim)
                    .map(|j| ((i * 31 + j * 17) % 89) as f32 / 89.0 - 0.5)
                    .collect();
                l2_normalize(&mut v);
                (format!("leaf-{i:04}"), v)
            })
            .collect()
    }

    #[test]
    fn test_small_shard_uses_flat() {
        let idx = LeafShardIndex::build(&entries(10, 8), 8, 1000, 16).unwrap();
        assert!(idx.is_exact());
        assert_eq!(idx.len(), 10);
    }

    #[test]
    fn test_shard_at_threshold_uses_ivfpq() {
        let idx = LeafShardIndex::build(&entries(250, 32), 32, 200, 16).unwrap();
        assert!(!idx.is_exact());
        assert_eq!(idx.len(), 250);
    }

    #[test]
    fn test_search_returns_leaf_ids() {
        let data = entries(20, 8);
        let idx = LeafShardIndex::build(&data, 8, 1000, 16).unwrap();
        let hits = idx.search(&data[3].1, 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].0, "leaf-0003");
    }

    #[test]
    fn test_duplicate_leaf_id_rejected() {
        let mut data = entries(2, 4);
        data[1].0 = data[0].0.clone();
        assert!(LeafShardIndex::build(&data, 4, 1000, 16).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = entries(15, 8);
        let idx = LeafShardIndex::build(&data, 8, 1000, 16).unwrap();
        let ann = dir.path().join("shard_007.ann");
        let ids = dir.path().join("shard_007_ids.json");
        idx.save(&ann, &ids).unwrap();

        let loaded = LeafShardIndex::load(&ann, &ids, 16).unwrap();
        assert_eq!(loaded.len(), 15);
        assert_eq!(loaded.id_map(), idx.id_map());
        assert_eq!(
            loaded.search(&data[5].1, 3),
            idx.search(&data[5].1, 3),
            "loaded index answers identically"
        );
    }

    #[test]
    fn test_mismatched_id_map_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = entries(5, 4);
        let idx = LeafShardIndex::build(&data, 4, 1000, 16).unwrap();
        let ann = dir.path().join("s.ann");
        let ids = dir.path().join("s_ids.json");
        idx.save(&ann, &ids).unwrap();
        std::fs::write(&ids, serde_json::to_vec(&vec!["only-one"]).unwrap()).unwrap();
        assert!(LeafShardIndex::load(&ann, &ids, 16).is_err());
    }
}
