//! HNSW insertion: bidirectional links with heuristic neighbor pruning
//! (Algorithm 4 from the HNSW paper).

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;

impl HnswGraph {
    /// Insert a normalized vector. `internal_id` must equal the current node
    /// count; ids are insertion-ordered.
    pub fn insert(&mut self, internal_id: u32, vector: &[f32]) {
        debug_assert_eq!(internal_id, self.node_count);
        debug_assert_eq!(vector.len(), self.dimension);
        let level = self.level_for(internal_id);

        if self.entry_point.is_none() {
            self.vectors.extend_from_slice(vector);
            self.neighbors.push(vec![Vec::new(); level + 1]);
            self.layers.push(level as u8);
            self.node_count += 1;
            self.entry_point = Some(internal_id);
            self.max_layer = level;
            return;
        }

        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => return,
        };
        let top = level.min(self.max_layer);
        let mut visited = VisitedSet::new(self.node_count as usize);

        // Phase 1: greedy descent from the top layer to just above the
        // node's own level.
        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let hits = search_layer(
                self,
                vector,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, nearest)) = hits.first() {
                current = nearest;
            }
        }

        // Phase 2: collect neighbors per layer from ef_construction beams.
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut layer_eps: Vec<u32> = vec![current];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
            );
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };
            node_neighbors[layer] = self
                .select_neighbors_heuristic(&candidates, m_max)
                .into_iter()
                .map(|(_, id)| id)
                .collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        self.vectors.extend_from_slice(vector);
        self.neighbors.push(node_neighbors);
        self.layers.push(level as u8);
        self.node_count += 1;

        // Phase 3: backlinks, pruning any neighbor that runs over capacity.
        for layer in 0..=top {
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };
            let my_neighbors = self.neighbors[internal_id as usize][layer].clone();
            for neighbor_id in my_neighbors {
                let nid = neighbor_id as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let ids = self.neighbors[nid][layer].clone();
                    let base = self.vector(neighbor_id).to_vec();
                    let candidates: Vec<(f32, u32)> = ids
                        .iter()
                        .map(|&cid| (self.distance(&base, cid), cid))
                        .collect();
                    let pruned = self.select_neighbors_heuristic(&candidates, m_max);
                    self.neighbors[nid][layer] = pruned.into_iter().map(|(_, id)| id).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }
    }

    /// Diversity-preferring selection: a candidate is taken only when it is
    /// closer to the base than to every already-selected neighbor, which
    /// avoids redundant clusters of near-identical links. Remaining slots are
    /// filled with the closest leftovers.
    fn select_neighbors_heuristic(&self, candidates: &[(f32, u32)], m: usize) -> Vec<(f32, u32)> {
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
        for &(dist_to_base, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            let cid_vec = self.vector(cid);
            let diverse = selected.iter().all(|&(_, sid)| {
                let dist_to_selected = self.distance(cid_vec, sid);
                dist_to_base <= dist_to_selected
            });
            if diverse {
                selected.push((dist_to_base, cid));
            }
        }

        if selected.len() < m {
            for &(dist, cid) in &sorted {
                if selected.len() >= m {
                    break;
                }
                if !selected.iter().any(|&(_, id)| id == cid) {
                    selected.push((dist, cid));
                }
            }
        }

        selected
    }
}
