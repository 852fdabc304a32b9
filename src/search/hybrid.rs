//! Weighted fusion of vector and BM25 candidate sets.
//!
//! `score = w_v · v + w_b · b` with both inputs in `[0, 1]`. A BM25-only
//! candidate borrows its vector score from the embedding cache when one is
//! available; a vector-only candidate takes `b = 0`. Output order is total:
//! descending score, ties ascending by leaf id.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub leaf_id: String,
    pub score: f32,
    pub vector_score: f32,
    pub bm25_score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct HybridScorer {
    vector_weight: f32,
    bm25_weight: f32,
}

impl HybridScorer {
    /// Weights must sum to 1.
    pub fn new(vector_weight: f32, bm25_weight: f32) -> Result<Self> {
        if (vector_weight + bm25_weight - 1.0).abs() > 1e-6 {
            return Err(EngineError::invalid_argument(
                "retrieval.weights",
                format!("{vector_weight} + {bm25_weight}"),
                "vector and bm25 weights must sum to 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&vector_weight) {
            return Err(EngineError::invalid_argument(
                "retrieval.vector_weight",
                vector_weight,
                "must be in [0, 1]",
            ));
        }
        Ok(Self {
            vector_weight,
            bm25_weight,
        })
    }

    /// Fuse the two candidate sets. `bm25` values carry the normalized BM25
    /// score plus the cached vector score when the embedding cache had one.
    #[must_use]
    pub fn fuse(
        &self,
        vector: &HashMap<String, f32>,
        bm25: &HashMap<String, (f32, Option<f32>)>,
    ) -> Vec<FusedCandidate> {
        let mut out: Vec<FusedCandidate> = Vec::with_capacity(vector.len() + bm25.len());

        for (leaf_id, &v_score) in vector {
            let b_score = bm25.get(leaf_id).map_or(0.0, |&(b, _)| b);
            out.push(self.candidate(leaf_id, v_score, b_score));
        }
        for (leaf_id, &(b_score, cached_v)) in bm25 {
            if vector.contains_key(leaf_id) {
                continue; // already fused above
            }
            let v_score = cached_v.unwrap_or(0.0).clamp(0.0, 1.0);
            out.push(self.candidate(leaf_id, v_score, b_score));
        }

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.leaf_id.cmp(&b.leaf_id))
        });
        out
    }

    fn candidate(&self, leaf_id: &str, vector_score: f32, bm25_score: f32) -> FusedCandidate {
        FusedCandidate {
            leaf_id: leaf_id.to_string(),
            score: self.vector_weight * vector_score + self.bm25_weight * bm25_score,
            vector_score,
            bm25_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_map(entries: &[(&str, f32)]) -> HashMap<String, f32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn bm25_map(entries: &[(&str, f32, Option<f32>)]) -> HashMap<String, (f32, Option<f32>)> {
        entries
            .iter()
            .map(|(k, b, c)| (k.to_string(), (*b, *c)))
            .collect()
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(HybridScorer::new(0.75, 0.25).is_ok());
        assert!(HybridScorer::new(0.8, 0.25).is_err());
        assert!(HybridScorer::new(1.2, -0.2).is_err());
    }

    #[test]
    fn test_reference_fusion() {
        // Vector {l1: 0.5, l2: 0.9}; BM25 {l1: 0.9, l2: 0.1}; weights (0.7, 0.3)
        // → l2 = 0.66, l1 = 0.62 → order [l2, l1].
        let scorer = HybridScorer::new(0.7, 0.3).unwrap();
        let fused = scorer.fuse(
            &vector_map(&[("l1", 0.5), ("l2", 0.9)]),
            &bm25_map(&[("l1", 0.9, None), ("l2", 0.1, None)]),
        );
        assert_eq!(fused[0].leaf_id, "l2");
        assert!((fused[0].score - 0.66).abs() < 1e-6);
        assert_eq!(fused[1].leaf_id, "l1");
        assert!((fused[1].score - 0.62).abs() < 1e-6);
    }

    #[test]
    fn test_equal_scores_break_by_leaf_id() {
        let scorer = HybridScorer::new(0.5, 0.5).unwrap();
        let fused = scorer.fuse(
            &vector_map(&[("b", 0.4), ("a", 0.4)]),
            &bm25_map(&[("b", 0.4, None), ("a", 0.4, None)]),
        );
        assert_eq!(fused[0].leaf_id, "a");
        assert_eq!(fused[1].leaf_id, "b");
    }

    #[test]
    fn test_bm25_only_uses_cached_vector_score() {
        let scorer = HybridScorer::new(0.75, 0.25).unwrap();
        let fused = scorer.fuse(
            &HashMap::new(),
            &bm25_map(&[("cached", 0.4, Some(0.8)), ("uncached", 0.4, None)]),
        );
        assert_eq!(fused[0].leaf_id, "cached");
        assert!((fused[0].score - (0.75 * 0.8 + 0.25 * 0.4)).abs() < 1e-6);
        assert!((fused[1].score - 0.25 * 0.4).abs() < 1e-6);
        assert_eq!(fused[1].vector_score, 0.0);
    }

    #[test]
    fn test_vector_only_takes_zero_bm25() {
        let scorer = HybridScorer::new(0.75, 0.25).unwrap();
        let fused = scorer.fuse(&vector_map(&[("v", 0.8)]), &HashMap::new());
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.6).abs() < 1e-6);
        assert_eq!(fused[0].bm25_score, 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let scorer = HybridScorer::new(0.75, 0.25).unwrap();
        assert!(scorer.fuse(&HashMap::new(), &HashMap::new()).is_empty());
    }
}
