//! Node vectors from descendant leaf vectors via MMR selection.
//!
//! A pure centroid dilutes large sections into mush; picking a few diverse
//! representatives keeps the distinct sub-topics that make a section
//! routable. Selection count adapts to section size: `clamp(⌈n/5⌉, 2, 5)`
//! representatives, all leaves when the section is small.

use crate::config::MMR_LAMBDA;
use crate::embedding::{dot, l2_normalize};

/// Compute the node vector: normalized mean of the MMR-selected
/// representatives among `leaf_vectors`. Returns `None` when no leaves.
#[must_use]
pub fn node_vector(leaf_vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let n = leaf_vectors.len();
    if n == 0 {
        return None;
    }
    let dim = leaf_vectors[0].len();

    if n == 1 {
        let mut v = leaf_vectors[0].to_vec();
        l2_normalize(&mut v);
        return Some(v);
    }

    let k = select_count(n);
    let picks = if n <= k {
        (0..n).collect()
    } else {
        mmr_select(leaf_vectors, k)
    };

    let mut mean = vec![0.0f32; dim];
    for &i in &picks {
        for (d, &x) in leaf_vectors[i].iter().enumerate() {
            mean[d] += x;
        }
    }
    let inv = 1.0 / picks.len() as f32;
    for x in &mut mean {
        *x *= inv;
    }
    l2_normalize(&mut mean);
    Some(mean)
}

/// Representatives for `n` leaves: `clamp(⌈n/5⌉, 2, 5)`.
#[must_use]
pub fn select_count(n: usize) -> usize {
    if n == 1 {
        return 1;
    }
    n.div_ceil(5).clamp(2, 5)
}

/// MMR with λ = 0.7: seed with the leaf closest to the centroid, then
/// repeatedly take `argmax λ·sim(v, centroid) − (1−λ)·max_selected sim(v, s)`.
/// Ties break on the lower index so selection is deterministic.
fn mmr_select(leaf_vectors: &[&[f32]], k: usize) -> Vec<usize> {
    let n = leaf_vectors.len();
    let dim = leaf_vectors[0].len();

    let mut centroid = vec![0.0f32; dim];
    for v in leaf_vectors {
        for (d, &x) in v.iter().enumerate() {
            centroid[d] += x;
        }
    }
    let inv = 1.0 / n as f32;
    for x in &mut centroid {
        *x *= inv;
    }
    l2_normalize(&mut centroid);

    let relevance: Vec<f32> = leaf_vectors.iter().map(|v| dot(v, &centroid)).collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let seed = argmax(&relevance);
    selected.push(seed);

    while selected.len() < k {
        let mut best_idx = None;
        let mut best_score = f32::MIN;
        for i in 0..n {
            if selected.contains(&i) {
                continue;
            }
            let max_sim_selected = selected
                .iter()
                .map(|&j| dot(leaf_vectors[i], leaf_vectors[j]))
                .fold(f32::MIN, f32::max);
            let score = MMR_LAMBDA * relevance[i] - (1.0 - MMR_LAMBDA) * max_sim_selected;
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }
        match best_idx {
            Some(i) => selected.push(i),
            None => break,
        }
    }
    selected
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::MIN;
    for (i, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_select_count_schedule() {
        assert_eq!(select_count(1), 1);
        assert_eq!(select_count(2), 2);
        assert_eq!(select_count(5), 2);
        assert_eq!(select_count(10), 2);
        assert_eq!(select_count(15), 3);
        assert_eq!(select_count(25), 5);
        assert_eq!(select_count(1000), 5);
    }

    #[test]
    fn test_no_leaves_no_vector() {
        assert!(node_vector(&[]).is_none());
    }

    #[test]
    fn test_single_leaf_is_its_own_vector() {
        let v = unit(4, 2);
        let nv = node_vector(&[&v]).unwrap();
        assert!((dot(&nv, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_node_vector_is_normalized() {
        let a = unit(8, 0);
        let b = unit(8, 1);
        let c = unit(8, 2);
        let nv = node_vector(&[&a, &b, &c]).unwrap();
        assert!((dot(&nv, &nv) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mmr_prefers_diverse_representatives() {
        // Ten near-identical vectors on axis 0 plus one outlier on axis 1.
        // The second pick should be the outlier, not another clone.
        let dim = 4;
        let mut vectors: Vec<Vec<f32>> = (0..10)
            .map(|i| {
                let mut v = unit(dim, 0);
                v[3] = 0.001 * i as f32;
                l2_normalize(&mut v);
                v
            })
            .collect();
        vectors.push(unit(dim, 1));
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let picks = mmr_select(&refs, 2);
        assert_eq!(picks.len(), 2);
        assert!(picks.contains(&10), "outlier not selected: {picks:?}");
    }

    #[test]
    fn test_deterministic() {
        let vectors: Vec<Vec<f32>> = (0..12).map(|i| unit(16, i % 16)).collect();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        assert_eq!(node_vector(&refs), node_vector(&refs));
    }
}
