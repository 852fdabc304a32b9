//! Brute-force inner-product index.
//!
//! Exact search for shards below the IVFPQ threshold. Vectors live in one
//! contiguous f32 arena; search scans every vector and keeps the top k with
//! a bounded min-heap. Scores are inner products, which equal cosine
//! similarity for the normalized vectors this engine stores.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::embedding::dot;

#[derive(Debug, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    // Contiguous arena: vector i occupies [i*dimension, (i+1)*dimension).
    vectors: Vec<f32>,
    count: u32,
}

impl FlatIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append a vector; its ANN id is the insertion index.
    pub fn add(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        self.vectors.extend_from_slice(vector);
        self.count += 1;
    }

    #[must_use]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Top-k by inner product, descending; ties break ascending by ANN id.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if k == 0 || self.count == 0 {
            return Vec::new();
        }
        // Min-heap of size k over (score, Reverse(id)): equal scores keep the
        // smaller id, making results deterministic.
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<u32>)>> =
            BinaryHeap::with_capacity(k + 1);
        for id in 0..self.count {
            let score = dot(query, self.vector(id));
            heap.push(Reverse((OrderedFloat(score), Reverse(id))));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut results: Vec<(u32, f32)> = heap
            .into_iter()
            .map(|Reverse((score, Reverse(id)))| (id, score.0))
            .collect();
        results.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results
    }
}
