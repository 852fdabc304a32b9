//! Deterministic feature-hashing embedder.
//!
//! Maps word unigrams and character trigrams into a fixed-dimension space via
//! FNV-1a bucket hashing, then L2-normalizes. No model files, no I/O, fully
//! deterministic — the engine can index and answer queries before a real
//! model is provisioned, and tests run hermetically against it. Semantic
//! quality is what hashing gives you: surface-form overlap.

use crate::embedding::{l2_normalize, Embedder, Embedding};
use crate::error::Result;
use crate::ids::fnv1a32;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokens(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                current.extend(c.to_lowercase());
            } else if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(crate::config::EMBEDDING_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        "hashing-fallback-v1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        let tokens = Self::tokens(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            bump(&mut vector, token.as_bytes(), 1.0);
            let chars: Vec<char> = token.chars().collect();
            if chars.len() >= 3 {
                for tri in chars.windows(3) {
                    let gram: String = tri.iter().collect();
                    bump(&mut vector, gram.as_bytes(), 0.5);
                }
            }
        }

        l2_normalize(&mut vector);
        Ok(Embedding {
            vector,
            token_count: tokens.len(),
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        Self::tokens(text).len()
    }
}

fn bump(vector: &mut [f32], feature: &[u8], weight: f32) {
    let h = fnv1a32(feature) as usize % vector.len();
    // Second hash decides the sign so buckets cancel rather than pile up.
    let sign = if fnv1a32(&[feature, &[0xa5]].concat()) & 1 == 0 {
        1.0
    } else {
        -1.0
    };
    vector[h] += weight * sign;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::dot;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashingEmbedder::new(256);
        let a = e.embed("the quick brown fox").unwrap();
        let b = e.embed("the quick brown fox").unwrap();
        assert_eq!(a.vector, b.vector);
        assert!((dot(&a.vector, &a.vector) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let e = HashingEmbedder::new(1024);
        let q = e.embed("rust memory safety").unwrap();
        let near = e.embed("memory safety in rust programs").unwrap();
        let far = e.embed("banana bread recipe with walnuts").unwrap();
        assert!(dot(&q.vector, &near.vector) > dot(&q.vector, &far.vector));
    }

    #[test]
    fn test_token_count_is_exact_word_count() {
        let e = HashingEmbedder::default();
        assert_eq!(e.count_tokens("one two, three!"), 3);
        assert_eq!(e.count_tokens(""), 0);
    }

    #[test]
    fn test_empty_text_zero_vector() {
        let e = HashingEmbedder::new(64);
        let emb = e.embed("").unwrap();
        assert_eq!(emb.token_count, 0);
        assert!(emb.vector.iter().all(|&x| x == 0.0));
    }
}
