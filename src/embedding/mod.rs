//! Embedding provider abstraction and vector utilities.
//!
//! The engine talks to embedding backends through the [`Embedder`] trait:
//! - [`HashingEmbedder`] — deterministic feature-hashing vectors; always
//!   available, used before a model is provisioned and in tests.
//! - `OnnxEmbedder` (feature `local-onnx`) — local transformer inference via
//!   tract-onnx and the HF tokenizers crate.
//!
//! All vectors are L2-normalized 1024-d `f32`, so cosine similarity equals
//! the dot product. BLOB codecs here define the on-disk embedding format:
//! little-endian `f32`, 4096 bytes per vector.

mod hashing;
#[cfg(feature = "local-onnx")]
mod onnx;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-onnx")]
pub use onnx::OnnxEmbedder;

use crate::error::Result;

/// One embedded text: the normalized vector plus the token count the
/// tokenizer saw (pre-truncation).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: usize,
}

/// Contract every embedding backend implements.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in snapshot manifests.
    fn model_id(&self) -> &str;

    /// Vector dimensionality (1024 for the v1 format).
    fn dimension(&self) -> usize;

    /// Embed one text. The returned vector is L2-normalized.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch. Must be numerically equal to sequential [`Embedder::embed`]
    /// within floating-point tolerance.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Exact token count when a tokenizer is loaded, otherwise the `⌈len/4⌉`
    /// approximation. Used to bootstrap chunking before the model is ready.
    fn count_tokens(&self, text: &str) -> usize {
        approx_token_count(text)
    }
}

/// `⌈len/4⌉` token approximation for tokenizer-less operation.
#[must_use]
pub fn approx_token_count(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a vector as a little-endian f32 BLOB (4 bytes per component).
#[must_use]
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 BLOB back into a vector.
#[must_use]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Dot product; equals cosine similarity for normalized inputs.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
