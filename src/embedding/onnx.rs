//! Local transformer embedding via tract-onnx and HF tokenizers.
//!
//! Loads the model and tokenizer once from configured paths (downloading is
//! the host's bootstrap concern), runs batched inference with attention-mask
//! mean pooling, and L2-normalizes the output. Inputs are truncated at the
//! configured maximum sequence length.

use std::path::Path;

use tract_onnx::prelude::*;

use crate::config::EmbeddingConfig;
use crate::embedding::{approx_token_count, l2_normalize, Embedder, Embedding};
use crate::error::{EngineError, Result};

pub struct OnnxEmbedder {
    model_id: String,
    dimension: usize,
    max_sequence_length: usize,
    batch_size: usize,
    tokenizer: tokenizers::Tokenizer,
    model: TypedRunnableModel<TypedModel>,
}

impl OnnxEmbedder {
    /// Load model + tokenizer from the configured paths. Missing files
    /// surface as `MODEL_DOWNLOAD_FAILED` so hosts can run their bootstrap.
    pub fn load(config: &EmbeddingConfig, dimension: usize) -> Result<Self> {
        let model_path = config.model_path.as_deref().ok_or_else(|| {
            EngineError::invalid_argument("embedding.model_path", "", "required for the onnx backend")
        })?;
        let tokenizer_path = config.tokenizer_path.as_deref().ok_or_else(|| {
            EngineError::invalid_argument(
                "embedding.tokenizer_path",
                "",
                "required for the onnx backend",
            )
        })?;
        ensure_present(model_path)?;
        ensure_present(tokenizer_path)?;

        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EngineError::Internal(format!("load tokenizer: {e}")))?;

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| EngineError::Internal(format!("load onnx model: {e}")))?
            .into_optimized()
            .map_err(|e| EngineError::Internal(format!("optimize onnx model: {e}")))?
            .into_runnable()
            .map_err(|e| EngineError::Internal(format!("build runnable model: {e}")))?;

        let model_id = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx-model".to_string());

        tracing::info!(model = %model_id, dimension, "loaded local embedding model");

        Ok(Self {
            model_id,
            dimension,
            max_sequence_length: config.max_sequence_length,
            batch_size: config.batch_size.max(1),
            tokenizer,
            model,
        })
    }

    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let encodings: Vec<tokenizers::Encoding> = texts
            .iter()
            .map(|t| {
                self.tokenizer
                    .encode(*t, true)
                    .map_err(|e| EngineError::Internal(format!("tokenize: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let token_counts: Vec<usize> = encodings.iter().map(|e| e.get_ids().len()).collect();
        let max_len = token_counts
            .iter()
            .copied()
            .max()
            .unwrap_or(1)
            .clamp(1, self.max_sequence_length);

        let n = encodings.len();
        let mut input_ids = vec![0i64; n * max_len];
        let mut attention_mask = vec![0i64; n * max_len];
        for (i, enc) in encodings.iter().enumerate() {
            let ids = enc.get_ids();
            let len = ids.len().min(max_len);
            for (j, &id) in ids.iter().take(len).enumerate() {
                input_ids[i * max_len + j] = i64::from(id);
                attention_mask[i * max_len + j] = 1;
            }
        }

        let ids_tensor: Tensor = ndarray::Array2::from_shape_vec((n, max_len), input_ids)
            .map_err(|e| EngineError::Internal(format!("input ids shape: {e}")))?
            .into();
        let mask_tensor: Tensor = ndarray::Array2::from_shape_vec((n, max_len), attention_mask)
            .map_err(|e| EngineError::Internal(format!("attention mask shape: {e}")))?
            .into();

        let outputs = self
            .model
            .run(tvec!(ids_tensor.into(), mask_tensor.into()))
            .map_err(|e| EngineError::Internal(format!("onnx inference: {e}")))?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal("model produced no output tensor".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| EngineError::Internal(format!("output tensor view: {e}")))?;

        let shape = view.shape().to_vec();
        let mut result = Vec::with_capacity(n);
        if shape.len() == 2 {
            // [batch, dim]: the model pools internally.
            for i in 0..shape[0] {
                let mut vec: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                self.check_dim(vec.len())?;
                l2_normalize(&mut vec);
                result.push(Embedding {
                    vector: vec,
                    token_count: token_counts[i],
                });
            }
        } else if shape.len() == 3 {
            // [batch, seq, dim]: attention-mask mean pooling.
            let seq_len = shape[1];
            self.check_dim(shape[2])?;
            for (i, enc) in encodings.iter().enumerate() {
                let valid = enc.get_ids().len().min(seq_len).min(max_len);
                let mut sum = vec![0f32; self.dimension];
                for j in 0..valid {
                    for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().enumerate() {
                        sum[k] += v;
                    }
                }
                if valid > 0 {
                    let inv = 1.0 / valid as f32;
                    for x in &mut sum {
                        *x *= inv;
                    }
                }
                l2_normalize(&mut sum);
                result.push(Embedding {
                    vector: sum,
                    token_count: token_counts[i],
                });
            }
        } else {
            return Err(EngineError::Internal(format!(
                "unexpected model output shape: {shape:?}"
            )));
        }
        Ok(result)
    }

    fn check_dim(&self, got: usize) -> Result<()> {
        if got != self.dimension {
            return Err(EngineError::Internal(format!(
                "model emits {got}-d vectors, engine expects {}-d",
                self.dimension
            )));
        }
        Ok(())
    }
}

fn ensure_present(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EngineError::ModelDownloadFailed {
            url: path.display().to_string(),
            reason: "file not found; run the host model bootstrap".to_string(),
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self.run_batch(&[text])?;
        out.pop()
            .ok_or_else(|| EngineError::Internal("empty embedding batch result".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all.extend(self.run_batch(chunk)?);
        }
        Ok(all)
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer
            .encode(text, true)
            .map(|e| e.get_ids().len())
            .unwrap_or_else(|_| approx_token_count(text))
    }
}
