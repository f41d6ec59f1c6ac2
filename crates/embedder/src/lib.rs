//! Lazy-loaded ONNX sentence embedding.
//!
//! Each model is loaded once per process (keyed by name) and cached for the
//! lifetime of the daemon: repeated calls to [`Embedder::embed`] with the
//! same `model_name` reuse the already-initialized session and tokenizer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use once_cell::sync::Lazy;
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;

#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("model directory not found for {0}: {1}")]
    ModelNotFound(String, std::io::Error),
    #[error("failed to load tokenizer for {0}: {1}")]
    TokenizerLoad(String, String),
    #[error("failed to load onnx session for {0}: {1}")]
    SessionLoad(String, ort::Error),
    #[error("tokenizer encoding failed: {0}")]
    Encode(String),
    #[error("onnx inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("model produced an empty batch of embeddings")]
    EmptyOutput,
}

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

/// Seam between the indexer and whatever produces embeddings, so the sync
/// engine can be exercised in tests with a fixed-vector stand-in instead of
/// a real ONNX model on disk.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(
        &self,
        texts: &[String],
        model_name: &str,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

static MODEL_CACHE: Lazy<Mutex<HashMap<String, Arc<LoadedModel>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Embeds batches of text with a named sentence-transformer-style ONNX
/// model, mean-pooling token embeddings and L2-normalizing the result.
pub struct Embedder {
    models_root: PathBuf,
}

impl Embedder {
    /// `models_root` must contain one subdirectory per model name, each
    /// holding `model.onnx` and `tokenizer.json`.
    #[must_use]
    pub fn new(models_root: PathBuf) -> Self {
        Self { models_root }
    }

    /// Embeds `texts` using `model_name`, processing `batch_size` inputs at
    /// a time. Returns one L2-normalized vector per input text, in order.
    pub fn embed(
        &self,
        texts: &[String],
        model_name: &str,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = batch_size.max(1);
        let model = self.get_or_load(model_name)?;

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            embeddings.extend(Self::embed_batch(&model, chunk)?);
        }
        Ok(embeddings)
    }

    fn get_or_load(&self, model_name: &str) -> Result<Arc<LoadedModel>, EmbedderError> {
        {
            let cache = self.model_cache_lock();
            if let Some(model) = cache.get(model_name) {
                return Ok(Arc::clone(model));
            }
        }

        log::info!("loading embedding model {model_name}...");

        let model_dir = self.models_root.join(model_name);
        let tokenizer_path = model_dir.join("tokenizer.json");
        let onnx_path = model_dir.join("model.onnx");

        std::fs::metadata(&model_dir)
            .map_err(|e| EmbedderError::ModelNotFound(model_name.to_string(), e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedderError::TokenizerLoad(model_name.to_string(), e.to_string()))?;

        let session = Session::builder()
            .map_err(|e| EmbedderError::SessionLoad(model_name.to_string(), e))?
            .commit_from_file(&onnx_path)
            .map_err(|e| EmbedderError::SessionLoad(model_name.to_string(), e))?;

        let loaded = Arc::new(LoadedModel {
            session: Mutex::new(session),
            tokenizer,
        });

        log::info!("embedding model {model_name} loaded");

        let mut cache = self.model_cache_lock();
        Ok(Arc::clone(cache.entry(model_name.to_string()).or_insert(loaded)))
    }

    fn model_cache_lock(&self) -> std::sync::MutexGuard<'static, HashMap<String, Arc<LoadedModel>>> {
        MODEL_CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn embed_batch(model: &LoadedModel, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let encodings = model
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedderError::Encode(e.to_string()))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch = encodings.len();

        let mut input_ids = Array2::<i64>::zeros((batch, max_len));
        let mut attention_mask = Array2::<i64>::zeros((batch, max_len));
        let mut type_ids = Array2::<i64>::zeros((batch, max_len));

        for (row, encoding) in encodings.iter().enumerate() {
            for (col, &id) in encoding.get_ids().iter().enumerate() {
                input_ids[[row, col]] = i64::from(id);
                attention_mask[[row, col]] = i64::from(encoding.get_attention_mask()[col]);
                type_ids[[row, col]] = i64::from(encoding.get_type_ids()[col]);
            }
        }

        let mut session = model
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let outputs = session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids.clone())?,
            "attention_mask" => Value::from_array(attention_mask.clone())?,
            "token_type_ids" => Value::from_array(type_ids)?,
        ]?)?;

        let (shape, data) = outputs[0].try_extract_raw_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(EmbedderError::EmptyOutput);
        }
        let hidden = dims[2];

        let mut pooled = Vec::with_capacity(batch);
        for row in 0..batch {
            let mut sums = vec![0f32; hidden];
            let mut mask_total = 0f32;
            for col in 0..max_len {
                let mask = attention_mask[[row, col]] as f32;
                if mask == 0.0 {
                    continue;
                }
                mask_total += mask;
                let base = row * max_len * hidden + col * hidden;
                for h in 0..hidden {
                    sums[h] += data[base + h] * mask;
                }
            }
            if mask_total > 0.0 {
                for v in &mut sums {
                    *v /= mask_total;
                }
            }
            normalize_l2(&mut sums);
            pooled.push(sums);
        }

        Ok(pooled)
    }
}

fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector {
            *v /= norm;
        }
    }
}

#[must_use]
pub fn model_path_for(models_root: &Path, model_name: &str) -> PathBuf {
    models_root.join(model_name)
}

impl EmbeddingBackend for Embedder {
    fn embed(
        &self,
        texts: &[String],
        model_name: &str,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Embedder::embed(self, texts, model_name, batch_size)
    }
}

/// A fixed-vector [`EmbeddingBackend`] for exercising downstream crates
/// (the indexer's cache/status/store bookkeeping) without a real ONNX
/// model on disk. Only available to dependents that opt into the
/// `test-util` feature.
#[cfg(feature = "test-util")]
pub struct FixedVectorEmbedder {
    dim: usize,
}

#[cfg(feature = "test-util")]
impl FixedVectorEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[cfg(feature = "test-util")]
impl EmbeddingBackend for FixedVectorEmbedder {
    fn embed(
        &self,
        texts: &[String],
        _model_name: &str,
        _batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|_| vec![0.1_f32; self.dim]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_l2_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_l2_leaves_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0];
        normalize_l2(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn empty_text_batch_returns_empty_embeddings() {
        let embedder = Embedder::new(PathBuf::from("/nonexistent"));
        let result = embedder.embed(&[], "any-model", 8).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn missing_model_directory_errors() {
        let embedder = Embedder::new(PathBuf::from("/nonexistent-models-root"));
        let err = embedder
            .embed(&["hello".to_string()], "missing-model", 8)
            .unwrap_err();
        assert!(matches!(err, EmbedderError::ModelNotFound(_, _)));
    }
}
