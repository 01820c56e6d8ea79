//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use manual_core::vector::normalize;
use manual_core::{Embedder, EmbeddingConfig, ManualError, Result};

/// Padded model inputs for a batch of encodings.
pub(crate) struct PackedBatch {
    pub batch_size: usize,
    pub max_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl PackedBatch {
    /// Pad (and truncate to `max_tokens`) a batch of encodings.
    pub(crate) fn pack(encodings: &[Encoding], max_tokens: usize) -> Self {
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(max_tokens);
        let batch_size = encodings.len();

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                token_type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        Self {
            batch_size,
            max_len,
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    /// Run a BERT-style session on this batch and hand the first output to `f`.
    pub(crate) fn run<R>(
        self,
        session: &Mutex<Session>,
        f: impl FnOnce(&ArrayViewD<'_, f32>) -> Result<R>,
    ) -> Result<R> {
        let shape = vec![self.batch_size, self.max_len];
        let input_ids = Tensor::from_array((shape.clone(), self.input_ids))
            .map_err(|e| ManualError::embedding(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask = Tensor::from_array((shape.clone(), self.attention_mask))
            .map_err(|e| ManualError::embedding(format!("Failed to create mask tensor: {}", e)))?;
        let token_type_ids = Tensor::from_array((shape, self.token_type_ids))
            .map_err(|e| ManualError::embedding(format!("Failed to create type tensor: {}", e)))?;

        let mut session = session
            .lock()
            .map_err(|e| ManualError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids
            ])
            .map_err(|e| ManualError::embedding(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| ManualError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| ManualError::embedding(format!("Failed to extract tensor: {}", e)))?;

        f(&view)
    }
}

/// Open an ONNX session with the settings every model here shares.
pub(crate) fn open_session(model_path: &Path, num_threads: usize) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    Session::builder()
        .map_err(|e| ManualError::embedding(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ManualError::embedding(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(num_threads)
        .map_err(|e| ManualError::embedding(format!("Failed to set thread count: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| ManualError::embedding(format!("Failed to load model: {}", e)))
}

/// Load a tokenizer.json file.
pub(crate) fn open_tokenizer(tokenizer_path: &Path) -> Result<Tokenizer> {
    info!("Loading tokenizer from {:?}", tokenizer_path);

    Tokenizer::from_file(tokenizer_path)
        .map_err(|e| ManualError::embedding(format!("Failed to load tokenizer: {}", e)))
}

/// ONNX-based sentence embedder (all-MiniLM-L6-v2 or compatible).
pub struct OnnxEmbedder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Arc<Tokenizer>,

    /// Embedding dimension.
    dimension: usize,

    /// Maximum token count.
    max_tokens: usize,

    /// Texts per inference call.
    batch_size: usize,

    model_id: String,
}

impl OnnxEmbedder {
    /// Create a new embedder from configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let session = open_session(&config.model_path, config.num_threads)?;
        let tokenizer = open_tokenizer(&config.tokenizer_path)?;

        info!(
            "Embedder initialized: model={}, dim={}, max_tokens={}",
            config.model_id, config.dimension, config.max_tokens
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Arc::new(tokenizer),
            dimension: config.dimension,
            max_tokens: config.max_tokens,
            batch_size: config.batch_size.max(1),
            model_id: config.model_id.clone(),
        })
    }

    /// Embed a batch of texts in inference-sized slices.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_slice(slice)?);
        }
        Ok(embeddings)
    }

    fn embed_slice(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ManualError::embedding(format!("Tokenization failed: {}", e)))?;

        let batch = PackedBatch::pack(&encodings, self.max_tokens);
        let max_len = batch.max_len;
        debug!(
            "Embedding batch: size={}, max_len={}",
            batch.batch_size, max_len
        );

        batch.run(&self.session, |view| {
            let shape_dims: Vec<usize> = view.shape().to_vec();
            debug!("Output shape: {:?}", shape_dims);

            // Handle different output shapes
            let embeddings = if shape_dims.len() == 3 {
                // (batch_size, seq_len, hidden_dim) - need mean pooling
                mean_pool(view, &encodings, max_len)
            } else if shape_dims.len() == 2 {
                // (batch_size, hidden_dim) - already pooled
                let hidden_dim = shape_dims[1];
                (0..shape_dims[0])
                    .map(|i| normalize((0..hidden_dim).map(|j| view[[i, j]]).collect()))
                    .collect()
            } else {
                return Err(ManualError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape_dims
                )));
            };

            Ok(embeddings)
        })
    }
}

/// Mean pooling over the sequence dimension with attention mask, then L2 normalization.
///
/// Works with ndarray view of shape [batch, seq, hidden]
fn mean_pool(tensor: &ArrayViewD<'_, f32>, encodings: &[Encoding], max_len: usize) -> Vec<Vec<f32>> {
    let shape = tensor.shape();
    let seq_len = shape[1];
    let hidden_dim = shape[2];

    let mut embeddings = Vec::with_capacity(encodings.len());

    for (i, encoding) in encodings.iter().enumerate() {
        let attention_mask = encoding.get_attention_mask();
        let limit = max_len.min(seq_len).min(attention_mask.len());

        let mut sum = vec![0.0f32; hidden_dim];
        let mut valid = 0usize;
        for j in 0..limit {
            if attention_mask[j] == 1 {
                valid += 1;
                for k in 0..hidden_dim {
                    sum[k] += tensor[[i, j, k]];
                }
            }
        }

        if valid == 0 {
            embeddings.push(vec![0.0; hidden_dim]);
            continue;
        }

        let mean: Vec<f32> = sum.iter().map(|s| s / valid as f32).collect();
        embeddings.push(normalize(mean));
    }

    embeddings
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        // Session runs synchronously; callers already sit on a worker
        self.embed_batch(texts)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| ManualError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_embedding_error() {
        let config = EmbeddingConfig {
            model_path: "/nonexistent/model.onnx".into(),
            tokenizer_path: "/nonexistent/tokenizer.json".into(),
            ..Default::default()
        };
        match OnnxEmbedder::new(&config) {
            Err(e) => assert_eq!(e.error_code(), "EMBEDDING_ERROR"),
            Ok(_) => panic!("loading a nonexistent model must fail"),
        }
    }
}
