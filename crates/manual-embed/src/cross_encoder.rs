//! ONNX cross-encoder used to rerank final results.

use std::sync::Mutex;

use async_trait::async_trait;
use ort::session::Session;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use manual_core::{ManualError, RerankConfig, Reranker, Result};

use crate::onnx::{open_session, open_tokenizer, PackedBatch};

/// Scores `(query, passage)` pairs with a sequence-classification model
/// such as ms-marco-MiniLM-L-6-v2. The first logit of each row is the score.
pub struct OnnxReranker {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_tokens: usize,
    model_id: String,
}

impl OnnxReranker {
    pub fn new(config: &RerankConfig, num_threads: usize) -> Result<Self> {
        let session = open_session(&config.model_path, num_threads)?;
        let tokenizer = open_tokenizer(&config.tokenizer_path)?;

        info!("Reranker initialized: model={}", config.model_id);

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_tokens: config.max_tokens,
            model_id: config.model_id.clone(),
        })
    }

    fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, *p)).collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| ManualError::rerank(format!("Tokenization failed: {}", e)))?;

        let batch = PackedBatch::pack(&encodings, self.max_tokens);
        debug!("Reranking {} passages", batch.batch_size);

        let expected = passages.len();
        batch
            .run(&self.session, |view| {
                let shape = view.shape();
                if shape.is_empty() || shape[0] != expected {
                    return Err(ManualError::rerank(format!(
                        "Unexpected logits shape: {:?}",
                        shape
                    )));
                }
                let scores = match shape.len() {
                    1 => (0..expected).map(|i| view[[i]]).collect(),
                    2 => (0..expected).map(|i| view[[i, 0]]).collect(),
                    _ => {
                        return Err(ManualError::rerank(format!(
                            "Unexpected logits shape: {:?}",
                            shape
                        )))
                    }
                };
                Ok(scores)
            })
            // Inference errors surface as rerank failures
            .map_err(|e| match e {
                ManualError::Embedding { message } => ManualError::rerank(message),
                other => other,
            })
    }
}

#[async_trait]
impl Reranker for OnnxReranker {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        self.score_pairs(query, passages)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_fails() {
        let config = RerankConfig {
            model_path: "/nonexistent/reranker.onnx".into(),
            tokenizer_path: "/nonexistent/tokenizer.json".into(),
            ..Default::default()
        };
        assert!(OnnxReranker::new(&config, 1).is_err());
    }
}
