//! Deterministic providers for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use manual_core::vector::normalize;
use manual_core::{Embedder, ManualError, Reranker, Result};

/// Mock embedder for testing.
///
/// Texts registered with [`MockEmbedder::with_fixture`] map to fixed
/// vectors; anything else gets a hash-derived vector. Output is always
/// L2-normalized.
pub struct MockEmbedder {
    dimension: usize,
    fixtures: HashMap<String, Vec<f32>>,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self::with_dimension(384)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            fixtures: HashMap::new(),
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the embedding of `text`. The vector is padded or truncated to the
    /// embedder's dimension.
    pub fn with_fixture(mut self, text: impl Into<String>, vector: &[f32]) -> Self {
        let mut v = vec![0.0f32; self.dimension];
        for (slot, x) in v.iter_mut().zip(vector) {
            *slot = *x;
        }
        self.fixtures.insert(text.into(), v);
        self
    }

    /// Fail every embedding call after the first `calls` succeed.
    pub fn fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Number of embedding calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixtures.get(text) {
            return normalize(v.clone());
        }

        // Return deterministic mock embeddings based on text hash
        let hash = text
            .bytes()
            .fold(0xcbf29ce484222325u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(0x100000001b3)
            });
        let mut embedding = vec![0.0f32; self.dimension];
        for (i, v) in embedding.iter_mut().enumerate() {
            *v = ((hash.wrapping_mul(i as u64 + 1) >> 11) % 1000) as f32 / 1000.0 - 0.5;
        }
        normalize(embedding)
    }

    fn record_call(&self) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(limit) if n >= limit => Err(ManualError::embedding("mock embedder failure")),
            _ => Ok(()),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.record_call()?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.record_call()?;
        Ok(self.embed_one(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "mock-embedder"
    }
}

type ScoreFn = dyn Fn(&str, &str) -> f32 + Send + Sync;

/// Reranker driven by a scoring closure.
pub struct MockReranker {
    score: Box<ScoreFn>,
}

impl MockReranker {
    pub fn new(score: impl Fn(&str, &str) -> f32 + Send + Sync + 'static) -> Self {
        Self {
            score: Box::new(score),
        }
    }
}

#[async_trait]
impl Reranker for MockReranker {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        Ok(passages.iter().map(|p| (self.score)(query, p)).collect())
    }

    fn model_id(&self) -> &str {
        "mock-reranker"
    }
}

/// Reranker whose model never loaded. Every call fails.
pub struct UnavailableReranker {
    reason: String,
}

impl UnavailableReranker {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Reranker for UnavailableReranker {
    async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
        Err(ManualError::rerank(format!(
            "reranker unavailable: {}",
            self.reason
        )))
    }

    fn model_id(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }
}
