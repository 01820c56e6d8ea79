//! Core traits defining the interfaces to external model providers.

use async_trait::async_trait;

use crate::error::Result;

/// Embedding model trait.
///
/// Implementations are pure functions of their input text with a fixed
/// output dimension. Returned vectors need not be normalized; the engine
/// normalizes everything it stores or compares.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Identifier of the underlying model, recorded in index metadata.
    fn model_id(&self) -> &str;
}

/// Cross-encoder relevance scorer.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each `(query, passage)` pair. Higher is more relevant.
    ///
    /// Must return exactly one score per passage.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Whether the model actually loaded and can score.
    fn is_available(&self) -> bool {
        true
    }
}
