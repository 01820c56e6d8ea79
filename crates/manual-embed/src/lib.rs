//! manual-embed - Model providers
//!
//! ONNX Runtime implementations of the embedding and reranking traits,
//! plus deterministic mock providers.
//!
//! # Features
//!
//! - Sentence embeddings with mean pooling over the attention mask
//! - Cross-encoder relevance scores for (query, passage) pairs
//! - L2-normalized output

mod cross_encoder;
mod mock;
mod onnx;

pub use cross_encoder::OnnxReranker;
pub use mock::{MockEmbedder, MockReranker, UnavailableReranker};
pub use onnx::OnnxEmbedder;

// Re-export the provider traits for convenience
pub use manual_core::{Embedder, Reranker};
