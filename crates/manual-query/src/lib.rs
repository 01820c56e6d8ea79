//! manual-query - Retrieval engine
//!
//! This crate turns a query into a ranked, diversified result list over a
//! loaded index: oversampled exact search, optional section-first
//! filtering, Maximal Marginal Relevance selection and cross-encoder
//! reranking.
//!
//! # Example
//!
//! ```rust,ignore
//! use manual_query::{RetrievalEngine, SearchOptions};
//! use std::sync::Arc;
//!
//! let engine = RetrievalEngine::new(Arc::new(embedder));
//! let index = session.get()?;
//! let results = engine.search(&index, "reset the clock", &SearchOptions::default()).await?;
//! ```

mod candidates;
mod engine;
mod hierarchy;
mod mmr;
mod rerank;

#[cfg(test)]
mod testing;

pub use candidates::{candidate_count, retrieve};
pub use engine::{HierarchicalOptions, RetrievalEngine, SearchOptions};
pub use hierarchy::{allowed_sections, apply_section_filter, FilterOutcome};
pub use mmr::mmr_select;
pub use rerank::rerank;

// Re-export for convenience
pub use manual_core::SearchResult;
