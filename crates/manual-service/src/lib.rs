//! manual-service - Retrieval backend façade
//!
//! This crate ties the pieces together: it owns the index session, runs
//! single-flight rebuilds with progress reporting and serves searches.
//!
//! # Operations
//!
//! - `build_index` - Rebuild the index from the ingestion output
//! - `start_build` - Rebuild on a background task
//! - `search` - MMR search over the chunk index
//! - `search_hierarchical` - Section-scoped search with query enrichment
//! - `stats` - Counts and settings of the live index

mod indexer;
mod service;

pub use indexer::{progress_for, Indexer};
pub use service::ManualService;

// Re-export for convenience
pub use manual_query::{HierarchicalOptions, SearchOptions};
