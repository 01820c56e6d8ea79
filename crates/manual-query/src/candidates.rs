//! Oversampled candidate retrieval from the chunk index.

use tracing::debug;

use manual_core::Result;
use manual_store::{LoadedIndex, SearchHit};

/// Number of candidates to request: `max(top_k * oversample, floor)`,
/// clamped to the index size.
pub fn candidate_count(top_k: usize, oversample: usize, floor: usize, total: usize) -> usize {
    top_k.saturating_mul(oversample).max(floor).min(total)
}

/// Raw top-`count` chunk hits for a normalized query vector.
///
/// Hits whose row has no record in the chunk store are dropped.
pub fn retrieve(index: &LoadedIndex, query: &[f32], count: usize) -> Result<Vec<SearchHit>> {
    let hits = index.chunks.search(query, count)?;
    let rows = index.chunk_store.len();
    let hits: Vec<SearchHit> = hits.into_iter().filter(|h| h.row < rows).collect();
    debug!("Retrieved {} candidates (requested {})", hits.len(), count);
    Ok(hits)
}
