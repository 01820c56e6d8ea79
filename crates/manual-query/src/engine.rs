//! Retrieval engine: embed, retrieve, filter, diversify, rerank.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use manual_core::vector::{normalize, normalized_mean};
use manual_core::{
    Embedder, ManualError, Reranker, Result, RetrievalConfig, SearchResult,
};
use manual_store::{LoadedIndex, SearchHit};

use crate::candidates::{candidate_count, retrieve};
use crate::hierarchy::{allowed_sections, apply_section_filter, FilterOutcome};
use crate::mmr::mmr_select;
use crate::rerank::rerank;

/// Per-query selection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Number of results to return.
    pub top_k: usize,

    /// MMR relevance weight in [0, 1].
    pub mmr_lambda: f32,

    /// Floor on the candidate pool handed to MMR.
    pub mmr_candidates: usize,
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            mmr_lambda: config.mmr_lambda,
            mmr_candidates: config.mmr_candidates,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(ManualError::invalid_argument(format!(
                "mmr_lambda must be in [0, 1], got {}",
                self.mmr_lambda
            )));
        }
        Ok(())
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// Section-first scoping parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalOptions {
    pub use_hierarchical: bool,
    pub section_top_k: usize,
}

impl HierarchicalOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            use_hierarchical: config.hierarchical,
            section_top_k: config.section_top_k,
        }
    }
}

impl Default for HierarchicalOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// Exact-search retrieval engine with MMR diversification.
///
/// Holds the model providers only; the index is passed to each call so one
/// engine serves whichever generation the caller's session has loaded.
pub struct RetrievalEngine<E: ?Sized> {
    /// Embedding model.
    embedder: Arc<E>,

    /// Optional cross-encoder.
    reranker: Option<Arc<dyn Reranker>>,

    simple_oversample: usize,
    hierarchical_oversample: usize,
}

impl<E> RetrievalEngine<E>
where
    E: Embedder + ?Sized,
{
    /// Create a new engine without a reranker.
    pub fn new(embedder: Arc<E>) -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            embedder,
            reranker: None,
            simple_oversample: defaults.simple_oversample,
            hierarchical_oversample: defaults.hierarchical_oversample,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Override the oversampling factors for plain and hierarchical search.
    pub fn with_oversample(mut self, simple: usize, hierarchical: usize) -> Self {
        self.simple_oversample = simple.max(1);
        self.hierarchical_oversample = hierarchical.max(1);
        self
    }

    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// A reranker is attached and its model loaded.
    pub fn reranker_available(&self) -> bool {
        self.reranker.as_ref().is_some_and(|r| r.is_available())
    }

    /// Plain search: oversampled retrieval, MMR, optional rerank.
    pub async fn search(
        &self,
        index: &LoadedIndex,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();
        options.validate()?;
        info!("Searching for: {:?}", query);

        let query_vec = self.embed_query(index, query).await?;

        let count = candidate_count(
            options.top_k,
            self.simple_oversample,
            options.mmr_candidates,
            index.chunks.len(),
        );
        let candidates = retrieve(index, &query_vec, count)?;

        let results = self.select(index, &query_vec, &candidates, options).await?;
        let results = self.maybe_rerank(query, results).await;

        info!(
            "Search completed in {}ms, returned {} results",
            start.elapsed().as_millis(),
            results.len()
        );
        Ok(results)
    }

    /// Section-scoped search with optional hypothetical-answer enrichment.
    ///
    /// `auxiliary_query_text` is embedded and averaged into the query vector.
    /// The section filter is skipped when the index has no section level or
    /// `use_hierarchical` is off, and discarded when it would leave fewer than
    /// `max(top_k * 2, mmr_candidates)` candidates.
    pub async fn search_hierarchical(
        &self,
        index: &LoadedIndex,
        query: &str,
        options: &SearchOptions,
        auxiliary_query_text: Option<&str>,
        hierarchy: &HierarchicalOptions,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();
        options.validate()?;
        info!("Hierarchical search for: {:?}", query);

        let mut query_vec = self.embed_query(index, query).await?;
        if let Some(aux) = auxiliary_query_text.filter(|t| !t.trim().is_empty()) {
            debug!("Enriching query with auxiliary text ({} chars)", aux.len());
            let aux_vec = self.embed_query(index, aux).await?;
            query_vec = normalized_mean(&[query_vec, aux_vec])
                .ok_or_else(|| ManualError::internal("empty query vector set"))?;
        }

        let count = candidate_count(
            options.top_k,
            self.hierarchical_oversample,
            options.mmr_candidates.saturating_mul(2),
            index.chunks.len(),
        );
        let mut candidates = retrieve(index, &query_vec, count)?;

        let mut outcome = FilterOutcome::Skipped;
        if hierarchy.use_hierarchical {
            if let Some(allowed) = allowed_sections(index, &query_vec, hierarchy.section_top_k)? {
                let min_keep = options
                    .top_k
                    .saturating_mul(2)
                    .max(options.mmr_candidates);
                let (kept, o) = apply_section_filter(index, candidates, &allowed, min_keep);
                candidates = kept;
                outcome = o;
            }
        }
        debug!("Section filter: {:?}", outcome);

        let results = self.select(index, &query_vec, &candidates, options).await?;
        let results = self.maybe_rerank(query, results).await;

        info!(
            "Hierarchical search completed in {}ms, returned {} results",
            start.elapsed().as_millis(),
            results.len()
        );
        Ok(results)
    }

    /// Embed and normalize a query, checking it against the index dimension.
    async fn embed_query(&self, index: &LoadedIndex, text: &str) -> Result<Vec<f32>> {
        let v = normalize(self.embedder.embed_query(text).await?);
        if v.len() != index.dimension() {
            return Err(ManualError::DimensionMismatch {
                stored: index.dimension(),
                current: v.len(),
            });
        }
        Ok(v)
    }

    /// Run MMR over the candidate pool, re-embedding candidate texts.
    async fn select(
        &self,
        index: &LoadedIndex,
        query_vec: &[f32],
        candidates: &[SearchHit],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if candidates.is_empty() || options.top_k == 0 {
            return Ok(Vec::new());
        }

        let chunks: Vec<_> = candidates
            .iter()
            .map(|h| &index.chunk_store[h.row])
            .collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(ManualError::embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let vectors: Vec<Vec<f32>> = vectors.into_iter().map(normalize).collect();
        if let Some(v) = vectors.iter().find(|v| v.len() != query_vec.len()) {
            return Err(ManualError::DimensionMismatch {
                stored: query_vec.len(),
                current: v.len(),
            });
        }

        let relevance: Vec<f32> = candidates.iter().map(|h| h.score).collect();
        let picks = mmr_select(
            &vectors,
            &relevance,
            query_vec,
            options.top_k,
            options.mmr_lambda,
        );
        debug!("MMR picked {} of {} candidates", picks.len(), candidates.len());

        Ok(picks
            .into_iter()
            .map(|i| SearchResult::from_chunk(chunks[i], candidates[i].score))
            .collect())
    }

    /// Rerank when a reranker is configured, keeping the MMR order on failure.
    async fn maybe_rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let Some(reranker) = &self.reranker else {
            return results;
        };
        if results.is_empty() {
            return results;
        }

        match rerank(reranker.as_ref(), query, &results).await {
            Ok(reranked) => reranked,
            Err(e) => {
                warn!("Reranking failed, keeping MMR order: {}", e);
                results
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_from, with_sections};
    use manual_embed::{MockEmbedder, MockReranker, UnavailableReranker};

    fn three_chunks() -> LoadedIndex {
        index_from(&[
            ("alpha", "s1", &[1.0, 0.0]),
            ("beta", "s2", &[0.0, 1.0]),
            ("gamma", "s1", &[0.7, 0.7]),
        ])
    }

    fn embedder() -> Arc<MockEmbedder> {
        Arc::new(
            MockEmbedder::with_dimension(2)
                .with_fixture("alpha", &[1.0, 0.0])
                .with_fixture("beta", &[0.0, 1.0])
                .with_fixture("gamma", &[0.7, 0.7])
                .with_fixture("delta", &[0.2, 0.9])
                .with_fixture("query", &[1.0, 0.0])
                .with_fixture("answer", &[0.0, 1.0]),
        )
    }

    fn options(top_k: usize, mmr_lambda: f32) -> SearchOptions {
        SearchOptions {
            top_k,
            mmr_lambda,
            mmr_candidates: 24,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_pure_relevance_scenario() {
        let engine = RetrievalEngine::new(embedder());
        let results = engine
            .search(&three_chunks(), "query", &options(2, 1.0))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["alpha", "gamma"]);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!(results.iter().all(|r| r.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_pure_diversity_scenario() {
        let engine = RetrievalEngine::new(embedder());
        let results = engine
            .search(&three_chunks(), "query", &options(2, 0.0))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["alpha", "beta"]);
        // Reported scores are the raw index scores
        assert!(results[1].score.abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_result_fields_come_from_store() {
        let engine = RetrievalEngine::new(embedder());
        let results = engine
            .search(&three_chunks(), "query", &options(1, 0.5))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "alpha");
        assert_eq!(results[0].section_title, "Section s1");
        assert_eq!(results[0].page_start, 1);
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let engine = RetrievalEngine::new(embedder());
        let index = three_chunks();
        let first = engine.search(&index, "query", &options(3, 0.5)).await.unwrap();
        let second = engine.search(&index, "query", &options(3, 0.5)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_top_k_zero_is_empty() {
        let engine = RetrievalEngine::new(embedder());
        let results = engine
            .search(&three_chunks(), "query", &options(0, 0.5))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_lambda() {
        let engine = RetrievalEngine::new(embedder());
        let err = engine
            .search(&three_chunks(), "query", &options(2, 1.5))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let engine = RetrievalEngine::new(Arc::new(MockEmbedder::with_dimension(3)));
        let err = engine
            .search(&three_chunks(), "query", &options(2, 0.5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManualError::DimensionMismatch {
                stored: 2,
                current: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let engine = RetrievalEngine::new(Arc::new(MockEmbedder::with_dimension(2).fail_after(0)));
        let err = engine
            .search(&three_chunks(), "query", &options(2, 0.5))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }

    #[tokio::test]
    async fn test_reranker_reorders() {
        let reranker = MockReranker::new(|_, passage| if passage == "gamma" { 5.0 } else { 1.0 });
        let engine = RetrievalEngine::new(embedder()).with_reranker(Arc::new(reranker));
        let results = engine
            .search(&three_chunks(), "query", &options(2, 1.0))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["gamma", "alpha"]);
        assert_eq!(results[0].rerank_score, Some(5.0));
        assert_eq!(results[1].rerank_score, Some(1.0));
    }

    #[tokio::test]
    async fn test_reranker_failure_falls_back() {
        let plain = RetrievalEngine::new(embedder());
        let failing = RetrievalEngine::new(embedder())
            .with_reranker(Arc::new(UnavailableReranker::new("model missing")));
        let index = three_chunks();

        let expected = plain.search(&index, "query", &options(3, 0.5)).await.unwrap();
        let results = failing.search(&index, "query", &options(3, 0.5)).await.unwrap();
        assert_eq!(results, expected);
        assert!(results.iter().all(|r| r.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_hierarchical_filter_applied() {
        // The section index points the query at s2 even though s1's chunks
        // are closer, so an applied filter is visible in the result.
        let index = with_sections(
            index_from(&[
                ("alpha", "s1", &[1.0, 0.0]),
                ("gamma", "s1", &[0.7, 0.7]),
                ("beta", "s2", &[0.0, 1.0]),
                ("delta", "s2", &[0.2, 0.9]),
            ]),
            &[("s1", &[0.0, 1.0]), ("s2", &[1.0, 0.0])],
        );
        let engine = RetrievalEngine::new(embedder());
        let opts = SearchOptions {
            top_k: 1,
            mmr_lambda: 1.0,
            mmr_candidates: 1,
        };
        let hierarchy = HierarchicalOptions {
            use_hierarchical: true,
            section_top_k: 1,
        };

        let results = engine
            .search_hierarchical(&index, "query", &opts, None, &hierarchy)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["delta"]);

        let off = HierarchicalOptions {
            use_hierarchical: false,
            ..hierarchy
        };
        let results = engine
            .search_hierarchical(&index, "query", &opts, None, &off)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_hierarchical_fallback_uses_unfiltered_pool() {
        // Only one chunk lives in the best section; with top_k = 5 the filter
        // would leave 1 < max(10, mmr_candidates) candidates.
        let index = with_sections(
            index_from(&[
                ("alpha", "s1", &[1.0, 0.0]),
                ("beta", "s2", &[0.0, 1.0]),
                ("gamma", "s2", &[0.7, 0.7]),
                ("delta", "s2", &[0.2, 0.9]),
                ("epsilon", "s2", &[0.5, -0.5]),
                ("zeta", "s2", &[-1.0, 0.1]),
            ]),
            &[("s1", &[1.0, 0.0]), ("s2", &[0.0, 1.0])],
        );
        let engine = RetrievalEngine::new(embedder());
        let hierarchy = HierarchicalOptions {
            use_hierarchical: true,
            section_top_k: 1,
        };

        let results = engine
            .search_hierarchical(&index, "query", &options(5, 0.5), None, &hierarchy)
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, "alpha");
        assert!(results.iter().any(|r| r.section_title == "Section s2"));
    }

    #[tokio::test]
    async fn test_auxiliary_text_is_averaged_into_query() {
        let engine = RetrievalEngine::new(embedder());
        let index = three_chunks();
        let hierarchy = HierarchicalOptions::default();

        let plain = engine
            .search_hierarchical(&index, "query", &options(1, 1.0), None, &hierarchy)
            .await
            .unwrap();
        assert_eq!(ids(&plain), vec!["alpha"]);

        // mean([1, 0], [0, 1]) points at gamma
        let enriched = engine
            .search_hierarchical(&index, "query", &options(1, 1.0), Some("answer"), &hierarchy)
            .await
            .unwrap();
        assert_eq!(ids(&enriched), vec!["gamma"]);

        // Blank auxiliary text is ignored
        let blank = engine
            .search_hierarchical(&index, "query", &options(1, 1.0), Some("  "), &hierarchy)
            .await
            .unwrap();
        assert_eq!(blank, plain);
    }
}
