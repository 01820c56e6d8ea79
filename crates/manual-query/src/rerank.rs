//! Cross-encoder reordering of a final result set.

use manual_core::{ManualError, Reranker, Result, SearchResult};

/// Score every result against `query` and return them sorted by
/// `rerank_score` descending. Equal scores keep their incoming order.
///
/// The input is left untouched so the caller can fall back to it.
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    results: &[SearchResult],
) -> Result<Vec<SearchResult>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let passages: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    let scores = reranker.score(query, &passages).await?;
    if scores.len() != results.len() {
        return Err(ManualError::rerank(format!(
            "reranker returned {} scores for {} passages",
            scores.len(),
            results.len()
        )));
    }

    let mut reranked: Vec<SearchResult> = results
        .iter()
        .zip(scores)
        .map(|(r, s)| SearchResult {
            rerank_score: Some(s),
            ..r.clone()
        })
        .collect();

    // sort_by is stable
    reranked.sort_by(|a, b| {
        let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
        let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
        b.total_cmp(&a)
    });

    Ok(reranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct LengthReranker;

    #[async_trait]
    impl Reranker for LengthReranker {
        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }

        fn model_id(&self) -> &str {
            "length"
        }
    }

    struct ShortReranker;

    #[async_trait]
    impl Reranker for ShortReranker {
        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn model_id(&self) -> &str {
            "short"
        }
    }

    fn result(id: &str, text: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            text: text.to_string(),
            section_title: String::new(),
            page_start: 1,
            page_end: 1,
            score,
            rerank_score: None,
        }
    }

    #[tokio::test]
    async fn test_rerank_sorts_descending() {
        let results = vec![
            result("a", "x", 0.9),
            result("b", "xxx", 0.8),
            result("c", "yyy", 0.7),
        ];
        let reranked = rerank(&LengthReranker, "q", &results).await.unwrap();
        let ids: Vec<&str> = reranked.iter().map(|r| r.id.as_str()).collect();
        // b and c tie; b came first
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(reranked[0].rerank_score, Some(3.0));
        // Index scores are preserved
        assert_eq!(reranked[0].score, 0.8);
    }

    #[tokio::test]
    async fn test_rerank_rejects_short_output() {
        let results = vec![result("a", "x", 0.9), result("b", "y", 0.8)];
        let err = rerank(&ShortReranker, "q", &results).await.unwrap_err();
        assert_eq!(err.error_code(), "RERANK_ERROR");
    }

    #[tokio::test]
    async fn test_rerank_empty() {
        assert!(rerank(&LengthReranker, "q", &[]).await.unwrap().is_empty());
    }
}
