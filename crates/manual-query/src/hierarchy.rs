//! Section-first scoping of chunk candidates.

use std::collections::HashSet;

use tracing::debug;

use manual_core::Result;
use manual_store::{LoadedIndex, SearchHit};

/// What the section filter did to a candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// No section index, or hierarchical mode off.
    Skipped,
    /// Candidates narrowed to the allowed sections.
    Applied { kept: usize },
    /// Too few candidates survived; the unfiltered pool was kept.
    FellBack { kept: usize },
}

/// Ids of the `section_top_k` sections closest to `query`.
///
/// `None` when the index has no section level or no section matched.
pub fn allowed_sections(
    index: &LoadedIndex,
    query: &[f32],
    section_top_k: usize,
) -> Result<Option<HashSet<String>>> {
    let Some(sections) = &index.sections else {
        return Ok(None);
    };

    let hits = sections.index.search(query, section_top_k)?;
    let allowed: HashSet<String> = hits
        .iter()
        .filter_map(|h| sections.store.get(h.row))
        .filter(|s| !s.id.is_empty())
        .map(|s| s.id.clone())
        .collect();

    if allowed.is_empty() {
        return Ok(None);
    }
    debug!("Allowed sections: {:?}", allowed);
    Ok(Some(allowed))
}

/// Keep candidates whose chunk belongs to an allowed section, unless that
/// leaves fewer than `min_keep`, in which case the pool is returned as is.
pub fn apply_section_filter(
    index: &LoadedIndex,
    candidates: Vec<SearchHit>,
    allowed: &HashSet<String>,
    min_keep: usize,
) -> (Vec<SearchHit>, FilterOutcome) {
    let filtered: Vec<SearchHit> = candidates
        .iter()
        .filter(|h| {
            index
                .chunk_store
                .get(h.row)
                .is_some_and(|c| allowed.contains(&c.section_id))
        })
        .copied()
        .collect();

    if filtered.len() >= min_keep {
        let kept = filtered.len();
        (filtered, FilterOutcome::Applied { kept })
    } else {
        debug!(
            "Section filter kept {} of {} candidates (< {}), using unfiltered pool",
            filtered.len(),
            candidates.len(),
            min_keep
        );
        let kept = candidates.len();
        (candidates, FilterOutcome::FellBack { kept })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_from, with_sections};

    fn hits(rows: &[usize]) -> Vec<SearchHit> {
        rows.iter()
            .map(|&row| SearchHit { row, score: 0.0 })
            .collect()
    }

    #[test]
    fn test_allowed_sections_without_section_index() {
        let index = index_from(&[("a", "s1", &[1.0, 0.0])]);
        assert!(allowed_sections(&index, &[1.0, 0.0], 3).unwrap().is_none());
    }

    #[test]
    fn test_allowed_sections_top_k() {
        let index = with_sections(
            index_from(&[("a", "s1", &[1.0, 0.0])]),
            &[("s1", &[1.0, 0.0]), ("s2", &[0.0, 1.0]), ("s3", &[0.6, 0.8])],
        );
        let allowed = allowed_sections(&index, &[1.0, 0.0], 2).unwrap().unwrap();
        assert_eq!(allowed.len(), 2);
        assert!(allowed.contains("s1"));
        assert!(allowed.contains("s3"));
    }

    #[test]
    fn test_filter_applied() {
        let index = index_from(&[
            ("a", "s1", &[1.0, 0.0]),
            ("b", "s2", &[0.0, 1.0]),
            ("c", "s1", &[0.7, 0.7]),
        ]);
        let allowed: HashSet<String> = ["s1".to_string()].into();
        let (kept, outcome) = apply_section_filter(&index, hits(&[0, 2, 1]), &allowed, 2);
        assert_eq!(outcome, FilterOutcome::Applied { kept: 2 });
        assert_eq!(kept.iter().map(|h| h.row).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_filter_falls_back_when_over_pruned() {
        let index = index_from(&[
            ("a", "s1", &[1.0, 0.0]),
            ("b", "s2", &[0.0, 1.0]),
            ("c", "s2", &[0.7, 0.7]),
        ]);
        let allowed: HashSet<String> = ["s1".to_string()].into();
        let (kept, outcome) = apply_section_filter(&index, hits(&[0, 2, 1]), &allowed, 10);
        assert_eq!(outcome, FilterOutcome::FellBack { kept: 3 });
        assert_eq!(kept.iter().map(|h| h.row).collect::<Vec<_>>(), vec![0, 2, 1]);
    }
}
