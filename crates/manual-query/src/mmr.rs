//! Maximal Marginal Relevance selection.
//!
//! Greedy selection over an immutable candidate array. The first pick is the
//! candidate with the highest raw relevance; every later pick maximizes
//!
//! ```text
//! lambda * sim(v, query) + (1 - lambda) * (1 - max_sim(v, selected))
//! ```
//!
//! where similarities are inner products of unit vectors. Ties go to the
//! lowest candidate ordinal.

use manual_core::vector::dot;

/// Pick `min(top_k, candidates)` candidate ordinals in selection order.
///
/// `vectors[i]` and `relevance[i]` describe candidate `i`; `vectors` and
/// `query` are expected to be unit length.
pub fn mmr_select(
    vectors: &[Vec<f32>],
    relevance: &[f32],
    query: &[f32],
    top_k: usize,
    lambda: f32,
) -> Vec<usize> {
    let n = vectors.len().min(relevance.len());
    let picks = top_k.min(n);
    let mut order = Vec::with_capacity(picks);
    if picks == 0 {
        return order;
    }

    let mut selected = vec![false; n];
    let sim_to_query: Vec<f32> = vectors[..n].iter().map(|v| dot(v, query)).collect();
    // Highest similarity of each candidate to anything selected so far
    let mut max_sim = vec![f32::NEG_INFINITY; n];

    let first = argmax((0..n).map(|i| (i, relevance[i])));
    let Some(mut chosen) = first else {
        return order;
    };

    loop {
        selected[chosen] = true;
        order.push(chosen);
        if order.len() == picks {
            break;
        }

        for i in 0..n {
            if !selected[i] {
                let s = dot(&vectors[i], &vectors[chosen]);
                if s > max_sim[i] {
                    max_sim[i] = s;
                }
            }
        }

        let next = argmax((0..n).filter(|&i| !selected[i]).map(|i| {
            let score = lambda * sim_to_query[i] + (1.0 - lambda) * (1.0 - max_sim[i]);
            (i, score)
        }));
        match next {
            Some(i) => chosen = i,
            None => break,
        }
    }

    order
}

/// First index with the greatest score. NaN never wins.
fn argmax(scores: impl Iterator<Item = (usize, f32)>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, s) in scores {
        match best {
            None => best = Some((i, s)),
            Some((_, b)) if s > b || (b.is_nan() && !s.is_nan()) => best = Some((i, s)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use manual_core::vector::normalize;

    fn scenario() -> (Vec<Vec<f32>>, Vec<f32>, Vec<f32>) {
        let vectors: Vec<Vec<f32>> = vec![
            normalize(vec![1.0, 0.0]),
            normalize(vec![0.0, 1.0]),
            normalize(vec![0.7, 0.7]),
        ];
        let query = vec![1.0, 0.0];
        let relevance = vectors.iter().map(|v| dot(v, &query)).collect();
        (vectors, relevance, query)
    }

    #[test]
    fn test_pure_relevance() {
        let (vectors, relevance, query) = scenario();
        assert_eq!(mmr_select(&vectors, &relevance, &query, 2, 1.0), vec![0, 2]);
        assert_eq!(mmr_select(&vectors, &relevance, &query, 3, 1.0), vec![0, 2, 1]);
    }

    #[test]
    fn test_pure_diversity() {
        let (vectors, relevance, query) = scenario();
        assert_eq!(mmr_select(&vectors, &relevance, &query, 2, 0.0), vec![0, 1]);
    }

    #[test]
    fn test_first_pick_uses_raw_relevance() {
        let (vectors, _, query) = scenario();
        // Raw scores disagree with the vectors; the first pick follows the raw score.
        let relevance = vec![0.1, 0.9, 0.2];
        for lambda in [0.0, 0.5, 1.0] {
            assert_eq!(mmr_select(&vectors, &relevance, &query, 1, lambda), vec![1]);
        }
    }

    #[test]
    fn test_selection_size() {
        let (vectors, relevance, query) = scenario();
        for n in 0..=3 {
            for top_k in 0..=5 {
                let picks = mmr_select(&vectors[..n], &relevance[..n], &query, top_k, 0.5);
                assert_eq!(picks.len(), top_k.min(n));
                let mut unique = picks.clone();
                unique.sort_unstable();
                unique.dedup();
                assert_eq!(unique.len(), picks.len());
            }
        }
    }

    #[test]
    fn test_ties_break_to_lowest_ordinal() {
        let v = normalize(vec![1.0, 1.0]);
        let vectors = vec![v.clone(), v.clone(), v.clone()];
        let relevance = vec![0.5, 0.5, 0.5];
        let picks = mmr_select(&vectors, &relevance, &[1.0, 0.0], 3, 0.5);
        assert_eq!(picks, vec![0, 1, 2]);
    }

    #[test]
    fn test_argmax_skips_nan() {
        let scores = vec![(0, f32::NAN), (1, 0.2), (2, 0.2)];
        assert_eq!(argmax(scores.into_iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);
    }
}
