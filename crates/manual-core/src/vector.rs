//! Vector math shared by the index and the MMR selector.
//!
//! All stored and query vectors go through [`normalize`] so that the inner
//! product equals cosine similarity.

/// Guard added to the norm so the zero vector never divides by zero.
pub const NORM_EPSILON: f32 = 1e-10;

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch in dot product");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize in place. The zero vector stays zero.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v) + NORM_EPSILON;
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// L2-normalize a vector.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    normalize_in_place(&mut v);
    v
}

/// Element-wise mean of equal-length vectors, re-normalized.
///
/// Returns `None` for an empty input.
pub fn normalized_mean(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        debug_assert_eq!(v.len(), acc.len(), "dimension mismatch in mean");
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    for a in acc.iter_mut() {
        *a /= n;
    }
    Some(normalize(acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_vector_is_noop() {
        let v = vec![0.6, 0.8];
        let n = normalize(v.clone());
        for (a, b) in v.iter().zip(&n) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_twice_is_idempotent() {
        let once = normalize(vec![3.0, -4.0, 12.0]);
        let twice = normalize(once.clone());
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!((l2_norm(&once) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let n = normalize(vec![0.0, 0.0, 0.0]);
        assert!(n.iter().all(|x| x.is_finite() && *x == 0.0));
    }

    #[test]
    fn test_dot() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
    }

    #[test]
    fn test_normalized_mean() {
        let mean = normalized_mean(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((mean[0] - expected).abs() < 1e-6);
        assert!((mean[1] - expected).abs() < 1e-6);
        assert!(normalized_mean(&[]).is_none());
    }
}
