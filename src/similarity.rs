// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Inner-product similarity over L2-normalized vectors.
//!
//! Every vector the index stores is scaled to unit length, so the inner
//! product of two stored vectors equals their cosine similarity. Unlike a
//! distance, higher scores mean more similar.
//!
//! | Pair | Score |
//! |------|-------|
//! | identical direction | 1.0 |
//! | orthogonal | 0.0 |
//! | opposite | -1.0 |
//!
//! ```rust
//! use refvec::similarity::{inner_product, normalize};
//!
//! let mut a = vec![3.0f32, 4.0, 0.0];
//! normalize(&mut a);
//! assert!((inner_product(&a, &a) - 1.0).abs() < 1e-6);
//! ```

/// Floor applied to a vector norm before dividing by it.
///
/// A zero vector stays zero instead of turning into NaNs.
pub const NORM_EPSILON: f32 = 1e-12;

/// Inner product `Σ(a_i * b_i)`.
///
/// Debug builds panic if the slices differ in length.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    let mut dot = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
    }
    dot
}

/// Euclidean norm `sqrt(Σ(a_i²))`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length in place.
///
/// The norm is floored at [`NORM_EPSILON`].
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v).max(NORM_EPSILON);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Returns a unit-length copy of `v`.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

/// Returns `true` if every component is finite.
pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_product_unit_vectors() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert!((inner_product(&a, &a) - 1.0).abs() < 1e-6);
        assert!(inner_product(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_scales_to_unit() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_stays_zero() {
        let mut v = vec![0.0; 4];
        normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_is_finite() {
        assert!(is_finite(&[0.0, 1.0]));
        assert!(!is_finite(&[f32::NAN, 1.0]));
        assert!(!is_finite(&[f32::INFINITY]));
    }
}
