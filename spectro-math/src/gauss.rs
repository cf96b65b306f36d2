//! Standard normal helpers for pixel-integrated Gaussian profiles.
//!
//! `erf` and `erfc` come from `libm`. Bins that lie entirely on one side of
//! zero are differenced through `erfc` of the absolute edges, so tail bins keep
//! their relative precision instead of cancelling against 1.

use libm::{erf, erfc};
use ndarray::{Array1, ArrayView1, Zip};
use std::f64::consts::SQRT_2;

/// `1 / sqrt(2π)`, the peak of the standard normal density
pub const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Standard normal probability density at `x`.
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() * INV_SQRT_2PI
}

/// Standard normal cumulative distribution at `x`.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal mass between `lo` and `hi`.
pub fn interval_probability(lo: f64, hi: f64) -> f64 {
    if lo >= 0.0 {
        0.5 * (erfc(lo / SQRT_2) - erfc(hi / SQRT_2))
    } else if hi <= 0.0 {
        0.5 * (erfc(-hi / SQRT_2) - erfc(-lo / SQRT_2))
    } else {
        0.5 * (erf(hi / SQRT_2) - erf(lo / SQRT_2))
    }
}

/// Probability mass of a standard normal inside each bin defined by `edges`.
///
/// For `n + 1` edges the result has `n` entries, the mass between
/// `edges[k]` and `edges[k + 1]`, i.e. `0.5 * Δerf(edge / √2)`. Edges are
/// expected in increasing order; a decreasing pair yields a negative mass.
pub fn bin_probabilities(edges: ArrayView1<f64>) -> Array1<f64> {
    if edges.len() < 2 {
        return Array1::zeros(0);
    }
    let lo = edges.slice(ndarray::s![..-1]);
    let hi = edges.slice(ndarray::s![1..]);
    Zip::from(&lo)
        .and(&hi)
        .map_collect(|&l, &h| interval_probability(l, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_normal_pdf_known_values() {
        assert_relative_eq!(normal_pdf(0.0), INV_SQRT_2PI, epsilon = 1e-15);
        assert_relative_eq!(normal_pdf(1.0), 0.241_970_724_519_143_37, epsilon = 1e-15);
        assert_relative_eq!(normal_pdf(-2.0), normal_pdf(2.0));
    }

    #[test]
    fn test_normal_cdf_known_values() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(1.0), 0.841_344_746_068_542_9, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(-1.0), 0.158_655_253_931_457_05, epsilon = 1e-15);
    }

    #[test]
    fn test_erf_matches_high_precision_values() {
        assert_relative_eq!(erf(0.5), 0.520_499_877_813_046_5, max_relative = 1e-15);
        assert_relative_eq!(
            normal_cdf(1.0) - normal_cdf(-1.0),
            0.682_689_492_137_085_9,
            max_relative = 1e-15
        );
    }

    #[test]
    fn test_tail_bins_keep_relative_precision() {
        // mass between 8 and 9 sigma, far below the spacing of doubles near 1
        let mass = interval_probability(8.0, 9.0);
        assert_relative_eq!(mass, 6.219_831_985_865_830e-16, max_relative = 1e-12);
        assert_eq!(interval_probability(-9.0, -8.0), mass);
    }

    #[test]
    fn test_bin_probabilities_sum_to_one_over_wide_range() {
        let edges: Array1<f64> = (-8..=8).map(|e| e as f64).collect();
        let mass = bin_probabilities(edges.view());
        assert_eq!(mass.len(), 16);
        assert_relative_eq!(mass.sum(), 1.0, epsilon = 1e-14);
        assert!(mass.iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn test_bin_probabilities_symmetry() {
        let edges = array![-1.5, -0.5, 0.5, 1.5];
        let mass = bin_probabilities(edges.view());
        assert_relative_eq!(mass[0], mass[2], epsilon = 1e-15);
        assert_relative_eq!(mass[1], normal_cdf(0.5) - normal_cdf(-0.5), epsilon = 1e-14);
    }

    #[test]
    fn test_bin_probabilities_degenerate_edges() {
        assert_eq!(bin_probabilities(array![0.3].view()).len(), 0);
        assert_eq!(bin_probabilities(Array1::zeros(0).view()).len(), 0);
    }
}
