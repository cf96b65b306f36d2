//! Vandermonde matrices for orthogonal polynomial bases.
//!
//! Both supported bases obey a three-term recurrence, so every row of the
//! output depends only on its own sample point. Rows are therefore the unit
//! of parallel work: each rayon lane fills one `[deg + 1]` row in increasing
//! degree order and never touches another lane's row.
//!
//! # Recurrences
//!
//! ```text
//! Legendre:            P_k(x) = ((2k - 1) x P_{k-1}(x) - (k - 1) P_{k-2}(x)) / k
//! Probabilist Hermite: He_k(x) = x He_{k-1}(x) - (k - 1) He_{k-2}(x)
//! ```
//!
//! with `P_0 = He_0 = 1` and `P_1 = He_1 = x`. No extra stabilization is
//! applied; the degrees used by calibrated PSF models stay well below 20.

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};
use thiserror::Error;

/// Errors raised while evaluating a polynomial basis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    /// A sample point is NaN or infinite
    #[error("sample {index} is not finite: {value}")]
    NonFiniteSample { index: usize, value: f64 },
}

/// Supported orthogonal polynomial families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// Legendre polynomials, orthogonal on `[-1, 1]`
    Legendre,
    /// Probabilist Hermite polynomials, orthogonal under `exp(-x²/2)`
    HermiteE,
}

impl Basis {
    /// Fill `row` with the basis evaluated at `x` for degrees `0..row.len()`.
    fn fill_row(self, x: f64, row: &mut ArrayViewMut1<f64>) {
        let len = row.len();
        if len == 0 {
            return;
        }
        row[0] = 1.0;
        if len == 1 {
            return;
        }
        row[1] = x;

        for k in 2..len {
            let kf = k as f64;
            row[k] = match self {
                Basis::Legendre => {
                    (row[k - 1] * x * (2.0 * kf - 1.0) - row[k - 2] * (kf - 1.0)) / kf
                }
                Basis::HermiteE => row[k - 1] * x - row[k - 2] * (kf - 1.0),
            };
        }
    }
}

/// Evaluate `basis` at every sample in `x` up to degree `deg`.
///
/// # Arguments
/// * `basis` - Polynomial family
/// * `x` - Sample points (pre-normalized to `[-1, 1]` for Legendre use)
/// * `deg` - Highest degree to evaluate
///
/// # Returns
/// * `Ok(Array2<f64>)` - Matrix of shape `[x.len(), deg + 1]`, `V[n, k] = basis_k(x[n])`
/// * `Err(BasisError::NonFiniteSample)` - If any sample is NaN or infinite
pub fn vander(basis: Basis, x: ArrayView1<f64>, deg: usize) -> Result<Array2<f64>, BasisError> {
    if let Some((index, &value)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(BasisError::NonFiniteSample { index, value });
    }

    let mut output = Array2::zeros((x.len(), deg + 1));
    Zip::from(output.rows_mut())
        .and(&x)
        .par_for_each(|mut row, &xi| basis.fill_row(xi, &mut row));

    Ok(output)
}

/// Legendre Vandermonde matrix, shape `[x.len(), deg + 1]`.
pub fn legvander(x: ArrayView1<f64>, deg: usize) -> Result<Array2<f64>, BasisError> {
    vander(Basis::Legendre, x, deg)
}

/// Probabilist Hermite Vandermonde matrix, shape `[x.len(), deg + 1]`.
pub fn hermevander(x: ArrayView1<f64>, deg: usize) -> Result<Array2<f64>, BasisError> {
    vander(Basis::HermiteE, x, deg)
}

/// Map `value` from `[min, max]` onto `[-1, 1]`.
///
/// Values outside the range extrapolate linearly past the unit interval.
pub fn normalize_to_unit_interval(value: f64, min: f64, max: f64) -> f64 {
    (value - min) * (2.0 / (max - min)) - 1.0
}
