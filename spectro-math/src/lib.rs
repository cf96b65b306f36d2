//! spectro-math - numerical building blocks for spectral PSF modelling
//!
//! This crate holds the domain-free numerics used when evaluating a
//! Gauss-Hermite point spread function calibrated against wavelength:
//!
//! - **vander** - Legendre and probabilist Hermite Vandermonde matrices,
//!   evaluated with one parallel lane per sample point
//! - **gauss** - standard normal density, error function and pixel-integrated
//!   normal bin probabilities
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use spectro_math::{legvander, normalize_to_unit_interval};
//!
//! let waves = array![6000.0, 6025.0, 6050.0];
//! let wx = waves.mapv(|w| normalize_to_unit_interval(w, 6000.0, 6050.0));
//! let basis = legvander(wx.view(), 2).unwrap();
//! assert_eq!(basis.dim(), (3, 3));
//! assert_eq!(basis[[1, 1]], 0.0);
//! ```

pub mod gauss;
pub mod vander;

pub use gauss::{bin_probabilities, interval_probability, normal_cdf, normal_pdf, INV_SQRT_2PI};
pub use vander::{
    hermevander, legvander, normalize_to_unit_interval, vander, Basis, BasisError,
};
