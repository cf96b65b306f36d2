//! Pixel-integrated Gauss-Hermite spot synthesis.
//!
//! Along each detector axis the PSF is a Gaussian envelope times probabilist
//! Hermite polynomials. Integrating term `k` over one pixel has a closed form:
//!
//! - `k = 0`: the Gaussian mass in the bin, `0.5 * Δerf(edge / √2)`
//! - `k ≥ 1`: `GH[k-1](left) - GH[k-1](right)` where
//!   `GH[k](e) = He_k(e) * exp(-e²/2) / √(2π)`
//!
//! The 2D spot at one wavelength is the separable sum
//! `spot[y, x] = Σ_i Σ_j c[i, j] pGHy[j, y] pGHx[i, x]`, evaluated with one
//! parallel lane per wavelength.

use std::path::Path;

use ndarray::{
    s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spectro_math::{bin_probabilities, hermevander, normal_pdf};

use crate::device::{ComputeBuffer, Device};
use crate::error::{ProjectionError, Result};
use crate::params::PsfParameterSet;

/// Gaussian mass a footprint may lose before it is reported as truncated
pub const TRUNCATION_TOLERANCE: f64 = 1e-3;

/// Pixel-integrated 1D Gauss-Hermite profiles for one spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGaussHermite {
    /// `[GHDEGX + 1, nwave, HSIZEX]`
    pub x: Array3<f64>,
    /// `[GHDEGY + 1, nwave, HSIZEY]`
    pub y: Array3<f64>,
}

impl PixelGaussHermite {
    /// Gaussian core mass captured by the footprint at each wavelength,
    /// `Σ pGHx[0] · Σ pGHy[0]`.
    pub fn core_mass(&self) -> Array1<f64> {
        let mx = self.x.index_axis(Axis(0), 0).sum_axis(Axis(1));
        let my = self.y.index_axis(Axis(0), 0).sum_axis(Axis(1));
        mx * my
    }

    /// `(wavelength index, lost mass)` where the footprint misses more than
    /// `tolerance` of the Gaussian core.
    pub fn truncated(&self, tolerance: f64) -> Vec<(usize, f64)> {
        self.core_mass()
            .iter()
            .enumerate()
            .map(|(iwave, m)| (iwave, 1.0 - m))
            .filter(|&(_, lost)| lost > tolerance)
            .collect()
    }
}

/// Integrated profiles along both axes for local spectrum `ispec`.
///
/// # Errors
/// * `DegenerateFootprint` - a sigma is not positive, or a centroid or sigma
///   is not finite
pub fn pixelated_gauss_hermite(
    device: &Device,
    ispec: usize,
    params: &PsfParameterSet,
) -> Result<PixelGaussHermite> {
    params.check_spectrum(ispec)?;
    let spectrum = params.specmin() + ispec;

    let x = integrated_profiles(
        device,
        spectrum,
        "x",
        params.x().row(ispec),
        params.ghsigx().row(ispec),
        params.hsizex(),
        params.ghdegx(),
    )?;
    let y = integrated_profiles(
        device,
        spectrum,
        "y",
        params.y().row(ispec),
        params.ghsigy().row(ispec),
        params.hsizey(),
        params.ghdegy(),
    )?;
    Ok(PixelGaussHermite { x, y })
}

/// Profiles `[deg + 1, nwave, n]` along one axis.
fn integrated_profiles(
    device: &Device,
    spectrum: usize,
    axis: &str,
    centroid: ArrayView1<f64>,
    sigma: ArrayView1<f64>,
    n: usize,
    deg: usize,
) -> Result<Array3<f64>> {
    let nwave = centroid.len();
    for (iwave, (&c, &sig)) in centroid.iter().zip(sigma.iter()).enumerate() {
        if !c.is_finite() || !sig.is_finite() || sig <= 0.0 {
            return Err(ProjectionError::degenerate(
                Some(spectrum),
                format!("{axis} centroid {c}, sigma {sig} at wavelength index {iwave}"),
            ));
        }
    }

    // Bin edges in sigma units relative to the fractional centroid,
    // row-major [nwave, n + 1].
    let half = (n / 2) as f64;
    let mut edges = Array2::zeros((nwave, n + 1));
    for ((iwave, k), e) in edges.indexed_iter_mut() {
        let frac = centroid[iwave].rem_euclid(1.0);
        *e = (k as f64 - half - frac) / sigma[iwave];
    }

    let flat = ComputeBuffer::upload(&edges.view().into_shape_with_order(nwave * (n + 1))?);
    // [nwave * (n + 1), deg + 1]
    let mut gh = device.launch("hermevander", flat.shape()[0], || {
        hermevander(flat.view(), deg)
    })??;
    for (mut row, &e) in gh.outer_iter_mut().zip(flat.view().iter()) {
        row *= normal_pdf(e);
    }
    let gh = gh.into_shape_with_order((nwave, n + 1, deg + 1))?;

    let mut out = Array3::zeros((deg + 1, nwave, n));
    for iwave in 0..nwave {
        out.slice_mut(s![0, iwave, ..])
            .assign(&bin_probabilities(edges.row(iwave)));
        for k in 1..=deg {
            let g = gh.slice(s![iwave, .., k - 1]);
            for b in 0..n {
                out[[k, iwave, b]] = g[b] - g[b + 1];
            }
        }
    }
    Ok(out)
}

/// Combine integrated profiles into one spot image per wavelength.
///
/// `ghc` holds the spectrum's Gauss-Hermite coefficients
/// `[GHDEGX + 1, GHDEGY + 1, nwave]`. Returns `[nwave, HSIZEY, HSIZEX]`.
pub fn multispot(
    device: &Device,
    pgh: &PixelGaussHermite,
    ghc: ArrayView3<f64>,
) -> Result<Array3<f64>> {
    let (ndegx, nwave, nx) = pgh.x.dim();
    let (ndegy, _, ny) = pgh.y.dim();
    if ghc.dim() != (ndegx, ndegy, nwave) || pgh.y.len_of(Axis(1)) != nwave {
        return Err(ProjectionError::launch(
            "multispot",
            format!(
                "coefficients {:?} do not match profiles x{:?} y{:?}",
                ghc.dim(),
                pgh.x.dim(),
                pgh.y.dim()
            ),
        ));
    }

    let px = ComputeBuffer::upload(&pgh.x);
    let py = ComputeBuffer::upload(&pgh.y);
    let coeff = ComputeBuffer::upload(&ghc);
    let mut spots = ComputeBuffer::<f64, _>::zeros((nwave, ny, nx));

    device.launch("multispot", nwave, || {
        let (px, py, coeff) = (px.view(), py.view(), coeff.view());
        spots
            .view_mut()
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(iwave, mut spot)| {
                for i in 0..ndegx {
                    let gx = px.slice(s![i, iwave, ..]);
                    for j in 0..ndegy {
                        let c = coeff[[i, j, iwave]];
                        let gy = py.slice(s![j, iwave, ..]);
                        for iy in 0..ny {
                            let cy = c * gy[iy];
                            for ix in 0..nx {
                                spot[[iy, ix]] += cy * gx[ix];
                            }
                        }
                    }
                }
            });
    })?;

    Ok(spots.download())
}

/// Spot images for every spectrum and wavelength of a parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCache {
    specmin: usize,
    wavelengths: Array1<f64>,
    /// `[nspec, nwave, HSIZEY, HSIZEX]`
    spots: Array4<f64>,
}

impl SpotCache {
    /// Synthesize every spot described by `params`.
    pub fn build(device: &Device, params: &PsfParameterSet) -> Result<Self> {
        let (nspec, nwave) = (params.nspec(), params.nwave());
        let mut spots = Array4::zeros((nspec, nwave, params.hsizey(), params.hsizex()));

        for (ispec, mut out) in spots.outer_iter_mut().enumerate() {
            let pgh = pixelated_gauss_hermite(device, ispec, params)?;
            let truncated = pgh.truncated(TRUNCATION_TOLERANCE);
            if let Some(&(iwave, lost)) = truncated
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            {
                log::warn!(
                    "spectrum {}: footprint {}x{} truncates the PSF core at {} wavelengths, worst {:.2e} lost at wavelength {:.3} (index {iwave})",
                    params.specmin() + ispec,
                    params.hsizey(),
                    params.hsizex(),
                    truncated.len(),
                    lost,
                    params.wavelengths()[iwave]
                );
            }
            let ghc = params.gh_coefficients(ispec)?;
            out.assign(&multispot(device, &pgh, ghc.view())?);
        }

        log::debug!(
            "cached {nspec}x{nwave} spots of {}x{} pixels",
            params.hsizey(),
            params.hsizex()
        );
        Ok(Self {
            specmin: params.specmin(),
            wavelengths: params.wavelengths().to_owned(),
            spots,
        })
    }

    /// Global index of local spectrum 0
    pub fn specmin(&self) -> usize {
        self.specmin
    }

    pub fn wavelengths(&self) -> ArrayView1<'_, f64> {
        self.wavelengths.view()
    }

    /// `(nspec, nwave, HSIZEY, HSIZEX)`
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.spots.dim()
    }

    pub fn view(&self) -> ArrayView4<'_, f64> {
        self.spots.view()
    }

    /// Spot image `[HSIZEY, HSIZEX]` for local spectrum `ispec`, wavelength `iwave`
    pub fn spot(&self, ispec: usize, iwave: usize) -> ArrayView2<'_, f64> {
        self.spots.slice(s![ispec, iwave, .., ..])
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        log::info!("wrote spot cache {:?} to {}", self.dim(), path.display());
        Ok(())
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticPsf;
    use crate::wavelength::WavelengthGrid;
    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    fn device() -> Device {
        Device::new(Some(4)).unwrap()
    }

    fn params(psf: SyntheticPsf, waves: Vec<f64>) -> PsfParameterSet {
        let table = psf.build().unwrap();
        let grid = WavelengthGrid::new(waves).unwrap();
        PsfParameterSet::evaluate(&device(), &grid, &table).unwrap()
    }

    #[test]
    fn test_degree_zero_profile_is_bin_mass() {
        let p = params(
            SyntheticPsf::new(1).with_sigma(1.3).with_footprint(9, 7).with_x0(20.25),
            vec![6000.0],
        );
        let pgh = pixelated_gauss_hermite(&device(), 0, &p).unwrap();
        assert_eq!(pgh.x.dim(), (1, 1, 9));
        assert_eq!(pgh.y.dim(), (1, 1, 7));

        let edges = Array1::from_iter((0..=9).map(|k| (k as f64 - 4.0 - 0.25) / 1.3));
        let expected = bin_probabilities(edges.view());
        for (a, b) in pgh.x.slice(s![0, 0, ..]).iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_higher_orders_are_edge_differences() {
        let p = params(
            SyntheticPsf::new(1)
                .with_sigma(1.0)
                .with_footprint(5, 5)
                .with_gh_degree(2, 2),
            vec![6000.0, 6100.0],
        );
        let pgh = pixelated_gauss_hermite(&device(), 0, &p).unwrap();
        assert_eq!(pgh.x.dim(), (3, 2, 5));

        // Integer x centroid and unit sigma: edges are -2..=3.
        let gh1 = |e: f64| e * normal_pdf(e);
        for b in 0..5 {
            let left = b as f64 - 2.0;
            let right = left + 1.0;
            assert_relative_eq!(
                pgh.x[[1, 0, b]],
                normal_pdf(left) - normal_pdf(right),
                epsilon = 1e-15
            );
            assert_relative_eq!(pgh.x[[2, 0, b]], gh1(left) - gh1(right), epsilon = 1e-15);
        }
        // First order telescopes across the footprint.
        assert_relative_eq!(
            pgh.x.slice(s![1, 0, ..]).sum(),
            normal_pdf(-2.0) - normal_pdf(3.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_gaussian_spot_integrates_to_one() {
        // +/- 6 sigma footprint
        let p = params(
            SyntheticPsf::new(1)
                .with_sigma(1.0)
                .with_footprint(13, 13)
                .with_x0(30.0)
                .with_y0(40.0),
            vec![6000.0],
        );
        let cache = SpotCache::build(&device(), &p).unwrap();
        let spot = cache.spot(0, 0);
        assert!(spot.iter().all(|&v| v >= 0.0));
        assert_relative_eq!(spot.sum(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_multispot_lanes_match_serial_sum() {
        let p = params(
            SyntheticPsf::new(2)
                .with_sigma(1.1)
                .with_footprint(7, 9)
                .with_gh_degree(2, 1)
                .with_gh_term(1, 1, 0.05)
                .with_gh_term(2, 0, -0.02),
            vec![6000.0, 6200.0, 6400.0, 6600.0, 6800.0],
        );
        let pgh = pixelated_gauss_hermite(&device(), 1, &p).unwrap();
        let ghc = p.gh_coefficients(1).unwrap();
        let spots = multispot(&device(), &pgh, ghc.view()).unwrap();
        assert_eq!(spots.dim(), (5, 9, 7));

        for iwave in 0..5 {
            for iy in 0..9 {
                for ix in 0..7 {
                    let mut expected = 0.0;
                    for i in 0..3 {
                        for j in 0..2 {
                            expected += ghc[[i, j, iwave]]
                                * pgh.y[[j, iwave, iy]]
                                * pgh.x[[i, iwave, ix]];
                        }
                    }
                    assert_relative_eq!(spots[[iwave, iy, ix]], expected, epsilon = 1e-15);
                }
            }
        }
    }

    #[test]
    fn test_multispot_rejects_mismatched_coefficients() {
        let p = params(SyntheticPsf::new(1).with_gh_degree(1, 1), vec![6000.0, 6100.0]);
        let pgh = pixelated_gauss_hermite(&device(), 0, &p).unwrap();
        let wrong = Array3::zeros((2, 2, 3));
        let err = multispot(&device(), &pgh, wrong.view()).unwrap_err();
        assert!(matches!(err, ProjectionError::KernelLaunchFailure { .. }));
    }

    #[test]
    fn test_non_positive_sigma_names_spectrum() {
        let p = params(SyntheticPsf::new(3).with_sigma(0.0), vec![6000.0]);
        let err = SpotCache::build(&device(), &p).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::DegenerateFootprint {
                spectrum: Some(0),
                ..
            }
        ));
    }

    #[test]
    fn test_core_mass_flags_small_footprint() {
        // 5 px at sigma 1.5 covers well under +/- 2 sigma
        let small = params(
            SyntheticPsf::new(1).with_sigma(1.5).with_footprint(5, 5),
            vec![6000.0, 6100.0, 6200.0],
        );
        let pgh = pixelated_gauss_hermite(&device(), 0, &small).unwrap();
        let truncated = pgh.truncated(TRUNCATION_TOLERANCE);
        assert_eq!(truncated.len(), 3);
        for (iwave, lost) in truncated {
            assert!(lost > 0.1, "wavelength {iwave} lost {lost}");
        }
        // the cache still builds, it only warns
        assert!(SpotCache::build(&device(), &small).is_ok());

        let wide = params(
            SyntheticPsf::new(1).with_sigma(1.0).with_footprint(13, 13),
            vec![6000.0, 6100.0],
        );
        let pgh = pixelated_gauss_hermite(&device(), 0, &wide).unwrap();
        assert!(pgh.truncated(TRUNCATION_TOLERANCE).is_empty());
        for m in pgh.core_mass().iter() {
            assert_relative_eq!(*m, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_spot_cache_file_roundtrip() {
        let p = params(SyntheticPsf::new(2).with_footprint(5, 5), vec![6000.0, 6010.0]);
        let cache = SpotCache::build(&device(), &p).unwrap();

        let file = NamedTempFile::new().unwrap();
        cache.save_to_file(file.path()).unwrap();
        let loaded = SpotCache::load_from_file(file.path()).unwrap();

        assert_eq!(loaded.dim(), (2, 2, 5, 5));
        assert_eq!(loaded.specmin(), 0);
        for (a, b) in loaded.view().iter().zip(cache.view().iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-15);
        }
    }
}
