//! Synthetic Gauss-Hermite calibration tables.
//!
//! Produces a well-formed [`CalibrationTable`] with spectra laid out as
//! evenly spaced vertical traces: x is constant per spectrum, y moves
//! linearly with wavelength and every other parameter is constant. Used by
//! the tests, the bench and the demo binary in place of a calibration file.

use ndarray::Array3;

use crate::calibration::{CalibrationMeta, CalibrationTable, GH_PREFIX, REQUIRED_PARAMS};
use crate::error::Result;

/// Builder for a synthetic calibration table.
#[derive(Debug, Clone)]
pub struct SyntheticPsf {
    nspec: usize,
    wavemin: f64,
    wavemax: f64,
    legdeg: usize,
    x0: f64,
    spacing: f64,
    y0: f64,
    dy_dw: f64,
    sigma: (f64, f64),
    footprint: (usize, usize),
    gh_degree: (usize, usize),
    gh_terms: Vec<(usize, usize, f64)>,
}

impl SyntheticPsf {
    /// Pure Gaussian spots for `nspec` spectra with default geometry.
    pub fn new(nspec: usize) -> Self {
        Self {
            nspec,
            wavemin: 5500.0,
            wavemax: 7500.0,
            legdeg: 3,
            x0: 10.0,
            spacing: 12.0,
            y0: 10.0,
            dy_dw: 0.5,
            sigma: (1.0, 1.0),
            footprint: (11, 11),
            gh_degree: (0, 0),
            gh_terms: Vec::new(),
        }
    }

    /// Wavelength range used for Legendre normalization
    pub fn with_wave_range(mut self, wavemin: f64, wavemax: f64) -> Self {
        self.wavemin = wavemin;
        self.wavemax = wavemax;
        self
    }

    /// Legendre degree of the coefficient rows (at least 1)
    pub fn with_legendre_degree(mut self, legdeg: usize) -> Self {
        self.legdeg = legdeg.max(1);
        self
    }

    /// x centroid of spectrum 0
    pub fn with_x0(mut self, x0: f64) -> Self {
        self.x0 = x0;
        self
    }

    /// x distance between neighbouring spectra
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// y centroid at `wavemin`
    pub fn with_y0(mut self, y0: f64) -> Self {
        self.y0 = y0;
        self
    }

    /// Trace slope in pixels per wavelength unit
    pub fn with_dispersion(mut self, dy_dw: f64) -> Self {
        self.dy_dw = dy_dw;
        self
    }

    /// Same Gaussian width on both axes
    pub fn with_sigma(self, sigma: f64) -> Self {
        self.with_sigma_xy(sigma, sigma)
    }

    pub fn with_sigma_xy(mut self, sigx: f64, sigy: f64) -> Self {
        self.sigma = (sigx, sigy);
        self
    }

    /// Footprint `HSIZEX` x `HSIZEY`
    pub fn with_footprint(mut self, hsizex: usize, hsizey: usize) -> Self {
        self.footprint = (hsizex, hsizey);
        self
    }

    pub fn with_gh_degree(mut self, ghdegx: usize, ghdegy: usize) -> Self {
        self.gh_degree = (ghdegx, ghdegy);
        self
    }

    /// Constant weight for the `GH-i-j` term; `GH-0-0` defaults to 1.
    pub fn with_gh_term(mut self, i: usize, j: usize, value: f64) -> Self {
        self.gh_terms.retain(|&(ti, tj, _)| (ti, tj) != (i, j));
        self.gh_terms.push((i, j, value));
        self
    }

    /// Build and validate the table.
    pub fn build(&self) -> Result<CalibrationTable> {
        let (ghdegx, ghdegy) = self.gh_degree;
        let ndeg = self.legdeg + 1;

        let mut rows: Vec<(String, Vec<f64>)> = Vec::new();
        let constant = |value: f64| {
            let mut c = vec![0.0; ndeg];
            c[0] = value;
            c
        };

        for name in REQUIRED_PARAMS {
            let per_spec: Vec<f64> = match name {
                "X" => (0..self.nspec)
                    .flat_map(|s| constant(self.x0 + s as f64 * self.spacing))
                    .collect(),
                "Y" => {
                    // y0 + dy_dw (w - wavemin) in Legendre form
                    let half = 0.5 * self.dy_dw * (self.wavemax - self.wavemin);
                    (0..self.nspec)
                        .flat_map(|_| {
                            let mut c = constant(self.y0 + half);
                            c[1] = half;
                            c
                        })
                        .collect()
                }
                "GHSIGX" => (0..self.nspec).flat_map(|_| constant(self.sigma.0)).collect(),
                _ => (0..self.nspec).flat_map(|_| constant(self.sigma.1)).collect(),
            };
            rows.push((name.to_string(), per_spec));
        }

        let mut terms = self.gh_terms.clone();
        if !terms.iter().any(|&(i, j, _)| (i, j) == (0, 0)) {
            terms.push((0, 0, 1.0));
        }
        for i in 0..=ghdegx {
            for j in 0..=ghdegy {
                if !terms.iter().any(|&(ti, tj, _)| (ti, tj) == (i, j)) {
                    terms.push((i, j, 0.0));
                }
            }
        }
        terms.sort_by_key(|&(i, j, _)| (i, j));
        for (i, j, value) in terms {
            let per_spec = (0..self.nspec).flat_map(|_| constant(value)).collect();
            rows.push((format!("{GH_PREFIX}{i}-{j}"), per_spec));
        }

        let nparam = rows.len();
        let (params, values): (Vec<String>, Vec<Vec<f64>>) = rows.into_iter().unzip();
        let coeff = Array3::from_shape_vec(
            (nparam, self.nspec, ndeg),
            values.into_iter().flatten().collect(),
        )?;

        let meta = CalibrationMeta {
            wavemin: self.wavemin,
            wavemax: self.wavemax,
            legdeg: self.legdeg,
            ghdegx,
            ghdegy,
            hsizex: self.footprint.0,
            hsizey: self.footprint.1,
        };
        CalibrationTable::new(params, coeff, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::params::PsfParameterSet;
    use crate::wavelength::WavelengthGrid;
    use crate::ProjectionError;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_table_shape() {
        let table = SyntheticPsf::new(4).build().unwrap();
        assert_eq!(table.nspec(), 4);
        assert_eq!(
            table.param_names(),
            &["X", "Y", "GHSIGX", "GHSIGY", "GH-0-0"]
        );
        assert_eq!(table.coefficients("GH-0-0").unwrap()[[3, 0]], 1.0);
    }

    #[test]
    fn test_all_gh_pairs_present() {
        let table = SyntheticPsf::new(1)
            .with_gh_degree(2, 1)
            .with_gh_term(1, 1, 0.1)
            .build()
            .unwrap();
        let gh: Vec<_> = table
            .param_names()
            .iter()
            .filter(|n| n.starts_with(GH_PREFIX))
            .cloned()
            .collect();
        assert_eq!(gh, vec!["GH-0-0", "GH-0-1", "GH-1-0", "GH-1-1", "GH-2-0", "GH-2-1"]);
        assert_eq!(table.coefficients("GH-1-1").unwrap()[[0, 0]], 0.1);
    }

    #[test]
    fn test_term_outside_degree_is_rejected() {
        let err = SyntheticPsf::new(1).with_gh_term(3, 0, 0.1).build().unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedCalibration { .. }));
    }

    #[test]
    fn test_trace_geometry() {
        let table = SyntheticPsf::new(3)
            .with_x0(20.0)
            .with_spacing(8.0)
            .with_y0(100.0)
            .with_dispersion(0.25)
            .build()
            .unwrap();
        let device = Device::new(Some(1)).unwrap();
        let grid = WavelengthGrid::new(vec![5500.0, 6500.0, 7500.0]).unwrap();
        let params = PsfParameterSet::evaluate(&device, &grid, &table).unwrap();

        assert_relative_eq!(params.x()[[2, 1]], 36.0);
        assert_relative_eq!(params.y()[[1, 0]], 100.0);
        assert_relative_eq!(params.y()[[1, 1]], 350.0);
        assert_relative_eq!(params.y()[[1, 2]], 600.0);
        assert_relative_eq!(params.ghsigy()[[0, 2]], 1.0);
    }
}
