//! PSF parameters interpolated onto a wavelength grid.
//!
//! Every calibration row is a Legendre series in normalized wavelength. The
//! parameter model evaluates the Legendre basis once for the grid, then takes
//! one dot product per spectrum and row to produce `[spectrum, wavelength]`
//! fields. Gauss-Hermite rows are gathered into a single
//! `[degree_i, degree_j, spectrum, wavelength]` tensor.

use std::collections::BTreeMap;

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView4, Axis};
use spectro_math::{legvander, normalize_to_unit_interval};

use crate::calibration::{CalibrationTable, ParamKind};
use crate::device::{ComputeBuffer, Device};
use crate::error::{ProjectionError, Result};
use crate::wavelength::WavelengthGrid;

/// Integer detector coordinates where each spot footprint begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelCorners {
    /// Column of the footprint's first pixel, `[spectrum, wavelength]`
    pub x: Array2<i64>,
    /// Row of the footprint's first pixel, `[spectrum, wavelength]`
    pub y: Array2<i64>,
}

impl PixelCorners {
    /// `(x, y)` corner for one spectrum and wavelength
    pub fn get(&self, ispec: usize, iwave: usize) -> (i64, i64) {
        (self.x[[ispec, iwave]], self.y[[ispec, iwave]])
    }

    /// `(nspec, nwave)`
    pub fn dim(&self) -> (usize, usize) {
        self.x.dim()
    }
}

/// PSF parameters for a contiguous range of spectra on one wavelength grid.
///
/// Built once per bundle and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfParameterSet {
    wavelengths: Array1<f64>,
    specmin: usize,
    x: Array2<f64>,
    y: Array2<f64>,
    ghsigx: Array2<f64>,
    ghsigy: Array2<f64>,
    extra: BTreeMap<String, Array2<f64>>,
    gh: Array4<f64>,
    hsizex: usize,
    hsizey: usize,
    ghdegx: usize,
    ghdegy: usize,
}

impl PsfParameterSet {
    /// Evaluate every spectrum of `table` on `grid`.
    pub fn evaluate(
        device: &Device,
        grid: &WavelengthGrid,
        table: &CalibrationTable,
    ) -> Result<Self> {
        Self::evaluate_spectra(device, grid, table, 0, table.nspec())
    }

    /// Evaluate spectra `specmin..specmin + nspec` of `table` on `grid`.
    ///
    /// Spectrum indices in the result are local: row 0 is `specmin`.
    ///
    /// # Errors
    /// * `InvalidRange` - the spectrum range is empty or exceeds the table
    /// * `KernelLaunchFailure` - the basis kernel could not run
    pub fn evaluate_spectra(
        device: &Device,
        grid: &WavelengthGrid,
        table: &CalibrationTable,
        specmin: usize,
        nspec: usize,
    ) -> Result<Self> {
        let end = specmin + nspec;
        if nspec == 0 || end > table.nspec() {
            return Err(ProjectionError::InvalidRange {
                axis: "spectrum",
                start: specmin,
                end,
                len: table.nspec(),
            });
        }

        let meta = *table.meta();
        let nwave = grid.len();

        let normalized = grid
            .values()
            .mapv(|w| normalize_to_unit_interval(w, meta.wavemin, meta.wavemax));
        let input = ComputeBuffer::upload(&normalized);
        // [nwave, legdeg + 1]
        let basis = device.launch("legvander", nwave, || {
            legvander(input.view(), meta.legdeg)
        })??;

        let mut scalars: BTreeMap<String, Array2<f64>> = BTreeMap::new();
        let mut gh = Array4::zeros((meta.ghdegx + 1, meta.ghdegy + 1, nspec, nwave));

        for (name, kind, coeff) in table.rows() {
            // [nspec, ndeg] . [ndeg, nwave]
            let values = coeff.slice(s![specmin..end, ..]).dot(&basis.t());
            match kind {
                ParamKind::GaussHermite { i, j } => {
                    gh.slice_mut(s![i, j, .., ..]).assign(&values);
                }
                ParamKind::Scalar => {
                    scalars.insert(name.to_string(), values);
                }
            }
        }

        let mut take = |name: &str| {
            scalars.remove(name).ok_or_else(|| {
                ProjectionError::malformed(Some(name), "required parameter row is missing")
            })
        };
        let x = take("X")?;
        let y = take("Y")?;
        let ghsigx = take("GHSIGX")?;
        let ghsigy = take("GHSIGY")?;

        log::debug!(
            "evaluated {} parameters for spectra {specmin}..{end} at {nwave} wavelengths",
            table.param_names().len()
        );

        Ok(Self {
            wavelengths: grid.values().to_owned(),
            specmin,
            x,
            y,
            ghsigx,
            ghsigy,
            extra: scalars,
            gh,
            hsizex: meta.hsizex,
            hsizey: meta.hsizey,
            ghdegx: meta.ghdegx,
            ghdegy: meta.ghdegy,
        })
    }

    pub fn wavelengths(&self) -> ArrayView1<'_, f64> {
        self.wavelengths.view()
    }

    /// Global index of local spectrum 0
    pub fn specmin(&self) -> usize {
        self.specmin
    }

    pub fn nspec(&self) -> usize {
        self.x.nrows()
    }

    pub fn nwave(&self) -> usize {
        self.wavelengths.len()
    }

    /// Spot centroid x, `[spectrum, wavelength]`
    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    /// Spot centroid y, `[spectrum, wavelength]`
    pub fn y(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    /// Gaussian core width along x, `[spectrum, wavelength]`
    pub fn ghsigx(&self) -> ArrayView2<'_, f64> {
        self.ghsigx.view()
    }

    /// Gaussian core width along y, `[spectrum, wavelength]`
    pub fn ghsigy(&self) -> ArrayView2<'_, f64> {
        self.ghsigy.view()
    }

    /// Any scalar parameter by name
    pub fn scalar(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        match name {
            "X" => Some(self.x.view()),
            "Y" => Some(self.y.view()),
            "GHSIGX" => Some(self.ghsigx.view()),
            "GHSIGY" => Some(self.ghsigy.view()),
            _ => self.extra.get(name).map(|v| v.view()),
        }
    }

    /// Gauss-Hermite tensor `[degree_i, degree_j, spectrum, wavelength]`
    pub fn gh(&self) -> ArrayView4<'_, f64> {
        self.gh.view()
    }

    /// Contiguous Gauss-Hermite coefficients `[degree_i, degree_j, wavelength]`
    /// for one spectrum.
    pub fn gh_coefficients(&self, ispec: usize) -> Result<Array3<f64>> {
        self.check_spectrum(ispec)?;
        Ok(self
            .gh
            .index_axis(Axis(2), ispec)
            .as_standard_layout()
            .into_owned())
    }

    pub fn hsizex(&self) -> usize {
        self.hsizex
    }

    pub fn hsizey(&self) -> usize {
        self.hsizey
    }

    pub fn ghdegx(&self) -> usize {
        self.ghdegx
    }

    pub fn ghdegy(&self) -> usize {
        self.ghdegy
    }

    /// Footprint corners for every spectrum and wavelength.
    ///
    /// The footprint starts `HSIZE / 2` (integer division) pixels below the
    /// centroid, rounded down to a whole pixel.
    ///
    /// # Errors
    /// * `DegenerateFootprint` - a centroid is not finite
    pub fn corners(&self) -> Result<PixelCorners> {
        let x = corner_axis(&self.x, self.specmin, self.hsizex, "X")?;
        let y = corner_axis(&self.y, self.specmin, self.hsizey, "Y")?;
        Ok(PixelCorners { x, y })
    }

    pub(crate) fn check_spectrum(&self, ispec: usize) -> Result<()> {
        if ispec >= self.nspec() {
            return Err(ProjectionError::InvalidRange {
                axis: "spectrum",
                start: ispec,
                end: ispec + 1,
                len: self.nspec(),
            });
        }
        Ok(())
    }
}

/// Corners along one axis; errors name the global spectrum `specmin + row`.
fn corner_axis(
    centroid: &Array2<f64>,
    specmin: usize,
    hsize: usize,
    axis: &str,
) -> Result<Array2<i64>> {
    if let Some(((ispec, iwave), c)) = centroid.indexed_iter().find(|(_, c)| !c.is_finite()) {
        return Err(ProjectionError::degenerate(
            Some(specmin + ispec),
            format!("centroid {axis}={c} at wavelength index {iwave}"),
        ));
    }
    let half = (hsize / 2) as f64;
    Ok(centroid.mapv(|c| (c - half).floor() as i64))
}
