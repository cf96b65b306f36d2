//! Gauss-Hermite PSF calibration table.
//!
//! A calibration table stores, for every named PSF parameter, a Legendre
//! coefficient row per spectrum: `coeff[param, spectrum, legendre_degree]`.
//! Evaluating that row against the Legendre basis at a normalized wavelength
//! gives the parameter value for that spectrum at that wavelength.
//!
//! Parameter rows come in two kinds:
//!
//! - scalar parameters such as the spot centroid `X`/`Y` and the Gaussian core
//!   widths `GHSIGX`/`GHSIGY`
//! - Gauss-Hermite coefficients named `GH-<i>-<j>`, the weight of the
//!   `He_i(x) He_j(y)` term of the spot model
//!
//! The table is immutable once constructed; all shape and metadata checks
//! happen in [`CalibrationTable::new`].

use std::collections::HashSet;

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// Prefix of Gauss-Hermite coefficient parameter names
pub const GH_PREFIX: &str = "GH-";

/// Scalar parameters every table must provide
pub const REQUIRED_PARAMS: [&str; 4] = ["X", "Y", "GHSIGX", "GHSIGY"];

/// Scalar metadata recorded alongside the coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMeta {
    /// Wavelength mapped to -1 for Legendre evaluation
    pub wavemin: f64,
    /// Wavelength mapped to +1 for Legendre evaluation
    pub wavemax: f64,
    /// Legendre degree of every coefficient row
    pub legdeg: usize,
    /// Gauss-Hermite degree along x
    pub ghdegx: usize,
    /// Gauss-Hermite degree along y
    pub ghdegy: usize,
    /// Spot footprint width in pixels
    pub hsizex: usize,
    /// Spot footprint height in pixels
    pub hsizey: usize,
}

/// Role of one parameter row in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Flat `[spectrum, wavelength]` field
    Scalar,
    /// Gauss-Hermite coefficient for degree pair `(i, j)`
    GaussHermite { i: usize, j: usize },
}

/// Classify a (trimmed) parameter name.
///
/// `GH-<i>-<j>` names must carry two non-negative integer degrees; anything
/// after the second index is ignored.
pub fn parse_param_name(name: &str) -> Result<ParamKind> {
    let Some(rest) = name.strip_prefix(GH_PREFIX) else {
        return Ok(ParamKind::Scalar);
    };

    let mut parts = rest.split('-');
    let mut next_degree = || -> Result<usize> {
        parts
            .next()
            .and_then(|p| p.trim().parse::<usize>().ok())
            .ok_or_else(|| {
                ProjectionError::malformed(
                    Some(name),
                    "Gauss-Hermite name must be GH-<i>-<j> with integer degrees",
                )
            })
    };
    let i = next_degree()?;
    let j = next_degree()?;
    Ok(ParamKind::GaussHermite { i, j })
}

/// Byte order of a raw coefficient payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Byte order of the host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Decode a packed `f64` payload into host byte order.
pub fn native_f64s(raw: &[u8], order: ByteOrder) -> Result<Vec<f64>> {
    if raw.len() % 8 != 0 {
        return Err(ProjectionError::malformed(
            None,
            format!("coefficient payload of {} bytes is not a whole number of f64", raw.len()),
        ));
    }
    Ok(raw
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            match order {
                ByteOrder::Big => f64::from_be_bytes(bytes),
                ByteOrder::Little => f64::from_le_bytes(bytes),
            }
        })
        .collect())
}

/// Immutable PSF calibration table for a set of spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    params: Vec<String>,
    kinds: Vec<ParamKind>,
    coeff: Array3<f64>,
    meta: CalibrationMeta,
}

impl CalibrationTable {
    /// Validate and assemble a calibration table.
    ///
    /// # Arguments
    /// * `params` - Parameter names, one per coefficient row; surrounding
    ///   whitespace is trimmed
    /// * `coeff` - Coefficients of shape `[params.len(), nspec, legdeg + 1]`
    /// * `meta` - Scalar metadata
    ///
    /// # Errors
    /// * `MalformedCalibration` - row count, Legendre degree, wavelength range,
    ///   duplicate or out-of-range Gauss-Hermite names, missing scalar
    ///   parameters or non-finite coefficients
    /// * `DegenerateFootprint` - zero footprint size
    pub fn new(params: Vec<String>, coeff: Array3<f64>, meta: CalibrationMeta) -> Result<Self> {
        let params: Vec<String> = params.iter().map(|p| p.trim().to_string()).collect();
        let (nparam, nspec, ndeg) = coeff.dim();

        if nparam != params.len() {
            return Err(ProjectionError::malformed(
                None,
                format!(
                    "coefficient array has {nparam} parameter rows but {} names were given",
                    params.len()
                ),
            ));
        }
        if nspec == 0 {
            return Err(ProjectionError::malformed(None, "table has no spectra"));
        }
        if ndeg != meta.legdeg + 1 {
            return Err(ProjectionError::malformed(
                None,
                format!(
                    "coefficient rows have {ndeg} terms but LEGDEG={} needs {}",
                    meta.legdeg,
                    meta.legdeg + 1
                ),
            ));
        }
        if !(meta.wavemin.is_finite() && meta.wavemax.is_finite() && meta.wavemax > meta.wavemin)
        {
            return Err(ProjectionError::malformed(
                None,
                format!(
                    "wavelength range [{}, {}] is not a finite increasing interval",
                    meta.wavemin, meta.wavemax
                ),
            ));
        }
        if meta.hsizex == 0 || meta.hsizey == 0 {
            return Err(ProjectionError::degenerate(
                None,
                format!("footprint {}x{} pixels is empty", meta.hsizey, meta.hsizex),
            ));
        }

        let mut seen = HashSet::new();
        let mut kinds = Vec::with_capacity(nparam);
        for (k, name) in params.iter().enumerate() {
            if !seen.insert(name.as_str()) {
                return Err(ProjectionError::malformed(Some(name), "duplicate parameter row"));
            }

            let kind = parse_param_name(name)?;
            if let ParamKind::GaussHermite { i, j } = kind {
                if i > meta.ghdegx || j > meta.ghdegy {
                    return Err(ProjectionError::malformed(
                        Some(name),
                        format!(
                            "degree pair ({i}, {j}) outside [0, {}] x [0, {}]",
                            meta.ghdegx, meta.ghdegy
                        ),
                    ));
                }
            }

            let row = coeff.index_axis(Axis(0), k);
            if let Some(((ispec, _), _)) = row.indexed_iter().find(|(_, c)| !c.is_finite()) {
                return Err(ProjectionError::malformed(
                    Some(name),
                    format!("non-finite coefficient for spectrum {ispec}"),
                ));
            }
            kinds.push(kind);
        }

        if let Some(&missing) = REQUIRED_PARAMS.iter().find(|p| !seen.contains(**p)) {
            return Err(ProjectionError::malformed(
                Some(missing),
                "required parameter row is missing",
            ));
        }

        log::debug!(
            "calibration table: {nparam} parameters, {nspec} spectra, LEGDEG={}, GH degrees ({}, {}), footprint {}x{}",
            meta.legdeg,
            meta.ghdegx,
            meta.ghdegy,
            meta.hsizey,
            meta.hsizex
        );

        Ok(Self {
            params,
            kinds,
            coeff,
            meta,
        })
    }

    /// Build a table from a packed `f64` coefficient payload in `order`.
    ///
    /// `shape` is `(nparam, nspec, legdeg + 1)` in row-major order.
    pub fn from_raw_coefficients(
        params: Vec<String>,
        raw: &[u8],
        shape: (usize, usize, usize),
        order: ByteOrder,
        meta: CalibrationMeta,
    ) -> Result<Self> {
        let values = native_f64s(raw, order)?;
        let coeff = Array3::from_shape_vec(shape, values)?;
        Self::new(params, coeff, meta)
    }

    /// Scalar metadata
    pub fn meta(&self) -> &CalibrationMeta {
        &self.meta
    }

    /// Number of spectra described by the table
    pub fn nspec(&self) -> usize {
        self.coeff.len_of(Axis(1))
    }

    /// Trimmed parameter names in row order
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// Full coefficient array `[param, spectrum, legendre_degree]`
    pub fn coefficients_all(&self) -> ArrayView3<'_, f64> {
        self.coeff.view()
    }

    /// Coefficient rows `[spectrum, legendre_degree]` for parameter `name`
    pub fn coefficients(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.params
            .iter()
            .position(|p| p == name)
            .map(|k| self.coeff.index_axis(Axis(0), k))
    }

    /// Iterate `(name, kind, coefficients[spectrum, degree])` over every row
    pub fn rows(&self) -> impl Iterator<Item = (&str, ParamKind, ArrayView2<'_, f64>)> + '_ {
        self.params
            .iter()
            .zip(self.kinds.iter())
            .zip(self.coeff.outer_iter())
            .map(|((name, kind), row)| (name.as_str(), *kind, row))
    }
}
