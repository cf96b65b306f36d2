//! Wavelength sampling shared by every spectrum in a bundle.

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// Strictly increasing wavelength samples at which flux is modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthGrid {
    values: Array1<f64>,
}

impl WavelengthGrid {
    /// Build a grid from explicit samples.
    ///
    /// # Errors
    /// * `InvalidWavelengthGrid` - empty, non-finite or not strictly increasing
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(ProjectionError::InvalidWavelengthGrid(
                "grid has no samples".to_string(),
            ));
        }
        if let Some(idx) = values.iter().position(|w| !w.is_finite()) {
            return Err(ProjectionError::InvalidWavelengthGrid(format!(
                "sample {idx} is not finite"
            )));
        }
        if let Some(idx) = values.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(ProjectionError::InvalidWavelengthGrid(format!(
                "samples {idx} and {} are not strictly increasing ({} >= {})",
                idx + 1,
                values[idx],
                values[idx + 1]
            )));
        }
        Ok(Self {
            values: Array1::from(values),
        })
    }

    /// Evenly spaced grid `start, start + step, ...` up to `stop` inclusive
    /// when `stop` falls on the grid (within half a step).
    pub fn arange(start: f64, stop: f64, step: f64) -> Result<Self> {
        if !(step > 0.0) || !step.is_finite() {
            return Err(ProjectionError::InvalidWavelengthGrid(format!(
                "step must be positive, got {step}"
            )));
        }
        let span = (stop + 0.5 * step - start) / step;
        let count = if span > 0.0 { span.ceil() as usize } else { 0 };
        Self::new((0..count).map(|k| start + k as f64 * step).collect())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a constructed grid
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All samples
    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    /// Samples `iwave..iwave + nwave`.
    pub fn range(&self, iwave: usize, nwave: usize) -> Result<ArrayView1<'_, f64>> {
        let end = iwave + nwave;
        if end > self.len() {
            return Err(ProjectionError::InvalidRange {
                axis: "wavelength",
                start: iwave,
                end,
                len: self.len(),
            });
        }
        Ok(self.values.slice(s![iwave..end]))
    }

    /// Smallest and largest wavelength
    pub fn bounds(&self) -> (f64, f64) {
        (self.values[0], self.values[self.len() - 1])
    }
}
