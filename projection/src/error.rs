//! Error type shared by every stage of projection-matrix construction.

use spectro_math::BasisError;
use thiserror::Error;

/// Errors that can occur while building a projection matrix for a bundle.
///
/// Every variant is fatal to the bundle being processed; there is no
/// partial-result recovery inside assembly.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// Calibration table shape or metadata is inconsistent
    #[error("malformed calibration (parameter {param:?}): {reason}")]
    MalformedCalibration { param: Option<String>, reason: String },

    /// Footprint size or PSF sigma is not positive
    #[error("degenerate footprint (spectrum {spectrum:?}): {reason}")]
    DegenerateFootprint {
        spectrum: Option<usize>,
        reason: String,
    },

    /// A parallel kernel could not be launched
    #[error("failed to launch kernel `{kernel}`: {reason}")]
    KernelLaunchFailure { kernel: String, reason: String },

    /// Two lane groupings of the same assembly disagree
    #[error("non-reproducible assembly: {cells} cells differ, max |diff| = {max_abs_diff:e}")]
    NonReproducibleAssembly { cells: usize, max_abs_diff: f64 },

    /// Wavelength grid is empty, non-finite or not strictly increasing
    #[error("invalid wavelength grid: {0}")]
    InvalidWavelengthGrid(String),

    /// Requested spectrum or wavelength range is outside the available data
    #[error("{axis} range {start}..{end} exceeds available length {len}")]
    InvalidRange {
        axis: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("polynomial basis error: {0}")]
    Basis(#[from] BasisError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProjectionError {
    pub(crate) fn malformed(param: Option<&str>, reason: impl Into<String>) -> Self {
        Self::MalformedCalibration {
            param: param.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(spectrum: Option<usize>, reason: impl Into<String>) -> Self {
        Self::DegenerateFootprint {
            spectrum,
            reason: reason.into(),
        }
    }

    pub(crate) fn launch(kernel: &str, reason: impl Into<String>) -> Self {
        Self::KernelLaunchFailure {
            kernel: kernel.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProjectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = ProjectionError::malformed(Some("GH-3-0"), "degree outside range");
        let text = err.to_string();
        assert!(text.contains("GH-3-0"));
        assert!(text.contains("degree outside range"));

        let err = ProjectionError::degenerate(Some(17), "GHSIGX <= 0");
        assert!(err.to_string().contains("17"));

        let err = ProjectionError::launch("multispot", "zero lanes");
        assert!(err.to_string().contains("multispot"));
    }
}
