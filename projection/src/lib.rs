//! Spectrograph projection matrices from Gauss-Hermite PSF calibrations
//!
//! This crate builds the linear forward model `image ≈ A · flux` that maps
//! per-spectrum, per-wavelength flux onto detector pixels. The pipeline runs
//! strictly forward:
//!
//! calibration table → PSF parameters → spot cache → design matrix
//!
//! Each stage is a data-parallel kernel on a [`Device`]: Legendre evaluation
//! per wavelength sample, spot combination per wavelength, and matrix scatter
//! per `(spectrum, wavelength)` pair.

pub mod assembly;
pub mod bundle;
pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod params;
pub mod spots;
pub mod synthetic;
pub mod wavelength;

// Re-exports for easier access
pub use assembly::{assemble, assemble_verified, BoundingBox, ProjectionMatrix};
pub use bundle::{bundle_ranges, BundleProjection, BundleProjector};
pub use calibration::{ByteOrder, CalibrationMeta, CalibrationTable, ParamKind};
pub use config::ProjectionConfig;
pub use device::{ComputeBuffer, Device};
pub use error::{ProjectionError, Result};
pub use params::{PixelCorners, PsfParameterSet};
pub use spots::{multispot, pixelated_gauss_hermite, PixelGaussHermite, SpotCache};
pub use synthetic::SyntheticPsf;
pub use wavelength::WavelengthGrid;
