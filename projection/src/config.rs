//! Configuration for bundle projection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of spectra per bundle
pub const DEFAULT_BUNDLE_SIZE: usize = 25;

/// Default number of wavelength samples per assembly patch
pub const DEFAULT_WAVE_STEP: usize = 50;

/// Tunable parameters for projecting a bundle of spectra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Worker lanes for the compute device; `None` uses one per core
    pub lanes: Option<usize>,

    /// Re-run matrix assembly under a second lane grouping and fail on any
    /// bitwise difference
    pub verify_reproducibility: bool,

    /// Spectra per bundle
    pub bundle_size: usize,

    /// Wavelength samples per assembly patch
    pub wave_step: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            lanes: None,
            verify_reproducibility: false,
            bundle_size: DEFAULT_BUNDLE_SIZE,
            wave_step: DEFAULT_WAVE_STEP,
        }
    }
}

impl ProjectionConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file. Missing fields take their default values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
