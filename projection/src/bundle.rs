//! Bundle-level projection pipeline.
//!
//! Runs the stages in order for one contiguous bundle of spectra:
//! PSF parameters, footprint corners, spot cache, then the design matrix.

use std::ops::Range;
use std::time::Instant;

use crate::assembly::{assemble, assemble_verified, ProjectionMatrix};
use crate::calibration::CalibrationTable;
use crate::config::ProjectionConfig;
use crate::device::Device;
use crate::error::{ProjectionError, Result};
use crate::params::{PixelCorners, PsfParameterSet};
use crate::spots::SpotCache;
use crate::wavelength::WavelengthGrid;

/// Split `specmin..specmin + nspec` into bundles aligned on multiples of
/// `bundle_size`; the first and last bundle may be partial.
pub fn bundle_ranges(
    specmin: usize,
    nspec: usize,
    bundle_size: usize,
) -> Result<Vec<Range<usize>>> {
    if bundle_size == 0 {
        return Err(ProjectionError::InvalidRange {
            axis: "bundle",
            start: specmin,
            end: specmin + nspec,
            len: 0,
        });
    }

    let specmax = specmin + nspec;
    let mut ranges = Vec::new();
    let mut start = specmin;
    while start < specmax {
        let end = ((start / bundle_size + 1) * bundle_size).min(specmax);
        ranges.push(start..end);
        start = end;
    }
    Ok(ranges)
}

/// Everything computed for one bundle.
#[derive(Debug, Clone)]
pub struct BundleProjection {
    pub params: PsfParameterSet,
    pub spots: SpotCache,
    pub corners: PixelCorners,
    /// Design matrix over the whole bundle and wavelength grid
    pub matrix: ProjectionMatrix,
}

/// Builds design matrices for bundles of spectra from one calibration table.
#[derive(Debug)]
pub struct BundleProjector {
    config: ProjectionConfig,
    device: Device,
    calibration: CalibrationTable,
}

impl BundleProjector {
    pub fn new(config: ProjectionConfig, calibration: CalibrationTable) -> Result<Self> {
        let device = Device::new(config.lanes)?;
        Ok(Self {
            config,
            device,
            calibration,
        })
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Bundles covering `specmin..specmin + nspec` at the configured size
    pub fn bundles(&self, specmin: usize, nspec: usize) -> Result<Vec<Range<usize>>> {
        bundle_ranges(specmin, nspec, self.config.bundle_size)
    }

    /// Project spectra `specmin..specmin + nspec` onto the detector.
    pub fn project(
        &self,
        wavelengths: &WavelengthGrid,
        specmin: usize,
        nspec: usize,
    ) -> Result<BundleProjection> {
        let start = Instant::now();

        let params = PsfParameterSet::evaluate_spectra(
            &self.device,
            wavelengths,
            &self.calibration,
            specmin,
            nspec,
        )?;
        let corners = params.corners()?;
        let spots = SpotCache::build(&self.device, &params)?;
        let matrix = self.assemble(&spots, &corners, 0, nspec, 0, wavelengths.len())?;

        let (ny, nx, _, _) = matrix.dim();
        log::info!(
            "bundle {specmin}..{}: {nspec} spectra x {} wavelengths -> {ny}x{nx} pixels in {:.1}ms",
            specmin + nspec,
            wavelengths.len(),
            start.elapsed().as_secs_f64() * 1e3
        );

        Ok(BundleProjection {
            params,
            spots,
            corners,
            matrix,
        })
    }

    /// Design matrix for wavelengths `iwave..iwave + nwave` of a projected
    /// bundle, on that patch's own bounding box.
    pub fn project_patch(
        &self,
        bundle: &BundleProjection,
        iwave: usize,
        nwave: usize,
    ) -> Result<ProjectionMatrix> {
        let nspec = bundle.params.nspec();
        self.assemble(&bundle.spots, &bundle.corners, 0, nspec, iwave, nwave)
    }

    /// Consecutive patches of `wave_step` wavelengths spanning the bundle.
    pub fn project_patches(&self, bundle: &BundleProjection) -> Result<Vec<ProjectionMatrix>> {
        let nwave = bundle.params.nwave();
        let step = self.config.wave_step.max(1);
        (0..nwave)
            .step_by(step)
            .map(|iwave| self.project_patch(bundle, iwave, step.min(nwave - iwave)))
            .collect()
    }

    fn assemble(
        &self,
        spots: &SpotCache,
        corners: &PixelCorners,
        ispec: usize,
        nspec: usize,
        iwave: usize,
        nwave: usize,
    ) -> Result<ProjectionMatrix> {
        if self.config.verify_reproducibility {
            assemble_verified(&self.device, spots, corners, ispec, nspec, iwave, nwave)
        } else {
            assemble(&self.device, spots, corners, ispec, nspec, iwave, nwave)
        }
    }
}
