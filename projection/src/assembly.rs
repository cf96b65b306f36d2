//! Projection (design) matrix assembly.
//!
//! A is indexed `[pixel_y, pixel_x, spectrum, wavelength]` over the bounding
//! box of every footprint in the requested sub-range. Each `(spectrum,
//! wavelength)` column is an image plane of its own, so the scatter kernel
//! gives every pair its own lane and its own plane: writes from different
//! lanes never touch the same cell. Inside a lane the spot is accumulated
//! into the plane, never assigned.

use std::ops::Range;

use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, ArrayViewMut2, Axis};
use rayon::prelude::*;

use crate::device::{ComputeBuffer, Device};
use crate::error::{ProjectionError, Result};
use crate::params::PixelCorners;
use crate::spots::SpotCache;

/// Detector region covered by a set of footprints, half-open on the max side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: i64,
    pub xmax: i64,
    pub ymin: i64,
    pub ymax: i64,
}

impl BoundingBox {
    /// Smallest box holding every footprint for `specs` x `waves`.
    pub fn enclosing(
        corners: &PixelCorners,
        specs: Range<usize>,
        waves: Range<usize>,
        hsizex: usize,
        hsizey: usize,
    ) -> Result<Self> {
        let (nspec, nwave) = corners.dim();
        check_range("spectrum", &specs, nspec)?;
        check_range("wavelength", &waves, nwave)?;

        let xc = corners.x.slice(s![specs.clone(), waves.clone()]);
        let yc = corners.y.slice(s![specs, waves]);
        // ranges are non-empty, so the folds see at least one corner
        let (xmin, xmax) = xc
            .iter()
            .fold((i64::MAX, i64::MIN), |(lo, hi), &c| (lo.min(c), hi.max(c)));
        let (ymin, ymax) = yc
            .iter()
            .fold((i64::MAX, i64::MIN), |(lo, hi), &c| (lo.min(c), hi.max(c)));

        Ok(Self {
            xmin,
            xmax: xmax + hsizex as i64,
            ymin,
            ymax: ymax + hsizey as i64,
        })
    }

    /// Width in pixels
    pub fn nx(&self) -> usize {
        (self.xmax - self.xmin) as usize
    }

    /// Height in pixels
    pub fn ny(&self) -> usize {
        (self.ymax - self.ymin) as usize
    }
}

fn check_range(axis: &'static str, range: &Range<usize>, len: usize) -> Result<()> {
    if range.is_empty() || range.end > len {
        return Err(ProjectionError::InvalidRange {
            axis,
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// Assembled design matrix for a spectrum x wavelength sub-range.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMatrix {
    bbox: BoundingBox,
    ispec: usize,
    iwave: usize,
    /// One image plane per column, `[nspec, nwave, ny, nx]`
    columns: Array4<f64>,
}

impl ProjectionMatrix {
    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    /// First local spectrum of the sub-range
    pub fn ispec(&self) -> usize {
        self.ispec
    }

    /// First wavelength index of the sub-range
    pub fn iwave(&self) -> usize {
        self.iwave
    }

    /// `(ny, nx, nspec, nwave)`
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        let (nspec, nwave, ny, nx) = self.columns.dim();
        (ny, nx, nspec, nwave)
    }

    /// `A[y, x, i, j]`
    pub fn get(&self, y: usize, x: usize, i: usize, j: usize) -> f64 {
        self.columns[[i, j, y, x]]
    }

    /// Logical `[pixel_y, pixel_x, spectrum, wavelength]` view
    pub fn view(&self) -> ArrayView4<'_, f64> {
        self.columns.view().permuted_axes([2, 3, 0, 1])
    }

    /// Image plane of column `(i, j)`
    pub fn column(&self, i: usize, j: usize) -> ArrayView2<'_, f64> {
        self.columns.slice(s![i, j, .., ..])
    }

    /// Flattened `(ny * nx) x (nspec * nwave)` matrix for a linear solver.
    pub fn to_dense(&self) -> Result<Array2<f64>> {
        let (ny, nx, nspec, nwave) = self.dim();
        Ok(self
            .view()
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((ny * nx, nspec * nwave))?)
    }

    /// Model image `A · flux` for `flux[spectrum, wavelength]`.
    pub fn apply(&self, flux: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (ny, nx, nspec, nwave) = self.dim();
        if flux.dim() != (nspec, nwave) {
            return Err(ProjectionError::InvalidRange {
                axis: "flux",
                start: 0,
                end: flux.len(),
                len: nspec * nwave,
            });
        }

        let mut image = Array2::zeros((ny, nx));
        for ((i, j), &f) in flux.indexed_iter() {
            image.scaled_add(f, &self.column(i, j));
        }
        Ok(image)
    }
}

/// Lane partitioning of the scatter kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneGrouping {
    /// One lane per `(spectrum, wavelength)` pair
    Pair,
    /// One lane per spectrum, wavelengths in sequence
    Spectrum,
}

/// Scatter spots `ispec..ispec + nspec` x `iwave..iwave + nwave` into a new
/// design matrix.
///
/// # Errors
/// * `InvalidRange` - the sub-range exceeds the spot cache or corners
/// * `KernelLaunchFailure` - the scatter kernel could not run
pub fn assemble(
    device: &Device,
    spots: &SpotCache,
    corners: &PixelCorners,
    ispec: usize,
    nspec: usize,
    iwave: usize,
    nwave: usize,
) -> Result<ProjectionMatrix> {
    scatter(device, spots, corners, ispec, nspec, iwave, nwave, LaneGrouping::Pair)
}

/// [`assemble`], then re-run the scatter with one lane per spectrum and fail
/// unless both results agree bit for bit.
///
/// Both runs accumulate and both keep each lane's writes inside its own
/// column planes, so this detects defects in the scatter itself (lost or
/// misplaced contributions, grouping-dependent indexing). It cannot observe
/// a write race between lanes; the column-plane ownership rules that out.
///
/// # Errors
/// * `NonReproducibleAssembly` - the two groupings disagree in any cell
pub fn assemble_verified(
    device: &Device,
    spots: &SpotCache,
    corners: &PixelCorners,
    ispec: usize,
    nspec: usize,
    iwave: usize,
    nwave: usize,
) -> Result<ProjectionMatrix> {
    let matrix = assemble(device, spots, corners, ispec, nspec, iwave, nwave)?;
    let check = scatter(
        device,
        spots,
        corners,
        ispec,
        nspec,
        iwave,
        nwave,
        LaneGrouping::Spectrum,
    )?;
    compare_bitwise(matrix.view(), check.view())?;
    log::debug!("assembly of {nspec}x{nwave} columns verified under two lane groupings");
    Ok(matrix)
}

/// Count cells whose bit patterns differ between two assemblies.
pub fn compare_bitwise(a: ArrayView4<f64>, b: ArrayView4<f64>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(ProjectionError::NonReproducibleAssembly {
            cells: a.len().max(b.len()),
            max_abs_diff: f64::INFINITY,
        });
    }

    let (cells, max_abs_diff) = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.to_bits() != y.to_bits())
        .fold((0usize, 0.0f64), |(n, worst), (x, y)| {
            (n + 1, worst.max((x - y).abs()))
        });
    if cells > 0 {
        return Err(ProjectionError::NonReproducibleAssembly {
            cells,
            max_abs_diff,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn scatter(
    device: &Device,
    spots: &SpotCache,
    corners: &PixelCorners,
    ispec: usize,
    nspec: usize,
    iwave: usize,
    nwave: usize,
    grouping: LaneGrouping,
) -> Result<ProjectionMatrix> {
    let (cache_nspec, cache_nwave, hsizey, hsizex) = spots.dim();
    if corners.dim() != (cache_nspec, cache_nwave) {
        return Err(ProjectionError::launch(
            "projection_matrix",
            format!(
                "corners {:?} do not match spot cache {:?}",
                corners.dim(),
                (cache_nspec, cache_nwave)
            ),
        ));
    }
    let specs = ispec..ispec + nspec;
    let waves = iwave..iwave + nwave;
    check_range("spectrum", &specs, cache_nspec)?;
    check_range("wavelength", &waves, cache_nwave)?;

    let bbox = BoundingBox::enclosing(corners, specs.clone(), waves.clone(), hsizex, hsizey)?;
    let (ny, nx) = (bbox.ny(), bbox.nx());

    let spot_buf =
        ComputeBuffer::upload(&spots.view().slice(s![specs.clone(), waves.clone(), .., ..]));
    let xc = ComputeBuffer::upload(&corners.x.slice(s![specs.clone(), waves.clone()]));
    let yc = ComputeBuffer::upload(&corners.y.slice(s![specs, waves]));
    let mut columns = ComputeBuffer::<f64, _>::zeros((nspec, nwave, ny, nx));

    let local_corner = |i: usize, j: usize| {
        (
            (yc.view()[[i, j]] - bbox.ymin) as usize,
            (xc.view()[[i, j]] - bbox.xmin) as usize,
        )
    };

    match grouping {
        LaneGrouping::Pair => {
            let spots = spot_buf.view();
            let mut planes = columns
                .view_mut()
                .into_shape_with_order((nspec * nwave, ny, nx))?;
            device.launch("projection_matrix", nspec * nwave, || {
                planes
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(k, plane)| {
                        let (i, j) = (k / nwave, k % nwave);
                        let spot = spots.slice(s![i, j, .., ..]);
                        accumulate_spot(plane, spot, local_corner(i, j));
                    });
            })?;
        }
        LaneGrouping::Spectrum => {
            let spots = spot_buf.view();
            device.launch("projection_matrix_by_spectrum", nspec, || {
                columns
                    .view_mut()
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(i, mut planes)| {
                        for (j, plane) in planes.axis_iter_mut(Axis(0)).enumerate() {
                            let spot = spots.slice(s![i, j, .., ..]);
                            accumulate_spot(plane, spot, local_corner(i, j));
                        }
                    });
            })?;
        }
    }

    log::debug!(
        "assembled A[{ny}, {nx}, {nspec}, {nwave}] over x {}..{}, y {}..{}",
        bbox.xmin,
        bbox.xmax,
        bbox.ymin,
        bbox.ymax
    );

    Ok(ProjectionMatrix {
        bbox,
        ispec,
        iwave,
        columns: columns.download(),
    })
}

/// `plane[iyc + dy, ixc + dx] += spot[dy, dx]` over the whole footprint.
fn accumulate_spot(
    mut plane: ArrayViewMut2<f64>,
    spot: ArrayView2<f64>,
    corner: (usize, usize),
) {
    let (iyc, ixc) = corner;
    let (ny, nx) = spot.dim();
    let mut block = plane.slice_mut(s![iyc..iyc + ny, ixc..ixc + nx]);
    block += &spot;
}
