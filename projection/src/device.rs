//! Parallel compute device and explicit host/device buffers.
//!
//! Every stage of projection-matrix construction is a data-parallel kernel:
//! one lane per sample point, per wavelength, or per `(spectrum, wavelength)`
//! pair. The [`Device`] owns a dedicated rayon pool and is the only place a
//! kernel is launched, so the partitioning and its failure modes live in one
//! spot instead of being scattered through the algorithms.
//!
//! [`ComputeBuffer`] marks the host/device boundary. Data enters a kernel
//! through [`ComputeBuffer::upload`], which makes it contiguous in standard
//! layout, and leaves through [`ComputeBuffer::download`]. On the CPU backend
//! both are plain moves or copies, but keeping them explicit makes every
//! transfer point visible at the component boundaries.

use std::time::Instant;

use ndarray::{Array, ArrayBase, ArrayView, ArrayViewMut, Data, Dimension, ShapeBuilder};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{ProjectionError, Result};

/// Data-parallel execution device backed by a dedicated rayon pool.
#[derive(Debug)]
pub struct Device {
    pool: ThreadPool,
    lanes: usize,
}

impl Device {
    /// Create a device with `lanes` worker threads, or one per core if `None`.
    ///
    /// # Errors
    /// * `KernelLaunchFailure` - zero lanes requested or the pool could not be built
    pub fn new(lanes: Option<usize>) -> Result<Self> {
        if lanes == Some(0) {
            return Err(ProjectionError::launch("device", "lane count must be positive"));
        }

        let mut builder =
            ThreadPoolBuilder::new().thread_name(|idx| format!("projection-lane-{idx}"));
        if let Some(n) = lanes {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| ProjectionError::launch("device", e.to_string()))?;
        let lanes = pool.current_num_threads();

        log::debug!("compute device ready with {lanes} lanes");
        Ok(Self { pool, lanes })
    }

    /// Number of worker lanes in the pool
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Launch `kernel` over `grid` independent work items.
    ///
    /// The body runs inside this device's pool, so any rayon parallel
    /// iterator it drives is partitioned across this device's lanes.
    ///
    /// # Errors
    /// * `KernelLaunchFailure` - the grid is empty
    pub fn launch<R, F>(&self, kernel: &str, grid: usize, body: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        if grid == 0 {
            return Err(ProjectionError::launch(kernel, "empty launch grid"));
        }

        let start = Instant::now();
        let result = self.pool.install(body);
        log::debug!(
            "kernel {kernel}: {grid} work items on {} lanes in {:.3}ms",
            self.lanes,
            start.elapsed().as_secs_f64() * 1e3
        );
        Ok(result)
    }
}

/// Array resident on the compute device.
#[derive(Debug, Clone)]
pub struct ComputeBuffer<A, D: Dimension> {
    data: Array<A, D>,
}

impl<A: Clone, D: Dimension> ComputeBuffer<A, D> {
    /// Copy a host array onto the device in contiguous standard layout.
    pub fn upload<S>(host: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = A>,
    {
        let data = host.as_standard_layout().into_owned();
        log::trace!(
            "upload {} bytes, shape {:?}",
            data.len() * std::mem::size_of::<A>(),
            data.shape()
        );
        Self { data }
    }

    /// Read-only view for kernel inputs
    pub fn view(&self) -> ArrayView<'_, A, D> {
        self.data.view()
    }

    /// Mutable view for kernel outputs
    pub fn view_mut(&mut self) -> ArrayViewMut<'_, A, D> {
        self.data.view_mut()
    }

    /// Shape of the resident array
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Move the buffer back to the host.
    pub fn download(self) -> Array<A, D> {
        log::trace!(
            "download {} bytes, shape {:?}",
            self.data.len() * std::mem::size_of::<A>(),
            self.data.shape()
        );
        self.data
    }
}

impl<D: Dimension> ComputeBuffer<f64, D> {
    /// Allocate a zero-filled output buffer on the device.
    pub fn zeros<Sh>(shape: Sh) -> Self
    where
        Sh: ShapeBuilder<Dim = D>,
    {
        Self {
            data: Array::zeros(shape),
        }
    }
}
