//! Data-parallel passes over a fixed index range.
//!
//! Evolution and correction are both "apply an independent update to every
//! amplitude". [`ParallelPass`] owns the *how* (launch geometry, blocking,
//! thread pool) and an [`AmplitudeKernel`] owns the *what*.
//!
//! | Backend | Type | Geometry |
//! |---------|------|----------|
//! | Accelerator | [`AcceleratorPass`] | `grid × block` workers, idx ≥ size skipped |
//! | Host vector | [`HostVectorPass`] | `width`-lane blocks + scalar tail |
//!
//! Both backends execute on the Rayon pool. A device binding would implement
//! [`ParallelPass`] directly and be selected through [`create_pass`].

mod accelerator;
mod host_vector;

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::{PassBackend, RunConfiguration};

pub use accelerator::AcceleratorPass;
pub use host_vector::HostVectorPass;

/// Per-index update applied by a pass.
///
/// `index` is relative to the slice handed to [`ParallelPass::run`].
pub trait AmplitudeKernel: Sync {
    /// Update one amplitude.
    fn apply(&self, index: usize, amplitude: &mut Complex64);

    /// Update a contiguous block starting at `base`.
    ///
    /// Host-vector passes call this for every full block; kernels can
    /// override it with a lane-wise implementation.
    fn apply_block(&self, base: usize, block: &mut [Complex64]) {
        for (offset, amplitude) in block.iter_mut().enumerate() {
            self.apply(base + offset, amplitude);
        }
    }
}

/// Description of the execution resource behind a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Backend kind.
    pub backend: PassBackend,
    /// Parallel execution units available.
    pub compute_units: usize,
}

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Backend that ran the pass.
    pub backend: PassBackend,
    /// Number of amplitudes in range.
    pub size: usize,
    /// Workers launched (accelerator) or blocks dispatched (host vector).
    pub workers: usize,
    /// Amplitudes written.
    pub writes: usize,
    /// Amplitudes handled by the scalar tail.
    pub tail: usize,
}

/// A data-parallel pass over `0..amplitudes.len()`.
///
/// Implementations MUST cover every index exactly once and MUST NOT write
/// any index twice. Passes are synchronous: `run` returns only after every
/// write has landed.
pub trait ParallelPass: Send + Sync + fmt::Debug {
    /// Backend kind.
    fn backend(&self) -> PassBackend;

    /// Execution resource description.
    fn device_info(&self) -> &DeviceInfo;

    /// Apply `kernel` to every amplitude.
    fn run(&self, amplitudes: &mut [Complex64], kernel: &dyn AmplitudeKernel) -> PassReport;
}

/// Build the pass selected by `backend`, sized from `config`.
pub fn create_pass(backend: PassBackend, config: &RunConfiguration) -> Arc<dyn ParallelPass> {
    match backend {
        PassBackend::Accelerator => Arc::new(AcceleratorPass::new(config.accelerator_block_dim)),
        PassBackend::HostVector => Arc::new(HostVectorPass::new(config.vector_width)),
    }
}
