//! Accelerator-style dispatch.
//!
//! Mirrors a kernel launch: `grid_dim = ceil(size / block_dim)` blocks of
//! `block_dim` workers, worker `(b, t)` owns global index
//! `b * block_dim + t` and does nothing when that index is out of range.
//! Blocks are scheduled on the Rayon pool.

use num_complex::Complex64;
use rayon::prelude::*;
use tracing::trace;

use super::{AmplitudeKernel, DeviceInfo, ParallelPass, PassReport};
use crate::config::PassBackend;

/// Grid/block dispatched pass.
#[derive(Debug)]
pub struct AcceleratorPass {
    block_dim: usize,
    device_info: DeviceInfo,
}

impl AcceleratorPass {
    /// Create a pass with `block_dim` workers per block (minimum 1).
    pub fn new(block_dim: usize) -> Self {
        let compute_units = rayon::current_num_threads();
        Self {
            block_dim: block_dim.max(1),
            device_info: DeviceInfo {
                name: format!("emulated accelerator ({compute_units} streams)"),
                backend: PassBackend::Accelerator,
                compute_units,
            },
        }
    }

    /// Workers per block.
    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    /// Number of blocks launched for `size` indices.
    pub fn grid_dim(&self, size: usize) -> usize {
        size.div_ceil(self.block_dim)
    }
}

impl ParallelPass for AcceleratorPass {
    fn backend(&self) -> PassBackend {
        PassBackend::Accelerator
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn run(&self, amplitudes: &mut [Complex64], kernel: &dyn AmplitudeKernel) -> PassReport {
        let size = amplitudes.len();
        let block_dim = self.block_dim;
        let grid_dim = self.grid_dim(size);

        let writes: usize = amplitudes
            .par_chunks_mut(block_dim)
            .enumerate()
            .map(|(block_idx, block)| {
                let mut written = 0;
                for thread_idx in 0..block_dim {
                    let idx = block_idx * block_dim + thread_idx;
                    if idx < size {
                        kernel.apply(idx, &mut block[thread_idx]);
                        written += 1;
                    }
                }
                written
            })
            .sum();

        trace!(size, grid_dim, block_dim, writes, "accelerator pass complete");

        PassReport {
            backend: PassBackend::Accelerator,
            size,
            workers: grid_dim * block_dim,
            writes,
            tail: 0,
        }
    }
}
