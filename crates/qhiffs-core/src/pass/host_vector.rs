//! Host-side fixed-width lane dispatch.

use num_complex::Complex64;
use rayon::prelude::*;
use tracing::trace;

use super::{AmplitudeKernel, DeviceInfo, ParallelPass, PassReport};
use crate::config::PassBackend;

/// Splits the range into `width`-amplitude blocks processed in parallel,
/// followed by a scalar pass over the `len % width` tail.
#[derive(Debug)]
pub struct HostVectorPass {
    width: usize,
    device_info: DeviceInfo,
}

impl HostVectorPass {
    /// Create a pass with `width` lanes per block (minimum 1).
    pub fn new(width: usize) -> Self {
        let compute_units = rayon::current_num_threads();
        Self {
            width: width.max(1),
            device_info: DeviceInfo {
                name: format!("host vector unit ({compute_units} threads)"),
                backend: PassBackend::HostVector,
                compute_units,
            },
        }
    }

    /// Lanes per block.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl ParallelPass for HostVectorPass {
    fn backend(&self) -> PassBackend {
        PassBackend::HostVector
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn run(&self, amplitudes: &mut [Complex64], kernel: &dyn AmplitudeKernel) -> PassReport {
        let size = amplitudes.len();
        let width = self.width;
        let body_len = size - size % width;
        let (body, tail) = amplitudes.split_at_mut(body_len);

        let block_writes: usize = body
            .par_chunks_exact_mut(width)
            .enumerate()
            .map(|(block_idx, block)| {
                kernel.apply_block(block_idx * width, block);
                block.len()
            })
            .sum();

        let mut tail_writes = 0;
        for (offset, amplitude) in tail.iter_mut().enumerate() {
            kernel.apply(body_len + offset, amplitude);
            tail_writes += 1;
        }

        let blocks = body_len / width;
        trace!(size, width, blocks, tail = tail_writes, "host vector pass complete");

        PassReport {
            backend: PassBackend::HostVector,
            size,
            workers: blocks,
            writes: block_writes + tail_writes,
            tail: tail_writes,
        }
    }
}
