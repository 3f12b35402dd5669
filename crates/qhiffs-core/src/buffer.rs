//! Per-node amplitude storage.

use std::ops::Range;

use num_complex::Complex64;

use crate::error::{CoreError, CoreResult};
use crate::topology::{NodeTopology, PartitionLayout};

/// One node's copy of the global state vector.
///
/// The node only writes its own partition during evolution; the
/// synchronizer overwrites the other partitions with peer contributions,
/// after which the whole vector is identical on every node.
#[derive(Debug, Clone)]
pub struct AmplitudeBuffer {
    amplitudes: Vec<Complex64>,
    layout: PartitionLayout,
    rank: usize,
}

impl AmplitudeBuffer {
    /// Wrap a full-length vector for `topology.rank()`.
    pub fn new(
        amplitudes: Vec<Complex64>,
        layout: PartitionLayout,
        topology: &NodeTopology,
    ) -> CoreResult<Self> {
        if amplitudes.len() != layout.states() {
            return Err(CoreError::Configuration(format!(
                "state vector has {} amplitudes, configuration expects {}",
                amplitudes.len(),
                layout.states()
            )));
        }
        if layout.total_nodes() != topology.total_nodes() {
            return Err(CoreError::Configuration(format!(
                "layout covers {} nodes, topology has {}",
                layout.total_nodes(),
                topology.total_nodes()
            )));
        }
        Ok(Self {
            amplitudes,
            layout,
            rank: topology.rank(),
        })
    }

    /// The partition layout this buffer was built with.
    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Owning rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Global index range of the local partition.
    pub fn local_range(&self) -> Range<usize> {
        self.layout.range(self.rank)
    }

    /// The local partition.
    pub fn local_partition(&self) -> &[Complex64] {
        &self.amplitudes[self.local_range()]
    }

    /// The local partition, mutably.
    pub fn local_partition_mut(&mut self) -> &mut [Complex64] {
        let range = self.local_range();
        &mut self.amplitudes[range]
    }

    /// The whole vector.
    pub fn global(&self) -> &[Complex64] {
        &self.amplitudes
    }

    /// The whole vector, mutably.
    pub fn global_mut(&mut self) -> &mut [Complex64] {
        &mut self.amplitudes
    }

    /// `Σ|a_i|²` over the whole vector.
    pub fn norm_sqr(&self) -> f64 {
        self.amplitudes.iter().map(Complex64::norm_sqr).sum()
    }

    /// Release the underlying vector.
    pub fn into_inner(self) -> Vec<Complex64> {
        self.amplitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(rank: usize) -> AmplitudeBuffer {
        let layout = PartitionLayout::new(8, 2).unwrap();
        let topology = NodeTopology::new(2, rank).unwrap();
        let amps = (0..8).map(|i| Complex64::new(i as f64, 0.0)).collect();
        AmplitudeBuffer::new(amps, layout, &topology).unwrap()
    }

    #[test]
    fn test_local_partition_view() {
        let b = buffer(1);
        assert_eq!(b.local_range(), 4..8);
        assert_eq!(b.local_partition()[0], Complex64::new(4.0, 0.0));
        assert_eq!(b.local_partition().len(), 4);
    }

    #[test]
    fn test_local_partition_mut_writes_through() {
        let mut b = buffer(0);
        b.local_partition_mut()[1] = Complex64::new(-1.0, 2.0);
        assert_eq!(b.global()[1], Complex64::new(-1.0, 2.0));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let layout = PartitionLayout::new(8, 2).unwrap();
        let topology = NodeTopology::new(2, 0).unwrap();
        let err = AmplitudeBuffer::new(vec![Complex64::default(); 7], layout, &topology);
        assert!(matches!(err, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_norm_sqr() {
        let b = buffer(0);
        // 0 + 1 + 4 + ... + 49
        assert!((b.norm_sqr() - 140.0).abs() < 1e-12);
    }
}
