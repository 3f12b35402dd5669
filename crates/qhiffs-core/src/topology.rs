//! Node topology and partition layout.
//!
//! The global vector of `states` amplitudes is split into `total_nodes`
//! contiguous partitions of equal size:
//!
//! ```text
//!   rank 0           rank 1           rank 2
//! [0 .. local)    [local .. 2·local)  [2·local .. 3·local)
//! ```
//!
//! Amplitude `i` is owned by rank `i / local_size`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Cluster size and this process's rank. Fixed for the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTopology {
    total_nodes: usize,
    rank: usize,
}

impl NodeTopology {
    /// Create a topology, checking `total_nodes ≥ 1` and `rank < total_nodes`.
    pub fn new(total_nodes: usize, rank: usize) -> CoreResult<Self> {
        if total_nodes == 0 {
            return Err(CoreError::Configuration(
                "total_nodes must be at least 1".into(),
            ));
        }
        if rank >= total_nodes {
            return Err(CoreError::Configuration(format!(
                "rank {rank} out of range for {total_nodes} nodes"
            )));
        }
        Ok(Self { total_nodes, rank })
    }

    /// Single-node topology.
    pub fn single() -> Self {
        Self {
            total_nodes: 1,
            rank: 0,
        }
    }

    /// Number of participating nodes.
    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    /// This node's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Iterator over every rank in the cluster.
    pub fn ranks(&self) -> Range<usize> {
        0..self.total_nodes
    }
}

/// Partition layout shared by every node of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    states: usize,
    total_nodes: usize,
    local_size: usize,
}

impl PartitionLayout {
    /// Compute the layout, failing when `states` is not evenly divisible.
    pub fn new(states: usize, total_nodes: usize) -> CoreResult<Self> {
        if total_nodes == 0 {
            return Err(CoreError::Configuration(
                "total_nodes must be at least 1".into(),
            ));
        }
        if states == 0 {
            return Err(CoreError::Configuration("states must be positive".into()));
        }
        if states % total_nodes != 0 {
            return Err(CoreError::Configuration(format!(
                "states ({states}) is not divisible by total_nodes ({total_nodes})"
            )));
        }
        Ok(Self {
            states,
            total_nodes,
            local_size: states / total_nodes,
        })
    }

    /// Total number of amplitudes.
    pub fn states(&self) -> usize {
        self.states
    }

    /// Number of partitions.
    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    /// Amplitudes per partition.
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Global index range owned by `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        let start = rank * self.local_size;
        start..start + self.local_size
    }

    /// Rank owning global index `index`.
    pub fn owner(&self, index: usize) -> usize {
        index / self.local_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sixteen_over_two() {
        let layout = PartitionLayout::new(16, 2).unwrap();
        assert_eq!(layout.local_size(), 8);
        assert_eq!(layout.range(0), 0..8);
        assert_eq!(layout.range(1), 8..16);
        assert_eq!(layout.owner(7), 0);
        assert_eq!(layout.owner(8), 1);
    }

    #[test]
    fn test_layout_rejects_uneven_split() {
        let err = PartitionLayout::new(15, 2).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.to_string().contains("not divisible"));
    }

    #[test]
    fn test_layout_rejects_zero() {
        assert!(PartitionLayout::new(0, 2).is_err());
        assert!(PartitionLayout::new(16, 0).is_err());
    }

    #[test]
    fn test_topology_bounds() {
        assert!(NodeTopology::new(2, 1).is_ok());
        assert!(NodeTopology::new(2, 2).is_err());
        assert!(NodeTopology::new(0, 0).is_err());
        assert_eq!(NodeTopology::single().ranks().count(), 1);
    }
}
