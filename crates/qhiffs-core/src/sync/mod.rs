//! Cross-node state synchronization.
//!
//! The collective is a blocking all-gather: each node contributes the
//! [`PartitionFrame`] for its own range and receives every other node's
//! frame for the same cycle. [`CollectiveSynchronizer`] validates the frames
//! and merges them in rank order.
//!
//! The communication runtime sits behind [`SynchronizationTransport`]:
//!
//! | Transport | Mechanism | Use |
//! |-----------|-----------|-----|
//! | [`LocalTransport`] | shared rendezvous table + `Notify` | single-machine shared memory |
//! | [`ChannelTransport`] | one mpsc inbox per node | message passing |

mod channel;
mod local;
mod synchronizer;

use std::fmt;

use async_trait::async_trait;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

pub use channel::{ChannelMesh, ChannelTransport};
pub use local::{LocalFabric, LocalTransport};
pub use synchronizer::{CollectiveSynchronizer, SyncReport, merge_frames};

/// One node's contribution to a cycle's all-gather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFrame {
    /// Cycle the frame belongs to.
    pub cycle: u64,
    /// Contributing rank.
    pub rank: usize,
    /// Partition size the contributor was configured with.
    pub local_size: usize,
    /// The contributor's partition.
    pub amplitudes: Vec<Complex64>,
}

impl PartitionFrame {
    /// Frame carrying `amplitudes` with `local_size` taken from its length.
    pub fn new(cycle: u64, rank: usize, amplitudes: Vec<Complex64>) -> Self {
        Self {
            cycle,
            rank,
            local_size: amplitudes.len(),
            amplitudes,
        }
    }
}

/// Capability `barrier-gather`: the collective primitive behind
/// synchronization.
///
/// # Contract
///
/// - Every rank calls `barrier_gather` exactly once per cycle, in cycle
///   order.
/// - The call returns only once every rank has contributed to that cycle,
///   with one frame per rank sorted by rank (the caller's own included).
/// - The future MUST be cancel-safe: dropping it after a timeout leaves the
///   transport able to answer [`missing_ranks`](Self::missing_ranks).
#[async_trait]
pub trait SynchronizationTransport: Send + Sync + fmt::Debug {
    /// Short transport name for logs.
    fn name(&self) -> &str;

    /// Rank of this endpoint.
    fn rank(&self) -> usize;

    /// Number of endpoints in the collective.
    fn total_nodes(&self) -> usize;

    /// Contribute `frame` and wait for all frames of `frame.cycle`.
    async fn barrier_gather(&self, frame: PartitionFrame) -> CoreResult<Vec<PartitionFrame>>;

    /// Ranks whose contribution to `cycle` has not been observed.
    ///
    /// Diagnostic only; transports that cannot tell return an empty list.
    async fn missing_ranks(&self, _cycle: u64) -> Vec<usize> {
        Vec::new()
    }
}
