//! The all-gather collective and rank-ordered merge.

use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{PartitionFrame, SynchronizationTransport};
use crate::buffer::AmplitudeBuffer;
use crate::error::{CoreError, CoreResult};
use crate::topology::{NodeTopology, PartitionLayout};

/// Statistics for one synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Cycle synchronized.
    pub cycle: u64,
    /// Frames merged.
    pub frames: usize,
    /// Time spent at the barrier.
    pub waited: Duration,
}

/// Makes every node's global vector identical after each cycle.
#[derive(Debug, Clone)]
pub struct CollectiveSynchronizer {
    transport: Arc<dyn SynchronizationTransport>,
    timeout: Option<Duration>,
}

impl CollectiveSynchronizer {
    /// Synchronize over `transport`, waiting at most `timeout` at the barrier.
    pub fn new(transport: Arc<dyn SynchronizationTransport>, timeout: Option<Duration>) -> Self {
        Self { transport, timeout }
    }

    /// The transport in use.
    pub fn transport(&self) -> &dyn SynchronizationTransport {
        self.transport.as_ref()
    }

    /// Fail unless the transport endpoint has the rank and cluster size of
    /// `topology`.
    pub fn check_topology(&self, topology: &NodeTopology) -> CoreResult<()> {
        if self.transport.total_nodes() != topology.total_nodes()
            || self.transport.rank() != topology.rank()
        {
            return Err(CoreError::Configuration(format!(
                "transport endpoint is rank {} of {}, topology says rank {} of {}",
                self.transport.rank(),
                self.transport.total_nodes(),
                topology.rank(),
                topology.total_nodes()
            )));
        }
        Ok(())
    }

    /// Contribute the local partition of `buffer` to `cycle` and merge every
    /// node's partition into `buffer` in rank order.
    ///
    /// Blocks until all nodes have contributed. On timeout nothing is written.
    #[instrument(skip(self, buffer, topology), fields(rank = topology.rank(), transport = self.transport.name()))]
    pub async fn synchronize(
        &self,
        cycle: u64,
        buffer: &mut AmplitudeBuffer,
        topology: &NodeTopology,
    ) -> CoreResult<SyncReport> {
        self.check_topology(topology)?;

        let layout = *buffer.layout();
        let frame = PartitionFrame::new(cycle, topology.rank(), buffer.local_partition().to_vec());
        let started = Instant::now();
        let gather = self.transport.barrier_gather(frame);

        let frames = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, gather).await {
                Ok(result) => result?,
                Err(_) => {
                    let missing_ranks = self.transport.missing_ranks(cycle).await;
                    let waited = started.elapsed();
                    warn!(cycle, ?missing_ranks, ?waited, "barrier timed out");
                    return Err(CoreError::SynchronizationTimeout {
                        cycle,
                        waited,
                        missing_ranks,
                    });
                }
            },
            None => gather.await?,
        };

        let count = frames.len();
        merge_frames(&layout, cycle, &frames, buffer.global_mut())?;
        let waited = started.elapsed();
        debug!(cycle, frames = count, ?waited, "partitions merged");

        Ok(SyncReport {
            cycle,
            frames: count,
            waited,
        })
    }
}

/// Validate `frames` against `layout` and copy each into its range of
/// `global`.
///
/// Every frame is checked before anything is written, so a rejected gather
/// leaves `global` untouched.
pub fn merge_frames(
    layout: &PartitionLayout,
    cycle: u64,
    frames: &[PartitionFrame],
    global: &mut [Complex64],
) -> CoreResult<()> {
    let expected = layout.local_size();
    let mut seen = vec![false; layout.total_nodes()];

    for frame in frames {
        let mismatch = |reason: String| CoreError::PartitionMismatch {
            rank: frame.rank,
            expected,
            found: frame.local_size,
            reason,
        };
        if frame.cycle != cycle {
            return Err(mismatch(format!(
                "frame belongs to cycle {}, not {cycle}",
                frame.cycle
            )));
        }
        if frame.rank >= layout.total_nodes() {
            return Err(mismatch(format!(
                "rank outside a {}-node topology",
                layout.total_nodes()
            )));
        }
        if frame.local_size != expected {
            return Err(mismatch("local_size differs".into()));
        }
        if frame.amplitudes.len() != frame.local_size {
            return Err(mismatch(format!(
                "frame carries {} amplitudes",
                frame.amplitudes.len()
            )));
        }
        if seen[frame.rank] {
            return Err(mismatch("duplicate contribution".into()));
        }
        seen[frame.rank] = true;
    }
    if let Some(rank) = seen.iter().position(|s| !s) {
        return Err(CoreError::PartitionMismatch {
            rank,
            expected,
            found: 0,
            reason: "no contribution received".into(),
        });
    }

    for frame in frames {
        global[layout.range(frame.rank)].copy_from_slice(&frame.amplitudes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(cycle: u64, layout: &PartitionLayout) -> Vec<PartitionFrame> {
        (0..layout.total_nodes())
            .map(|rank| {
                let amps = layout
                    .range(rank)
                    .map(|i| Complex64::new(i as f64, -(i as f64)))
                    .collect();
                PartitionFrame::new(cycle, rank, amps)
            })
            .collect()
    }

    #[test]
    fn test_merge_in_rank_order_regardless_of_arrival() {
        let layout = PartitionLayout::new(12, 3).unwrap();
        let mut incoming = frames(5, &layout);
        incoming.reverse();
        let mut global = vec![Complex64::default(); 12];

        merge_frames(&layout, 5, &incoming, &mut global).unwrap();

        for (i, a) in global.iter().enumerate() {
            assert_eq!(*a, Complex64::new(i as f64, -(i as f64)));
        }
    }

    #[test]
    fn test_merge_rejects_local_size_mismatch() {
        let layout = PartitionLayout::new(8, 2).unwrap();
        let mut incoming = frames(0, &layout);
        incoming[1] = PartitionFrame::new(0, 1, vec![Complex64::default(); 3]);
        let mut global = vec![Complex64::new(9.0, 9.0); 8];

        let err = merge_frames(&layout, 0, &incoming, &mut global).unwrap_err();
        match err {
            CoreError::PartitionMismatch {
                rank,
                expected,
                found,
                ..
            } => {
                assert_eq!((rank, expected, found), (1, 4, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        // untouched
        assert!(global.iter().all(|a| *a == Complex64::new(9.0, 9.0)));
    }

    #[test]
    fn test_merge_rejects_wrong_cycle_and_missing_rank() {
        let layout = PartitionLayout::new(8, 2).unwrap();
        let mut global = vec![Complex64::default(); 8];

        let stale = frames(1, &layout);
        assert!(merge_frames(&layout, 2, &stale, &mut global).is_err());

        let partial = vec![frames(2, &layout).remove(0)];
        let err = merge_frames(&layout, 2, &partial, &mut global).unwrap_err();
        assert!(matches!(err, CoreError::PartitionMismatch { rank: 1, .. }));
    }

    #[test]
    fn test_merge_rejects_duplicate_rank() {
        let layout = PartitionLayout::new(8, 2).unwrap();
        let mut incoming = frames(0, &layout);
        incoming[1].rank = 0;
        let mut global = vec![Complex64::default(); 8];
        assert!(merge_frames(&layout, 0, &incoming, &mut global).is_err());
    }
}
