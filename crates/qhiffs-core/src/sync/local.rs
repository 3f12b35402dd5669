//! Shared-memory rendezvous transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::trace;

use super::{PartitionFrame, SynchronizationTransport};
use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
struct Round {
    frames: Vec<Option<PartitionFrame>>,
    collected: Vec<bool>,
}

impl Round {
    fn new(total_nodes: usize) -> Self {
        Self {
            frames: vec![None; total_nodes],
            collected: vec![false; total_nodes],
        }
    }

    fn is_complete(&self) -> bool {
        self.frames.iter().all(Option::is_some)
    }
}

#[derive(Debug)]
struct Rendezvous {
    total_nodes: usize,
    rounds: Mutex<HashMap<u64, Round>>,
    notify: Notify,
}

impl Rendezvous {
    fn rounds(&self) -> CoreResult<MutexGuard<'_, HashMap<u64, Round>>> {
        self.rounds
            .lock()
            .map_err(|_| CoreError::Transport("rendezvous table poisoned".into()))
    }

    fn deposit(&self, rank: usize, frame: PartitionFrame) -> CoreResult<()> {
        let cycle = frame.cycle;
        let mut rounds = self.rounds()?;
        let round = rounds
            .entry(cycle)
            .or_insert_with(|| Round::new(self.total_nodes));
        if round.frames[rank].is_some() {
            return Err(CoreError::Transport(format!(
                "rank {rank} contributed twice to cycle {cycle}"
            )));
        }
        round.frames[rank] = Some(frame);
        Ok(())
    }

    /// Clone out every frame of `cycle` once all have arrived. The round is
    /// dropped after the last rank has collected it.
    fn try_collect(&self, cycle: u64, rank: usize) -> CoreResult<Option<Vec<PartitionFrame>>> {
        let mut rounds = self.rounds()?;
        let Some(round) = rounds.get_mut(&cycle) else {
            return Ok(None);
        };
        if !round.is_complete() {
            return Ok(None);
        }
        let frames: Vec<PartitionFrame> = round.frames.iter().flatten().cloned().collect();
        round.collected[rank] = true;
        if round.collected.iter().all(|c| *c) {
            rounds.remove(&cycle);
        }
        Ok(Some(frames))
    }
}

/// Builds connected [`LocalTransport`] endpoints for one process.
#[derive(Debug, Clone)]
pub struct LocalFabric {
    shared: Arc<Rendezvous>,
}

impl LocalFabric {
    /// Create a fabric for `total_nodes` endpoints.
    pub fn new(total_nodes: usize) -> Self {
        Self {
            shared: Arc::new(Rendezvous {
                total_nodes,
                rounds: Mutex::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// The endpoint for `rank`.
    pub fn endpoint(&self, rank: usize) -> CoreResult<LocalTransport> {
        if rank >= self.shared.total_nodes {
            return Err(CoreError::Configuration(format!(
                "rank {rank} out of range for a fabric of {} nodes",
                self.shared.total_nodes
            )));
        }
        Ok(LocalTransport {
            rank,
            shared: Arc::clone(&self.shared),
        })
    }

    /// One endpoint per rank, in rank order.
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        (0..self.shared.total_nodes)
            .map(|rank| LocalTransport {
                rank,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }
}

/// Endpoint of a [`LocalFabric`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    rank: usize,
    shared: Arc<Rendezvous>,
}

#[async_trait]
impl SynchronizationTransport for LocalTransport {
    fn name(&self) -> &str {
        "shared-memory"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn total_nodes(&self) -> usize {
        self.shared.total_nodes
    }

    async fn barrier_gather(&self, frame: PartitionFrame) -> CoreResult<Vec<PartitionFrame>> {
        let cycle = frame.cycle;
        self.shared.deposit(self.rank, frame)?;
        trace!(rank = self.rank, cycle, "frame deposited");
        self.shared.notify.notify_waiters();

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a deposit between the check and
            // the await still wakes us.
            notified.as_mut().enable();

            if let Some(frames) = self.shared.try_collect(cycle, self.rank)? {
                return Ok(frames);
            }
            notified.await;
        }
    }

    async fn missing_ranks(&self, cycle: u64) -> Vec<usize> {
        let Ok(rounds) = self.shared.rounds() else {
            return Vec::new();
        };
        rounds.get(&cycle).map_or_else(Vec::new, |round| {
            round
                .frames
                .iter()
                .enumerate()
                .filter(|(_, f)| f.is_none())
                .map(|(rank, _)| rank)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn frame(cycle: u64, rank: usize) -> PartitionFrame {
        PartitionFrame::new(cycle, rank, vec![Complex64::new(rank as f64, 0.0); 2])
    }

    #[tokio::test]
    async fn test_gather_three_nodes() {
        let fabric = LocalFabric::new(3);
        let handles: Vec<_> = fabric
            .endpoints()
            .into_iter()
            .map(|t| tokio::spawn(async move { t.barrier_gather(frame(0, t.rank())).await }))
            .collect();

        for handle in handles {
            let frames = handle.await.unwrap().unwrap();
            let ranks: Vec<usize> = frames.iter().map(|f| f.rank).collect();
            assert_eq!(ranks, vec![0, 1, 2]);
        }
        assert!(fabric.shared.rounds().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_contribution_rejected() {
        let fabric = LocalFabric::new(2);
        let t = fabric.endpoint(0).unwrap();
        fabric.shared.deposit(0, frame(4, 0)).unwrap();
        let err = t.barrier_gather(frame(4, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ranks_reported() {
        let fabric = LocalFabric::new(3);
        let t0 = fabric.endpoint(0).unwrap();
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            t0.barrier_gather(frame(0, 0)),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(t0.missing_ranks(0).await, vec![1, 2]);
    }

    #[test]
    fn test_endpoint_out_of_range() {
        assert!(LocalFabric::new(2).endpoint(2).is_err());
    }
}
