//! Message-passing transport over tokio channels.
//!
//! Every endpoint owns one unbounded inbox and a sender into each peer's
//! inbox. A gather sends the local frame to every peer, then drains the inbox
//! until it holds one frame per peer for the current cycle. Frames that
//! arrive early for later cycles stay buffered.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use super::{PartitionFrame, SynchronizationTransport};
use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
struct Inbox {
    rx: mpsc::UnboundedReceiver<PartitionFrame>,
    /// cycle → rank → frame
    pending: BTreeMap<u64, BTreeMap<usize, PartitionFrame>>,
}

impl Inbox {
    fn accept(&mut self, frame: PartitionFrame) -> CoreResult<()> {
        let slot = self.pending.entry(frame.cycle).or_default();
        if slot.contains_key(&frame.rank) {
            return Err(CoreError::Transport(format!(
                "rank {} contributed twice to cycle {}",
                frame.rank, frame.cycle
            )));
        }
        slot.insert(frame.rank, frame);
        Ok(())
    }

    fn received(&self, cycle: u64) -> usize {
        self.pending.get(&cycle).map_or(0, BTreeMap::len)
    }
}

/// Builds a fully connected set of [`ChannelTransport`] endpoints.
#[derive(Debug)]
pub struct ChannelMesh;

impl ChannelMesh {
    /// One endpoint per rank, in rank order.
    pub fn build(total_nodes: usize) -> Vec<ChannelTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..total_nodes).map(|_| mpsc::unbounded_channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| ChannelTransport {
                rank,
                total_nodes,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox: Mutex::new(Inbox {
                    rx,
                    pending: BTreeMap::new(),
                }),
            })
            .collect()
    }
}

/// Endpoint of a [`ChannelMesh`].
#[derive(Debug)]
pub struct ChannelTransport {
    rank: usize,
    total_nodes: usize,
    /// Sender into each peer's inbox; `None` at our own rank.
    peers: Vec<Option<mpsc::UnboundedSender<PartitionFrame>>>,
    inbox: Mutex<Inbox>,
}

#[async_trait]
impl SynchronizationTransport for ChannelTransport {
    fn name(&self) -> &str {
        "channels"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    async fn barrier_gather(&self, frame: PartitionFrame) -> CoreResult<Vec<PartitionFrame>> {
        let cycle = frame.cycle;
        for (peer, tx) in self.peers.iter().enumerate() {
            if let Some(tx) = tx {
                tx.send(frame.clone()).map_err(|_| {
                    CoreError::Transport(format!("peer {peer} disconnected before cycle {cycle}"))
                })?;
            }
        }
        trace!(rank = self.rank, cycle, "frame sent to peers");

        let expected = self.total_nodes - 1;
        let mut inbox = self.inbox.lock().await;
        while inbox.received(cycle) < expected {
            match inbox.rx.recv().await {
                Some(incoming) if incoming.cycle < cycle => {
                    return Err(CoreError::Transport(format!(
                        "stale frame from rank {} for cycle {} during cycle {cycle}",
                        incoming.rank, incoming.cycle
                    )));
                }
                Some(incoming) => inbox.accept(incoming)?,
                None => {
                    return Err(CoreError::Transport(format!(
                        "all peers disconnected during cycle {cycle}"
                    )));
                }
            }
        }

        let mut frames: Vec<PartitionFrame> = inbox
            .pending
            .remove(&cycle)
            .unwrap_or_default()
            .into_values()
            .collect();
        frames.push(frame);
        frames.sort_by_key(|f| f.rank);
        Ok(frames)
    }

    async fn missing_ranks(&self, cycle: u64) -> Vec<usize> {
        let mut inbox = self.inbox.lock().await;
        while let Ok(incoming) = inbox.rx.try_recv() {
            if inbox.accept(incoming).is_err() {
                break;
            }
        }
        let seen = inbox.pending.get(&cycle);
        (0..self.total_nodes)
            .filter(|rank| *rank != self.rank && seen.is_none_or(|m| !m.contains_key(rank)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(cycle: u64, rank: usize) -> PartitionFrame {
        PartitionFrame::new(cycle, rank, vec![Complex64::new(cycle as f64, rank as f64)])
    }

    #[tokio::test]
    async fn test_gather_over_two_cycles() {
        let endpoints: Vec<Arc<ChannelTransport>> =
            ChannelMesh::build(3).into_iter().map(Arc::new).collect();

        let handles: Vec<_> = endpoints
            .iter()
            .cloned()
            .map(|t| {
                tokio::spawn(async move {
                    let first = t.barrier_gather(frame(0, t.rank())).await?;
                    let second = t.barrier_gather(frame(1, t.rank())).await?;
                    CoreResult::Ok((first, second))
                })
            })
            .collect();

        for handle in handles {
            let (first, second) = handle.await.unwrap().unwrap();
            assert_eq!(first.len(), 3);
            assert!(first.iter().all(|f| f.cycle == 0));
            assert!(second.iter().all(|f| f.cycle == 1));
            assert_eq!(
                second.iter().map(|f| f.rank).collect::<Vec<_>>(),
                vec![0, 1, 2]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ranks_after_timeout() {
        let mut endpoints = ChannelMesh::build(3);
        let t2 = endpoints.pop().unwrap();
        let t1 = endpoints.pop().unwrap();
        let t0 = endpoints.pop().unwrap();

        // rank 1 contributes, rank 2 stays silent
        let _ = tokio::time::timeout(Duration::from_millis(5), t1.barrier_gather(frame(0, 1))).await;
        let waited =
            tokio::time::timeout(Duration::from_millis(5), t0.barrier_gather(frame(0, 0))).await;
        assert!(waited.is_err());
        assert_eq!(t0.missing_ranks(0).await, vec![2]);
        drop(t2);
    }

    #[tokio::test]
    async fn test_disconnected_peer() {
        let mut endpoints = ChannelMesh::build(2);
        let t1 = endpoints.pop().unwrap();
        let t0 = endpoints.pop().unwrap();
        drop(t1);
        let err = t0.barrier_gather(frame(0, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }
}
