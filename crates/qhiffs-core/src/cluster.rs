//! Single-process cluster bootstrap.
//!
//! Spawns one tokio task per rank, each driving its own
//! [`CycleOrchestrator`] over an in-process transport, and joins them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfiguration;
use crate::error::CoreError;
use crate::hamiltonian::HamiltonianOperator;
use crate::orchestrator::{ConvergenceSignal, CycleOrchestrator, CycleState, RunFailure, RunOutcome};
use crate::sync::{ChannelMesh, LocalFabric, SynchronizationTransport};
use crate::topology::NodeTopology;

/// In-process transport used to connect the ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// [`LocalFabric`] rendezvous table.
    #[default]
    SharedMemory,
    /// [`ChannelMesh`] message passing.
    Channels,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::SharedMemory => f.write_str("shared-memory"),
            TransportKind::Channels => f.write_str("channels"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared-memory" | "shm" | "local" => Ok(TransportKind::SharedMemory),
            "channels" | "channel" | "mpsc" => Ok(TransportKind::Channels),
            other => Err(CoreError::Configuration(format!(
                "unknown transport '{other}' (expected shared-memory or channels)"
            ))),
        }
    }
}

/// Every rank's outcome, in rank order.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    /// One outcome per rank, in rank order.
    pub outcomes: Vec<RunOutcome>,
}

impl ClusterOutcome {
    /// The agreed global vector.
    pub fn amplitudes(&self) -> &[Complex64] {
        self.outcomes
            .first()
            .map_or(&[], |o| o.amplitudes.as_slice())
    }

    /// Cycles completed by every rank.
    pub fn cycles(&self) -> u64 {
        self.outcomes.first().map_or(0, |o| o.cycles)
    }
}

/// N orchestrators in one process.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    config: RunConfiguration,
    hamiltonian: HamiltonianOperator,
    transport: TransportKind,
    total_nodes: usize,
}

impl LocalCluster {
    /// A cluster of `total_nodes` ranks.
    pub fn new(
        config: RunConfiguration,
        hamiltonian: HamiltonianOperator,
        total_nodes: usize,
        transport: TransportKind,
    ) -> Self {
        Self {
            config,
            hamiltonian,
            transport,
            total_nodes,
        }
    }

    /// Number of ranks.
    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    fn endpoints(&self) -> Vec<Arc<dyn SynchronizationTransport>> {
        match self.transport {
            TransportKind::SharedMemory => LocalFabric::new(self.total_nodes)
                .endpoints()
                .into_iter()
                .map(|t| Arc::new(t) as Arc<dyn SynchronizationTransport>)
                .collect(),
            TransportKind::Channels => ChannelMesh::build(self.total_nodes)
                .into_iter()
                .map(|t| Arc::new(t) as Arc<dyn SynchronizationTransport>)
                .collect(),
        }
    }

    /// Run every rank from `initial` until the step limit or `convergence`.
    ///
    /// Every orchestrator is built before any task starts, so configuration
    /// errors surface without a single step having run. On failure the
    /// lowest failing rank is reported.
    pub async fn run<C>(
        &self,
        initial: Vec<Complex64>,
        convergence: C,
    ) -> Result<ClusterOutcome, RunFailure>
    where
        C: ConvergenceSignal + 'static,
    {
        let setup_failure = |rank: usize, error: CoreError| RunFailure {
            rank,
            cycle: 0,
            stage: CycleState::Idle,
            error,
        };

        if self.total_nodes == 0 {
            return Err(setup_failure(
                0,
                CoreError::Configuration("cluster needs at least one node".into()),
            ));
        }

        let mut orchestrators = Vec::with_capacity(self.total_nodes);
        for (rank, transport) in self.endpoints().into_iter().enumerate() {
            let topology =
                NodeTopology::new(self.total_nodes, rank).map_err(|e| setup_failure(rank, e))?;
            let orchestrator = CycleOrchestrator::new(
                self.config.clone(),
                topology,
                self.hamiltonian.clone(),
                initial.clone(),
                transport,
            )
            .map_err(|e| setup_failure(rank, e))?;
            orchestrators.push(orchestrator);
        }

        info!(
            nodes = self.total_nodes,
            transport = %self.transport,
            states = self.config.states,
            "starting local cluster"
        );

        let convergence = Arc::new(convergence);
        let handles: Vec<_> = orchestrators
            .into_iter()
            .map(|mut orchestrator| {
                let convergence = Arc::clone(&convergence);
                tokio::spawn(async move { orchestrator.run(convergence.as_ref()).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (rank, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(failure)) => failures.push(failure),
                Err(join) => failures.push(RunFailure {
                    rank,
                    cycle: 0,
                    stage: CycleState::Failed,
                    error: CoreError::Transport(format!("node task aborted: {join}")),
                }),
            }
        }

        if let Some(first) = failures.into_iter().min_by_key(|f| f.rank) {
            return Err(first);
        }

        check_consensus(&outcomes).map_err(|e| {
            warn!(error = %e, "cluster finished without consensus");
            let rank = match &e {
                CoreError::ConsensusViolation { rank } => *rank,
                _ => 0,
            };
            RunFailure {
                rank,
                cycle: outcomes.get(rank).map_or(0, |o| o.cycles),
                stage: CycleState::Done,
                error: e,
            }
        })?;

        Ok(ClusterOutcome { outcomes })
    }
}

/// Every outcome must match rank 0 bit for bit.
pub fn check_consensus(outcomes: &[RunOutcome]) -> Result<(), CoreError> {
    let Some(reference) = outcomes.first() else {
        return Ok(());
    };
    for outcome in &outcomes[1..] {
        let same = outcome.cycles == reference.cycles
            && outcome.amplitudes.len() == reference.amplitudes.len()
            && outcome
                .amplitudes
                .iter()
                .zip(&reference.amplitudes)
                .all(|(a, b)| {
                    a.re.to_bits() == b.re.to_bits() && a.im.to_bits() == b.im.to_bits()
                });
        if !same {
            return Err(CoreError::ConsensusViolation { rank: outcome.rank });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{NeverConverge, StopReason};

    fn outcome(rank: usize, amplitudes: Vec<Complex64>) -> RunOutcome {
        RunOutcome {
            rank,
            cycles: 1,
            stop: StopReason::StepLimit,
            amplitudes,
            history: Vec::new(),
        }
    }

    #[test]
    fn test_consensus_detects_divergent_rank() {
        let a = vec![Complex64::new(1.0, 0.0); 4];
        let mut b = a.clone();
        b[3].im = 1e-300;
        let outcomes = vec![outcome(0, a.clone()), outcome(1, a), outcome(2, b)];
        let err = check_consensus(&outcomes).unwrap_err();
        assert!(matches!(err, CoreError::ConsensusViolation { rank: 2 }));
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!(
            "channels".parse::<TransportKind>().unwrap(),
            TransportKind::Channels
        );
        assert_eq!(
            "SHM".parse::<TransportKind>().unwrap(),
            TransportKind::SharedMemory
        );
        assert!("mpi".parse::<TransportKind>().is_err());
    }

    #[tokio::test]
    async fn test_cluster_agrees() {
        let config = RunConfiguration::new(16).with_step_count(2);
        let cluster = LocalCluster::new(
            config,
            HamiltonianOperator::uniform(16, 0.9),
            4,
            TransportKind::SharedMemory,
        );
        let initial: Vec<Complex64> = (0..16).map(|i| Complex64::new(i as f64, 1.0)).collect();

        let result = cluster.run(initial, NeverConverge).await.unwrap();
        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.cycles(), 2);
        assert_eq!(result.amplitudes().len(), 16);
    }

    #[tokio::test]
    async fn test_cluster_rejects_indivisible_layout_before_running() {
        let cluster = LocalCluster::new(
            RunConfiguration::new(15),
            HamiltonianOperator::identity(15),
            2,
            TransportKind::Channels,
        );
        let failure = cluster
            .run(vec![Complex64::default(); 15], NeverConverge)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CycleState::Idle);
        assert_eq!(failure.error.kind(), "ConfigurationError");
    }
}
