//! Per-node cycle state machine.
//!
//! ```text
//!        ┌──────────────────────────────────────────┐
//!        ▼                                          │
//!  Idle ──→ Evolving ──→ Synchronizing ──→ Correcting ──→ Done
//!              │              │                 │
//!              └──────────────┴────────┬────────┘
//!                                      ▼
//!                                    Failed
//! ```
//!
//! Stages never overlap: the local evolution pass has returned before the
//! partition is contributed to the barrier, and the merge has completed
//! before the correction pass starts. Any error ends the run in `Failed`;
//! nothing is retried.

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::buffer::AmplitudeBuffer;
use crate::config::RunConfiguration;
use crate::correction::{CorrectionReport, ErrorCorrectionPass};
use crate::error::{CoreError, CoreResult};
use crate::evolution::EvolutionEngine;
use crate::hamiltonian::HamiltonianOperator;
use crate::pass::PassReport;
use crate::sync::{CollectiveSynchronizer, SyncReport, SynchronizationTransport};
use crate::topology::NodeTopology;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    /// Topology and buffers established, no step run yet.
    Idle,
    /// Local evolution pass in progress.
    Evolving,
    /// Waiting at, or merging after, the barrier.
    Synchronizing,
    /// Correction pass in progress.
    Correcting,
    /// Step limit reached or convergence signalled.
    Done,
    /// A stage failed.
    Failed,
}

impl CycleState {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Done | CycleState::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Evolving => "evolving",
            CycleState::Synchronizing => "synchronizing",
            CycleState::Correcting => "correcting",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a run ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// `step_count` cycles completed.
    StepLimit,
    /// The convergence signal fired.
    Converged,
}

/// External convergence criterion, evaluated after each correction.
///
/// Every node evaluates it on its own copy of the synchronized vector, so
/// implementations must depend only on `cycle` and `amplitudes`; a signal
/// that fires on one node but not another leaves the others waiting at the
/// next barrier.
pub trait ConvergenceSignal: Send + Sync {
    /// True to stop after `cycle`.
    fn converged(&self, cycle: u64, amplitudes: &[Complex64]) -> bool;
}

/// Never fires; runs stop at the step limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConverge;

impl ConvergenceSignal for NeverConverge {
    fn converged(&self, _cycle: u64, _amplitudes: &[Complex64]) -> bool {
        false
    }
}

/// Fires once `Σ|a|²` drops below the threshold.
#[derive(Debug, Clone, Copy)]
pub struct NormBelow(pub f64);

impl ConvergenceSignal for NormBelow {
    fn converged(&self, _cycle: u64, amplitudes: &[Complex64]) -> bool {
        amplitudes.iter().map(Complex64::norm_sqr).sum::<f64>() < self.0
    }
}

impl<F> ConvergenceSignal for F
where
    F: Fn(u64, &[Complex64]) -> bool + Send + Sync,
{
    fn converged(&self, cycle: u64, amplitudes: &[Complex64]) -> bool {
        self(cycle, amplitudes)
    }
}

/// Reports from one completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Cycle index, from 0.
    pub cycle: u64,
    /// Evolution pass.
    pub evolution: PassReport,
    /// Barrier and merge.
    pub sync: SyncReport,
    /// Correction pass.
    pub correction: CorrectionReport,
}

/// Successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Rank that produced the outcome.
    pub rank: usize,
    /// Cycles completed.
    pub cycles: u64,
    /// Why the run stopped.
    pub stop: StopReason,
    /// Final global vector, identical on every node.
    pub amplitudes: Vec<Complex64>,
    /// Per-cycle reports.
    pub history: Vec<CycleRecord>,
}

/// Terminal failure with the context it happened in.
#[derive(Debug, Error)]
#[error("rank {rank} failed while {stage} in cycle {cycle}: {error}")]
pub struct RunFailure {
    /// Failing rank.
    pub rank: usize,
    /// Cycle in progress.
    pub cycle: u64,
    /// Stage that failed.
    pub stage: CycleState,
    /// Underlying error.
    #[source]
    pub error: CoreError,
}

/// Drives evolve → synchronize → correct for one node.
#[derive(Debug)]
pub struct CycleOrchestrator {
    config: RunConfiguration,
    topology: NodeTopology,
    hamiltonian: HamiltonianOperator,
    buffer: AmplitudeBuffer,
    evolution: EvolutionEngine,
    synchronizer: CollectiveSynchronizer,
    correction: ErrorCorrectionPass,
    state: CycleState,
    cycle: u64,
}

impl CycleOrchestrator {
    /// Validate everything and enter `Idle`.
    ///
    /// `initial` is the full global vector as prepared by the caller. All
    /// configuration problems surface here, before any step runs.
    pub fn new(
        config: RunConfiguration,
        topology: NodeTopology,
        hamiltonian: HamiltonianOperator,
        initial: Vec<Complex64>,
        transport: Arc<dyn SynchronizationTransport>,
    ) -> CoreResult<Self> {
        let layout = config.validate(&topology)?;
        hamiltonian.check_len(config.states)?;
        let synchronizer = CollectiveSynchronizer::new(transport, config.sync_timeout());
        synchronizer.check_topology(&topology)?;
        let buffer = AmplitudeBuffer::new(initial, layout, &topology)?;

        let evolution = EvolutionEngine::from_config(&config);
        let correction = ErrorCorrectionPass::from_config(&config);

        Ok(Self {
            config,
            topology,
            hamiltonian,
            buffer,
            evolution,
            synchronizer,
            correction,
            state: CycleState::Idle,
            cycle: 0,
        })
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// The node's buffer.
    pub fn buffer(&self) -> &AmplitudeBuffer {
        &self.buffer
    }

    /// Topology in force.
    pub fn topology(&self) -> &NodeTopology {
        &self.topology
    }

    fn transition(&mut self, next: CycleState) {
        debug!(cycle = self.cycle, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn fail(&mut self, error: CoreError) -> RunFailure {
        let stage = self.state;
        error!(
            rank = self.topology.rank(),
            cycle = self.cycle,
            %stage,
            kind = error.kind(),
            %error,
            "run failed"
        );
        self.transition(CycleState::Failed);
        RunFailure {
            rank: self.topology.rank(),
            cycle: self.cycle,
            stage,
            error,
        }
    }

    /// Run until the step limit or `convergence` fires.
    ///
    /// Can be called once; a second call fails with a configuration error
    /// and leaves the terminal state untouched.
    #[instrument(skip_all, fields(rank = self.topology.rank(), states = self.config.states))]
    pub async fn run(
        &mut self,
        convergence: &dyn ConvergenceSignal,
    ) -> Result<RunOutcome, RunFailure> {
        if self.state != CycleState::Idle {
            let stage = self.state;
            return Err(RunFailure {
                rank: self.topology.rank(),
                cycle: self.cycle,
                stage,
                error: CoreError::Configuration(format!(
                    "orchestrator already ran (state: {stage})"
                )),
            });
        }

        info!(
            steps = self.config.step_count,
            nodes = self.topology.total_nodes(),
            backend = %self.config.backend,
            hamiltonian = self.hamiltonian.kind(),
            "run started"
        );

        let mut history = Vec::new();
        let mut stop = StopReason::StepLimit;

        while self.cycle < self.config.step_count {
            let cycle = self.cycle;

            self.transition(CycleState::Evolving);
            let range = self.buffer.local_range();
            let evolution = self
                .evolution
                .evolve(
                    self.buffer.local_partition_mut(),
                    self.hamiltonian.slice(range),
                    1,
                )
                .map_err(|e| self.fail(e))?;

            self.transition(CycleState::Synchronizing);
            let sync = match self
                .synchronizer
                .synchronize(cycle, &mut self.buffer, &self.topology)
                .await
            {
                Ok(report) => report,
                Err(e) => return Err(self.fail(e)),
            };

            self.transition(CycleState::Correcting);
            let correction = self
                .correction
                .correct(self.buffer.global_mut())
                .map_err(|e| self.fail(e))?;

            history.push(CycleRecord {
                cycle,
                evolution,
                sync,
                correction,
            });
            self.cycle += 1;

            if convergence.converged(cycle, self.buffer.global()) {
                stop = StopReason::Converged;
                break;
            }
        }

        self.transition(CycleState::Done);
        info!(cycles = self.cycle, ?stop, "run finished");

        Ok(RunOutcome {
            rank: self.topology.rank(),
            cycles: self.cycle,
            stop,
            amplitudes: self.buffer.global().to_vec(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LocalFabric;

    fn single_node(config: RunConfiguration, initial: Vec<Complex64>) -> CycleOrchestrator {
        let states = config.states;
        let transport = Arc::new(LocalFabric::new(1).endpoint(0).unwrap());
        CycleOrchestrator::new(
            config,
            NodeTopology::single(),
            HamiltonianOperator::identity(states),
            initial,
            transport,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_single_node_runs_to_step_limit() {
        let mut orch = single_node(
            RunConfiguration::new(8).with_step_count(3),
            vec![Complex64::new(1.0, 0.0); 8],
        );
        assert_eq!(orch.state(), CycleState::Idle);

        let outcome = orch.run(&NeverConverge).await.unwrap();
        assert_eq!(orch.state(), CycleState::Done);
        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.stop, StopReason::StepLimit);
        assert_eq!(outcome.history.len(), 3);
        // three corrections of an identity evolution
        let expected = 1.0f64
            .mul_add(std::f64::consts::FRAC_1_SQRT_2, 0.0)
            .mul_add(std::f64::consts::FRAC_1_SQRT_2, 0.0)
            .mul_add(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        assert_eq!(outcome.amplitudes[0].re, expected);
    }

    #[tokio::test]
    async fn test_convergence_stops_early() {
        let mut orch = single_node(
            RunConfiguration::new(8).with_step_count(100),
            vec![Complex64::new(0.5, 0.0); 8],
        );
        // norm starts at 2 and halves every cycle
        let outcome = orch.run(&NormBelow(0.3)).await.unwrap();
        assert_eq!(outcome.stop, StopReason::Converged);
        assert_eq!(outcome.cycles, 3);
    }

    #[tokio::test]
    async fn test_closure_signal() {
        let mut orch = single_node(
            RunConfiguration::new(8).with_step_count(10),
            vec![Complex64::new(0.5, 0.0); 8],
        );
        let outcome = orch.run(&|cycle: u64, _: &[Complex64]| cycle == 1).await.unwrap();
        assert_eq!(outcome.cycles, 2);
    }

    #[tokio::test]
    async fn test_zero_steps_goes_straight_to_done() {
        let mut orch = single_node(
            RunConfiguration::new(8).with_step_count(0),
            vec![Complex64::new(0.5, 0.0); 8],
        );
        let outcome = orch.run(&NeverConverge).await.unwrap();
        assert_eq!(outcome.cycles, 0);
        assert_eq!(outcome.amplitudes, vec![Complex64::new(0.5, 0.0); 8]);
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let mut orch = single_node(
            RunConfiguration::new(8),
            vec![Complex64::new(0.5, 0.0); 8],
        );
        orch.run(&NeverConverge).await.unwrap();
        let failure = orch.run(&NeverConverge).await.unwrap_err();
        assert!(matches!(failure.error, CoreError::Configuration(_)));
        assert_eq!(failure.stage, CycleState::Done);
        assert_eq!(orch.state(), CycleState::Done);
    }

    #[test]
    fn test_miswired_transport_rejected_before_any_step() {
        // endpoint of a 3-node fabric under a 2-node topology
        let transport = Arc::new(LocalFabric::new(3).endpoint(0).unwrap());
        let err = CycleOrchestrator::new(
            RunConfiguration::new(8),
            NodeTopology::new(2, 0).unwrap(),
            HamiltonianOperator::uniform(8, 2.0),
            vec![Complex64::new(1.0, 0.0); 8],
            transport,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));

        // right size, wrong rank
        let transport = Arc::new(LocalFabric::new(2).endpoint(1).unwrap());
        let err = CycleOrchestrator::new(
            RunConfiguration::new(8),
            NodeTopology::new(2, 0).unwrap(),
            HamiltonianOperator::identity(8),
            vec![Complex64::new(1.0, 0.0); 8],
            transport,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_divergence_abort_fails_in_correcting() {
        use crate::config::{DivergenceAction, NormalizationPolicy};

        let config = RunConfiguration::new(4)
            .with_step_count(5)
            .with_normalization(NormalizationPolicy::new(1e-6, DivergenceAction::Abort));
        let mut orch = single_node(config, vec![Complex64::new(0.5, 0.0); 4]);

        let failure = orch.run(&NeverConverge).await.unwrap_err();
        assert_eq!(failure.stage, CycleState::Correcting);
        assert_eq!(failure.cycle, 0);
        assert_eq!(failure.error.kind(), "NumericDivergence");
        assert_eq!(orch.state(), CycleState::Failed);
    }

    #[test]
    fn test_hamiltonian_length_checked() {
        let transport = Arc::new(LocalFabric::new(1).endpoint(0).unwrap());
        let err = CycleOrchestrator::new(
            RunConfiguration::new(8),
            NodeTopology::single(),
            HamiltonianOperator::identity(4),
            vec![Complex64::default(); 8],
            transport,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CycleState::Synchronizing.to_string(), "synchronizing");
        assert!(CycleState::Failed.is_terminal());
        assert!(!CycleState::Evolving.is_terminal());
    }
}
