//! QHiFFS core: distributed state-vector evolution.
//!
//! A global amplitude vector is partitioned across nodes. Each cycle every
//! node evolves its own partition under a diagonal Hamiltonian, exchanges
//! partitions with all other nodes through a blocking all-gather, and runs
//! a fused multiply-add correction over the merged vector. After each cycle
//! every node holds the same vector, bit for bit.
//!
//! # Example
//!
//! ```no_run
//! use qhiffs_core::{
//!     HamiltonianOperator, LocalCluster, NeverConverge, RunConfiguration, TransportKind,
//! };
//! use num_complex::Complex64;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfiguration::new(1024).with_step_count(10);
//! let hamiltonian = HamiltonianOperator::phase(&vec![0.5; 1024], 0.01);
//! let cluster = LocalCluster::new(config, hamiltonian, 4, TransportKind::SharedMemory);
//!
//! let mut initial = vec![Complex64::default(); 1024];
//! initial[0] = Complex64::new(1.0, 0.0);
//!
//! let result = cluster.run(initial, NeverConverge).await?;
//! println!("{} cycles", result.cycles());
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! | Stage | Component | Range |
//! |-------|-----------|-------|
//! | evolve | [`EvolutionEngine`] | local partition |
//! | synchronize | [`CollectiveSynchronizer`] | all partitions |
//! | correct | [`ErrorCorrectionPass`] | global vector |
//!
//! [`CycleOrchestrator`] sequences the stages for one node.

pub mod buffer;
pub mod cluster;
pub mod config;
pub mod correction;
pub mod error;
pub mod evolution;
pub mod hamiltonian;
pub mod orchestrator;
pub mod pass;
pub mod sync;
pub mod topology;

pub use buffer::AmplitudeBuffer;
pub use cluster::{ClusterOutcome, LocalCluster, TransportKind, check_consensus};
pub use config::{
    DivergenceAction, NormalizationPolicy, PassBackend, RunConfiguration, TailPolicy,
};
pub use correction::{CorrectionOperator, CorrectionReport, Divergence, ErrorCorrectionPass};
pub use error::{CoreError, CoreResult};
pub use evolution::EvolutionEngine;
pub use hamiltonian::{HamiltonianOperator, HamiltonianSpec, OperatorSlice};
pub use orchestrator::{
    ConvergenceSignal, CycleOrchestrator, CycleRecord, CycleState, NeverConverge, NormBelow,
    RunFailure, RunOutcome, StopReason,
};
pub use pass::{
    AcceleratorPass, AmplitudeKernel, DeviceInfo, HostVectorPass, ParallelPass, PassReport,
    create_pass,
};
pub use sync::{
    ChannelMesh, ChannelTransport, CollectiveSynchronizer, LocalFabric, LocalTransport,
    PartitionFrame, SyncReport, SynchronizationTransport, merge_frames,
};
pub use topology::{NodeTopology, PartitionLayout};
