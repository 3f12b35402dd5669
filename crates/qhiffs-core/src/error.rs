//! Error types for the core crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can terminate a synchronize / evolve / correct run.
///
/// Every variant is fatal for the current run: a partially applied step
/// would leave the shared vector inconsistent across nodes, so nothing is
/// retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Invalid relationship between `states`, `total_nodes`, `vector_width`
    /// or another configuration field.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Nodes disagree on the partition layout.
    #[error(
        "Partition mismatch from rank {rank}: expected {expected} amplitudes, found {found} ({reason})"
    )]
    PartitionMismatch {
        /// Rank whose contribution did not match.
        rank: usize,
        /// Local size this node expected.
        expected: usize,
        /// Local size carried by the contribution.
        found: usize,
        /// Which check failed.
        reason: String,
    },

    /// A node failed to reach the barrier within the configured window.
    #[error(
        "Synchronization timeout in cycle {cycle} after {waited:?} (missing ranks: {missing_ranks:?})"
    )]
    SynchronizationTimeout {
        /// Cycle in which the barrier was abandoned.
        cycle: u64,
        /// How long this node waited.
        waited: Duration,
        /// Ranks that never contributed, if the transport can tell.
        missing_ranks: Vec<usize>,
    },

    /// Post-correction normalization fell outside tolerance.
    #[error("Numeric divergence: norm {norm} outside tolerance {tolerance}")]
    NumericDivergence {
        /// Observed squared norm of the state vector.
        norm: f64,
        /// Allowed deviation from 1.
        tolerance: f64,
    },

    /// The collective transport failed (peer gone, duplicate contribution).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Two nodes finished a local cluster run holding different vectors.
    #[error("Consensus violation: rank {rank} disagrees with rank 0 on the final state")]
    ConsensusViolation {
        /// First rank whose final vector differs from rank 0.
        rank: usize,
    },

    /// I/O error while loading configuration or operator files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl CoreError {
    /// Short tag naming the failure class, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::PartitionMismatch { .. } => "PartitionMismatchError",
            Self::SynchronizationTimeout { .. } => "SynchronizationTimeout",
            Self::NumericDivergence { .. } => "NumericDivergence",
            Self::Transport(_) => "TransportError",
            Self::ConsensusViolation { .. } => "ConsensusViolation",
            Self::Io(_) | Self::Serialization(_) | Self::Yaml(_) => "InputError",
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
