//! Run configuration.
//!
//! Every tunable that would otherwise be a process-wide constant lives in
//! [`RunConfiguration`], which is passed by reference into each component.
//!
//! # Example
//!
//! ```rust
//! use qhiffs_core::{NodeTopology, RunConfiguration};
//!
//! let config = RunConfiguration::new(16).with_step_count(4);
//! let layout = config.validate(&NodeTopology::new(2, 0).unwrap()).unwrap();
//! assert_eq!(layout.local_size(), 8);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correction::CorrectionOperator;
use crate::error::{CoreError, CoreResult};
use crate::topology::{NodeTopology, PartitionLayout};

/// Default number of amplitudes per correction block.
pub const DEFAULT_VECTOR_WIDTH: usize = 8;

/// Default number of workers per accelerator block.
pub const DEFAULT_BLOCK_DIM: usize = 256;

/// Which [`ParallelPass`](crate::pass::ParallelPass) backend runs evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassBackend {
    /// Kernel-launch geometry: grid of blocks, one worker per index.
    #[default]
    Accelerator,
    /// Fixed-width lane blocks on the host.
    HostVector,
}

impl std::fmt::Display for PassBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassBackend::Accelerator => write!(f, "accelerator"),
            PassBackend::HostVector => write!(f, "host-vector"),
        }
    }
}

impl std::str::FromStr for PassBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accelerator" | "gpu" => Ok(PassBackend::Accelerator),
            "host-vector" | "host" | "simd" => Ok(PassBackend::HostVector),
            other => Err(CoreError::Configuration(format!(
                "unknown pass backend '{other}' (expected accelerator or host-vector)"
            ))),
        }
    }
}

/// How the correction pass treats `states % vector_width` trailing amplitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailPolicy {
    /// Correct the tail one amplitude at a time with the same arithmetic.
    #[default]
    ScalarFallback,
    /// Reject configurations whose size is not a multiple of the width.
    Strict,
}

/// What happens when the post-correction norm leaves tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivergenceAction {
    /// Record the divergence and keep going.
    #[default]
    Flag,
    /// Fail the run with `NumericDivergence`.
    Abort,
    /// Rescale to unit norm and record the divergence.
    Renormalize,
}

/// Post-correction normalization check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationPolicy {
    /// Allowed `|Σ|a|² − 1|`.
    pub tolerance: f64,
    /// Reaction to an out-of-tolerance norm.
    #[serde(default)]
    pub on_divergence: DivergenceAction,
}

impl NormalizationPolicy {
    /// Create a policy.
    pub fn new(tolerance: f64, on_divergence: DivergenceAction) -> Self {
        Self {
            tolerance,
            on_divergence,
        }
    }
}

/// Configuration of one synchronize / evolve / correct run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Total length of the global state vector.
    pub states: usize,

    /// Amplitudes per correction block.
    #[serde(default = "default_vector_width")]
    pub vector_width: usize,

    /// Number of cycles to run.
    #[serde(default = "default_step_count")]
    pub step_count: u64,

    /// Barrier timeout in milliseconds; `None` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_timeout_ms: Option<u64>,

    /// Backend used by the evolution pass.
    #[serde(default)]
    pub backend: PassBackend,

    /// Workers per block for the accelerator backend.
    #[serde(default = "default_block_dim")]
    pub accelerator_block_dim: usize,

    /// Correction operator parameters.
    #[serde(default)]
    pub correction: CorrectionOperator,

    /// Tail handling for the correction pass.
    #[serde(default)]
    pub tail_policy: TailPolicy,

    /// Optional normalization check after each correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<NormalizationPolicy>,
}

fn default_vector_width() -> usize {
    DEFAULT_VECTOR_WIDTH
}

fn default_step_count() -> u64 {
    1
}

fn default_block_dim() -> usize {
    DEFAULT_BLOCK_DIM
}

impl RunConfiguration {
    /// Configuration for `states` amplitudes with every other field defaulted.
    pub fn new(states: usize) -> Self {
        Self {
            states,
            vector_width: DEFAULT_VECTOR_WIDTH,
            step_count: 1,
            sync_timeout_ms: None,
            backend: PassBackend::default(),
            accelerator_block_dim: DEFAULT_BLOCK_DIM,
            correction: CorrectionOperator::default(),
            tail_policy: TailPolicy::default(),
            normalization: None,
        }
    }

    /// Set the number of cycles.
    #[must_use]
    pub fn with_step_count(mut self, step_count: u64) -> Self {
        self.step_count = step_count;
        self
    }

    /// Set the correction block width.
    #[must_use]
    pub fn with_vector_width(mut self, width: usize) -> Self {
        self.vector_width = width;
        self
    }

    /// Bound the barrier wait.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Select the evolution backend.
    #[must_use]
    pub fn with_backend(mut self, backend: PassBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the accelerator block dimension.
    #[must_use]
    pub fn with_block_dim(mut self, block_dim: usize) -> Self {
        self.accelerator_block_dim = block_dim;
        self
    }

    /// Replace the correction operator.
    #[must_use]
    pub fn with_correction(mut self, correction: CorrectionOperator) -> Self {
        self.correction = correction;
        self
    }

    /// Set the tail policy.
    #[must_use]
    pub fn with_tail_policy(mut self, policy: TailPolicy) -> Self {
        self.tail_policy = policy;
        self
    }

    /// Enable the normalization check.
    #[must_use]
    pub fn with_normalization(mut self, policy: NormalizationPolicy) -> Self {
        self.normalization = Some(policy);
        self
    }

    /// Barrier timeout as a [`Duration`].
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }

    /// Check every cross-field relationship and return the partition layout.
    ///
    /// Runs before any buffer is touched; every failure is a
    /// [`CoreError::Configuration`].
    pub fn validate(&self, topology: &NodeTopology) -> CoreResult<PartitionLayout> {
        if self.vector_width == 0 {
            return Err(CoreError::Configuration(
                "vector_width must be positive".into(),
            ));
        }
        if self.accelerator_block_dim == 0 {
            return Err(CoreError::Configuration(
                "accelerator_block_dim must be positive".into(),
            ));
        }
        if topology.rank() >= topology.total_nodes() {
            return Err(CoreError::Configuration(format!(
                "rank {} out of range for {} nodes",
                topology.rank(),
                topology.total_nodes()
            )));
        }

        let layout = PartitionLayout::new(self.states, topology.total_nodes())?;

        if self.tail_policy == TailPolicy::Strict && self.states % self.vector_width != 0 {
            return Err(CoreError::Configuration(format!(
                "states ({}) is not a multiple of vector_width ({}) under the strict tail policy",
                self.states, self.vector_width
            )));
        }
        if !self.correction.coefficient.is_finite() || !self.correction.offset.is_finite() {
            return Err(CoreError::Configuration(
                "correction coefficient and offset must be finite".into(),
            ));
        }
        if let Some(policy) = &self.normalization {
            if !policy.tolerance.is_finite() || policy.tolerance < 0.0 {
                return Err(CoreError::Configuration(format!(
                    "normalization tolerance must be a finite non-negative number, got {}",
                    policy.tolerance
                )));
            }
        }
        Ok(layout)
    }

    /// Parse a JSON document.
    pub fn from_json_str(source: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(source: &str) -> CoreResult<Self> {
        Ok(serde_yaml_ng::from_str(source)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file; other extensions are
    /// read as YAML, which also accepts JSON.
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext.to_lowercase().as_str() {
            "json" => Self::from_json_str(&source),
            _ => Self::from_yaml_str(&source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_nodes() -> NodeTopology {
        NodeTopology::new(2, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfiguration::new(16);
        assert_eq!(config.vector_width, 8);
        assert_eq!(config.step_count, 1);
        assert_eq!(config.backend, PassBackend::Accelerator);
        assert_eq!(config.tail_policy, TailPolicy::ScalarFallback);
        assert!(config.sync_timeout().is_none());
    }

    #[test]
    fn test_validate_uneven_states() {
        let err = RunConfiguration::new(15).validate(&two_nodes()).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_validate_strict_tail() {
        let config = RunConfiguration::new(20).with_tail_policy(TailPolicy::Strict);
        assert!(config.validate(&two_nodes()).is_err());

        let config = RunConfiguration::new(20);
        assert_eq!(config.validate(&two_nodes()).unwrap().local_size(), 10);
    }

    #[test]
    fn test_validate_zero_width() {
        let config = RunConfiguration::new(16).with_vector_width(0);
        assert!(config.validate(&two_nodes()).is_err());
    }

    #[test]
    fn test_validate_negative_tolerance() {
        let config = RunConfiguration::new(16)
            .with_normalization(NormalizationPolicy::new(-1.0, DivergenceAction::Abort));
        assert!(config.validate(&two_nodes()).is_err());
    }

    #[test]
    fn test_yaml_with_defaults() {
        let config = RunConfiguration::from_yaml_str(
            "states: 32\nstep_count: 5\nsync_timeout_ms: 250\nbackend: host-vector\n",
        )
        .unwrap();
        assert_eq!(config.states, 32);
        assert_eq!(config.step_count, 5);
        assert_eq!(config.vector_width, 8);
        assert_eq!(config.sync_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.backend, PassBackend::HostVector);
    }

    #[test]
    fn test_json_normalization() {
        let config = RunConfiguration::from_json_str(
            r#"{"states": 8, "normalization": {"tolerance": 1e-9, "on_divergence": "renormalize"}}"#,
        )
        .unwrap();
        let policy = config.normalization.unwrap();
        assert_eq!(policy.on_divergence, DivergenceAction::Renormalize);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "GPU".parse::<PassBackend>().unwrap(),
            PassBackend::Accelerator
        );
        assert_eq!(
            "host-vector".parse::<PassBackend>().unwrap(),
            PassBackend::HostVector
        );
        assert!("fpga".parse::<PassBackend>().is_err());
    }
}
