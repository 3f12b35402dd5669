//! Per-amplitude evolution operators.
//!
//! A run evolves the state under a diagonal operator, one factor per basis
//! state:
//!
//!   a_i ← f_i · a_i
//!
//! Two representations are supported:
//!
//! - [`HamiltonianOperator::Diagonal`]: real coefficients `h_i`, applied to the
//!   real and imaginary parts independently. Does not preserve the norm
//!   unless every `|h_i| = 1`.
//! - [`HamiltonianOperator::Phase`]: unit-modulus factors `exp(-i E_i dt)` built
//!   from energies. Preserves the norm up to rounding.
//!
//! The operator is immutable for a run and shared by reference between all
//! stages and nodes of the same process.

use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// On-disk description of an operator.
///
/// ```json
/// { "kind": "diagonal", "coefficients": [1.0, 0.5] }
/// { "kind": "phase", "energies": [0.0, 1.0], "dt": 0.01 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HamiltonianSpec {
    /// Real per-amplitude coefficients.
    Diagonal {
        /// One coefficient per amplitude.
        coefficients: Vec<f64>,
    },
    /// Diagonal energies evolved for time `dt`.
    Phase {
        /// One energy per amplitude.
        energies: Vec<f64>,
        /// Time step.
        dt: f64,
    },
}

/// Immutable evolution operator shared across a run.
#[derive(Debug, Clone)]
pub enum HamiltonianOperator {
    /// Real coefficients.
    Diagonal(Arc<[f64]>),
    /// Unit-modulus complex factors.
    Phase(Arc<[Complex64]>),
}

/// Borrowed window of an operator aligned with one partition.
#[derive(Debug, Clone, Copy)]
pub enum OperatorSlice<'a> {
    /// Real coefficients.
    Diagonal(&'a [f64]),
    /// Complex factors.
    Phase(&'a [Complex64]),
}

impl OperatorSlice<'_> {
    /// Number of factors in the window.
    pub fn len(&self) -> usize {
        match self {
            OperatorSlice::Diagonal(c) => c.len(),
            OperatorSlice::Phase(u) => u.len(),
        }
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HamiltonianOperator {
    /// Diagonal operator from real coefficients.
    pub fn diagonal(coefficients: Vec<f64>) -> Self {
        Self::Diagonal(coefficients.into())
    }

    /// Every coefficient equal to `coefficient`.
    pub fn uniform(states: usize, coefficient: f64) -> Self {
        Self::diagonal(vec![coefficient; states])
    }

    /// The identity: every coefficient is 1.
    pub fn identity(states: usize) -> Self {
        Self::uniform(states, 1.0)
    }

    /// `exp(-i E_k dt)` for each energy.
    pub fn phase(energies: &[f64], dt: f64) -> Self {
        let factors: Vec<Complex64> = energies
            .iter()
            .map(|e| Complex64::from_polar(1.0, -e * dt))
            .collect();
        Self::Phase(factors.into())
    }

    /// Build from a parsed description.
    pub fn from_spec(spec: &HamiltonianSpec) -> CoreResult<Self> {
        match spec {
            HamiltonianSpec::Diagonal { coefficients } => {
                if let Some(i) = coefficients.iter().position(|c| !c.is_finite()) {
                    return Err(CoreError::Configuration(format!(
                        "Hamiltonian coefficient {i} is not finite"
                    )));
                }
                Ok(Self::diagonal(coefficients.clone()))
            }
            HamiltonianSpec::Phase { energies, dt } => {
                if !dt.is_finite() || energies.iter().any(|e| !e.is_finite()) {
                    return Err(CoreError::Configuration(
                        "Hamiltonian energies and dt must be finite".into(),
                    ));
                }
                Ok(Self::phase(energies, *dt))
            }
        }
    }

    /// Load a JSON or YAML description from disk.
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let spec: HamiltonianSpec = match ext.to_lowercase().as_str() {
            "json" => serde_json::from_str(&source)?,
            _ => serde_yaml_ng::from_str(&source)?,
        };
        Self::from_spec(&spec)
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        match self {
            Self::Diagonal(c) => c.len(),
            Self::Phase(u) => u.len(),
        }
    }

    /// True if the operator has no factors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Diagonal(_) => "diagonal",
            Self::Phase(_) => "phase",
        }
    }

    /// Fail unless the operator has exactly `states` factors.
    pub fn check_len(&self, states: usize) -> CoreResult<()> {
        if self.len() != states {
            return Err(CoreError::Configuration(format!(
                "Hamiltonian has {} coefficients, configuration expects {states}",
                self.len()
            )));
        }
        Ok(())
    }

    /// The window aligned with a global index range.
    pub fn slice(&self, range: Range<usize>) -> OperatorSlice<'_> {
        match self {
            Self::Diagonal(c) => OperatorSlice::Diagonal(&c[range]),
            Self::Phase(u) => OperatorSlice::Phase(&u[range]),
        }
    }

    /// The whole operator as a window.
    pub fn as_slice(&self) -> OperatorSlice<'_> {
        self.slice(0..self.len())
    }
}
