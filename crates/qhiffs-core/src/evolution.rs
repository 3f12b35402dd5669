//! Discretized diagonal time evolution.
//!
//! One step multiplies every amplitude by its operator factor:
//!
//!   Diagonal:  re_i ← re_i · h_i,  im_i ← im_i · h_i
//!   Phase:     a_i  ← a_i · u_i
//!
//! Steps are independent per index, so the whole update is a single
//! [`ParallelPass`]. No normalization happens here; drift is left to the
//! correction stage.

use std::sync::Arc;

use num_complex::Complex64;
use tracing::debug;

use crate::config::RunConfiguration;
use crate::error::{CoreError, CoreResult};
use crate::hamiltonian::OperatorSlice;
use crate::pass::{AmplitudeKernel, ParallelPass, PassReport, create_pass};

/// Applies evolution steps through a configurable pass backend.
#[derive(Debug, Clone)]
pub struct EvolutionEngine {
    pass: Arc<dyn ParallelPass>,
}

impl EvolutionEngine {
    /// Use an explicit pass backend.
    pub fn new(pass: Arc<dyn ParallelPass>) -> Self {
        Self { pass }
    }

    /// Use the backend selected by `config.backend`.
    pub fn from_config(config: &RunConfiguration) -> Self {
        Self::new(create_pass(config.backend, config))
    }

    /// The backend in use.
    pub fn pass(&self) -> &dyn ParallelPass {
        self.pass.as_ref()
    }

    /// Apply `step_count` steps of `hamiltonian` to `amplitudes`.
    ///
    /// `hamiltonian` must be the operator window aligned with
    /// `amplitudes` (same length).
    pub fn evolve(
        &self,
        amplitudes: &mut [Complex64],
        hamiltonian: OperatorSlice<'_>,
        step_count: u64,
    ) -> CoreResult<PassReport> {
        if hamiltonian.len() != amplitudes.len() {
            return Err(CoreError::Configuration(format!(
                "operator window has {} factors for {} amplitudes",
                hamiltonian.len(),
                amplitudes.len()
            )));
        }
        if step_count == 0 {
            return Ok(PassReport {
                backend: self.pass.backend(),
                size: amplitudes.len(),
                workers: 0,
                writes: 0,
                tail: 0,
            });
        }

        let report = match hamiltonian {
            OperatorSlice::Diagonal(coefficients) => self.pass.run(
                amplitudes,
                &DiagonalStep {
                    coefficients,
                    steps: step_count,
                },
            ),
            OperatorSlice::Phase(factors) => self.pass.run(
                amplitudes,
                &PhaseStep {
                    factors,
                    steps: step_count,
                },
            ),
        };

        debug!(
            backend = %report.backend,
            size = report.size,
            workers = report.workers,
            steps = step_count,
            "evolution pass complete"
        );
        Ok(report)
    }
}

struct DiagonalStep<'a> {
    coefficients: &'a [f64],
    steps: u64,
}

impl AmplitudeKernel for DiagonalStep<'_> {
    fn apply(&self, index: usize, amplitude: &mut Complex64) {
        let h = self.coefficients[index];
        for _ in 0..self.steps {
            amplitude.re *= h;
            amplitude.im *= h;
        }
    }
}

struct PhaseStep<'a> {
    factors: &'a [Complex64],
    steps: u64,
}

impl AmplitudeKernel for PhaseStep<'_> {
    fn apply(&self, index: usize, amplitude: &mut Complex64) {
        let u = self.factors[index];
        for _ in 0..self.steps {
            *amplitude *= u;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassBackend;
    use crate::hamiltonian::HamiltonianOperator;

    fn sample(n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::new(0.1 * i as f64 - 0.3, 0.05 * i as f64))
            .collect()
    }

    fn engines() -> Vec<EvolutionEngine> {
        let config = RunConfiguration::new(16).with_block_dim(4);
        vec![
            EvolutionEngine::from_config(&config.clone().with_backend(PassBackend::Accelerator)),
            EvolutionEngine::from_config(&config.with_backend(PassBackend::HostVector)),
        ]
    }

    #[test]
    fn test_identity_leaves_state_unchanged() {
        let h = HamiltonianOperator::identity(13);
        for engine in engines() {
            let mut amps = sample(13);
            engine.evolve(&mut amps, h.as_slice(), 3).unwrap();
            assert_eq!(amps, sample(13));
        }
    }

    #[test]
    fn test_diagonal_multiplies_components() {
        let h = HamiltonianOperator::diagonal(vec![2.0, -0.5, 0.0, 3.0]);
        for engine in engines() {
            let mut amps = vec![Complex64::new(1.5, -2.0); 4];
            engine.evolve(&mut amps, h.as_slice(), 1).unwrap();
            assert_eq!(amps[0], Complex64::new(3.0, -4.0));
            assert_eq!(amps[1], Complex64::new(-0.75, 1.0));
            assert_eq!(amps[2].re, 0.0);
            assert_eq!(amps[3], Complex64::new(4.5, -6.0));
        }
    }

    #[test]
    fn test_multiple_steps_compose() {
        let h = HamiltonianOperator::uniform(8, 0.5);
        let engines = engines();
        let engine = &engines[0];
        let mut once = vec![Complex64::new(1.0, 1.0); 8];
        engine.evolve(&mut once, h.as_slice(), 1).unwrap();
        engine.evolve(&mut once, h.as_slice(), 1).unwrap();

        let mut twice = vec![Complex64::new(1.0, 1.0); 8];
        engine.evolve(&mut twice, h.as_slice(), 2).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice[0], Complex64::new(0.25, 0.25));
    }

    #[test]
    fn test_phase_preserves_norm() {
        let h = HamiltonianOperator::phase(&[0.0, 1.0, 2.0, 3.0], 0.3);
        let engines = engines();
        let engine = &engines[1];
        let mut amps = vec![Complex64::new(0.5, 0.0); 4];
        engine.evolve(&mut amps, h.as_slice(), 10).unwrap();
        let norm: f64 = amps.iter().map(Complex64::norm_sqr).sum();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_steps_is_noop() {
        let h = HamiltonianOperator::uniform(4, 7.0);
        let mut amps = sample(4);
        let report = engines()[0].evolve(&mut amps, h.as_slice(), 0).unwrap();
        assert_eq!(report.writes, 0);
        assert_eq!(amps, sample(4));
    }

    #[test]
    fn test_window_length_mismatch() {
        let h = HamiltonianOperator::identity(3);
        let mut amps = sample(4);
        let err = engines()[0].evolve(&mut amps, h.as_slice(), 1).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }
}
