//! Shared helpers for CLI commands.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use num_complex::Complex64;
use serde::Serialize;
use tracing::debug;

use qhiffs_core::{HamiltonianOperator, PassBackend, RunConfiguration, StopReason};

use crate::SetupArgs;

/// Build the run configuration from a file and command-line overrides.
pub fn load_config(setup: &SetupArgs) -> Result<RunConfiguration> {
    let mut config = match (&setup.config, setup.states) {
        (Some(path), _) => RunConfiguration::from_path(path)
            .with_context(|| format!("Failed to load configuration: {path}"))?,
        (None, Some(states)) => RunConfiguration::new(states),
        (None, None) => anyhow::bail!("Either --config or --states is required"),
    };

    if let Some(states) = setup.states {
        config.states = states;
    }
    if let Some(steps) = setup.steps {
        config.step_count = steps;
    }
    if let Some(backend) = &setup.backend {
        config.backend = backend.parse::<PassBackend>()?;
    }
    if let Some(width) = setup.vector_width {
        config.vector_width = width;
    }
    if let Some(timeout) = setup.sync_timeout_ms {
        config.sync_timeout_ms = Some(timeout);
    }
    debug!(?config, "configuration loaded");
    Ok(config)
}

/// Load the Hamiltonian file, or build a uniform diagonal of `states`.
pub fn load_hamiltonian(setup: &SetupArgs, states: usize) -> Result<HamiltonianOperator> {
    let operator = match &setup.hamiltonian {
        Some(path) => {
            if !Path::new(path).exists() {
                anyhow::bail!("File not found: {path}");
            }
            HamiltonianOperator::from_path(path)
                .with_context(|| format!("Failed to load Hamiltonian: {path}"))?
        }
        None => {
            if !setup.coefficient.is_finite() {
                anyhow::bail!("Coefficient must be finite, got {}", setup.coefficient);
            }
            HamiltonianOperator::uniform(states, setup.coefficient)
        }
    };
    operator.check_len(states)?;
    Ok(operator)
}

/// Prepare the initial global vector: `uniform` or `basis:<index>`.
pub fn initial_state(spec: &str, states: usize) -> Result<Vec<Complex64>> {
    if states == 0 {
        anyhow::bail!("Cannot prepare a state of zero amplitudes");
    }
    match spec.split_once(':') {
        None if spec.eq_ignore_ascii_case("uniform") => {
            let amplitude = (states as f64).sqrt().recip();
            Ok(vec![Complex64::new(amplitude, 0.0); states])
        }
        Some((kind, index)) if kind.eq_ignore_ascii_case("basis") => {
            let index: usize = index
                .trim()
                .parse()
                .with_context(|| format!("Invalid basis index: '{index}'"))?;
            if index >= states {
                anyhow::bail!("Basis index {index} out of range for {states} states");
            }
            let mut amplitudes = vec![Complex64::default(); states];
            amplitudes[index] = Complex64::new(1.0, 0.0);
            Ok(amplitudes)
        }
        _ => anyhow::bail!("Unknown initial state: '{spec}'. Available: uniform, basis:<index>"),
    }
}

/// Final state as written by `run`.
#[derive(Debug, Serialize)]
pub struct StateReport {
    /// Length of the global vector.
    pub states: usize,
    /// Cycles completed.
    pub cycles: u64,
    /// Why the run stopped.
    pub stop: StopReason,
    /// Sum of squared magnitudes.
    pub norm: f64,
    /// `[re, im]` pairs in index order.
    pub amplitudes: Vec<[f64; 2]>,
}

impl StateReport {
    /// Summarize a finished run's global vector.
    pub fn new(cycles: u64, stop: StopReason, amplitudes: &[Complex64]) -> Self {
        Self {
            states: amplitudes.len(),
            cycles,
            stop,
            norm: amplitudes.iter().map(Complex64::norm_sqr).sum(),
            amplitudes: amplitudes.iter().map(|a| [a.re, a.im]).collect(),
        }
    }
}

/// Write `report` as pretty JSON to `path`, or stdout if `None`.
pub fn write_report(report: &StateReport, path: Option<&str>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write output: {path}"))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_state_is_normalized() {
        let state = initial_state("uniform", 16).unwrap();
        let norm: f64 = state.iter().map(Complex64::norm_sqr).sum();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_basis_state() {
        let state = initial_state("basis:3", 8).unwrap();
        assert_eq!(state[3], Complex64::new(1.0, 0.0));
        assert_eq!(state.iter().filter(|a| a.norm_sqr() > 0.0).count(), 1);
        assert!(initial_state("basis:8", 8).is_err());
        assert!(initial_state("basis:x", 8).is_err());
        assert!(initial_state("ghz", 8).is_err());
    }

    #[test]
    fn test_report_layout() {
        let report = StateReport::new(
            2,
            StopReason::StepLimit,
            &[Complex64::new(0.6, 0.0), Complex64::new(0.0, 0.8)],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["states"], 2);
        assert_eq!(json["stop"], "step-limit");
        assert_eq!(json["amplitudes"][1][1], 0.8);
        assert!((report.norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let report = StateReport::new(1, StopReason::Converged, &[Complex64::new(1.0, 0.0)]);
        write_report(&report, Some(path)).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["stop"], "converged");
        assert_eq!(written["cycles"], 1);
    }
}
