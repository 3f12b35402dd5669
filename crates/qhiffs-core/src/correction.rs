//! Vectorized error-correction pass.
//!
//! Every component of every amplitude goes through one fused multiply-add:
//!
//!   x' = fma(x, c, o)        (default c = 1/√2, o = 0)
//!
//! The vector is processed in blocks of `vector_width` amplitudes on the
//! host; trailing amplitudes that do not fill a block take the scalar path
//! with identical arithmetic, so results do not depend on the width.
//!
//! An optional [`NormalizationPolicy`] checks `Σ|a|²` afterwards.

use std::f64::consts::FRAC_1_SQRT_2;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{DivergenceAction, NormalizationPolicy, RunConfiguration};
use crate::error::{CoreError, CoreResult};
use crate::pass::{AmplitudeKernel, HostVectorPass, ParallelPass, PassReport};

/// Lanes processed together inside one block.
const LANES: usize = 8;

/// Parameters of the correction transform `x' = fma(x, coefficient, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOperator {
    /// Multiplier.
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
    /// Additive term.
    #[serde(default)]
    pub offset: f64,
}

fn default_coefficient() -> f64 {
    FRAC_1_SQRT_2
}

impl Default for CorrectionOperator {
    fn default() -> Self {
        Self {
            coefficient: FRAC_1_SQRT_2,
            offset: 0.0,
        }
    }
}

impl CorrectionOperator {
    /// Create an operator.
    pub fn new(coefficient: f64, offset: f64) -> Self {
        Self {
            coefficient,
            offset,
        }
    }

    /// Transform one component.
    #[inline]
    pub fn transform(&self, x: f64) -> f64 {
        x.mul_add(self.coefficient, self.offset)
    }
}

impl AmplitudeKernel for CorrectionOperator {
    fn apply(&self, _index: usize, amplitude: &mut Complex64) {
        amplitude.re = self.transform(amplitude.re);
        amplitude.im = self.transform(amplitude.im);
    }

    fn apply_block(&self, _base: usize, block: &mut [Complex64]) {
        let mut chunks = block.chunks_exact_mut(LANES);
        for chunk in &mut chunks {
            let mut re = [0.0f64; LANES];
            let mut im = [0.0f64; LANES];
            for (k, a) in chunk.iter().enumerate() {
                re[k] = a.re;
                im[k] = a.im;
            }
            for k in 0..LANES {
                re[k] = self.transform(re[k]);
                im[k] = self.transform(im[k]);
            }
            for (k, a) in chunk.iter_mut().enumerate() {
                a.re = re[k];
                a.im = im[k];
            }
        }
        for amplitude in chunks.into_remainder() {
            self.apply(0, amplitude);
        }
    }
}

/// Out-of-tolerance norm observed after a correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    /// Observed `Σ|a|²` before any renormalization.
    pub norm: f64,
    /// Tolerance in force.
    pub tolerance: f64,
    /// Whether the vector was rescaled.
    pub renormalized: bool,
}

/// Outcome of one correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    /// Pass statistics.
    pub pass: PassReport,
    /// `Σ|a|²` after the transform, when a normalization policy is set.
    pub norm: Option<f64>,
    /// Set when the norm left tolerance and the policy did not abort.
    pub divergence: Option<Divergence>,
}

/// Applies the correction operator and the normalization policy.
#[derive(Debug, Clone)]
pub struct ErrorCorrectionPass {
    pass: Arc<dyn ParallelPass>,
    operator: CorrectionOperator,
    normalization: Option<NormalizationPolicy>,
}

impl ErrorCorrectionPass {
    /// Host-vector pass of `config.vector_width` lanes with the configured
    /// operator and policy.
    pub fn from_config(config: &RunConfiguration) -> Self {
        Self {
            pass: Arc::new(HostVectorPass::new(config.vector_width)),
            operator: config.correction,
            normalization: config.normalization,
        }
    }

    /// Replace the pass backend.
    #[must_use]
    pub fn with_pass(mut self, pass: Arc<dyn ParallelPass>) -> Self {
        self.pass = pass;
        self
    }

    /// The operator in use.
    pub fn operator(&self) -> &CorrectionOperator {
        &self.operator
    }

    /// Correct `amplitudes` in place.
    pub fn correct(&self, amplitudes: &mut [Complex64]) -> CoreResult<CorrectionReport> {
        let pass = self.pass.run(amplitudes, &self.operator);
        debug!(
            size = pass.size,
            blocks = pass.workers,
            tail = pass.tail,
            "correction pass complete"
        );

        let Some(policy) = self.normalization else {
            return Ok(CorrectionReport {
                pass,
                norm: None,
                divergence: None,
            });
        };

        // Sequential sum: every node must reach the same value bit for bit.
        let norm: f64 = amplitudes.iter().map(Complex64::norm_sqr).sum();
        if (norm - 1.0).abs() <= policy.tolerance {
            return Ok(CorrectionReport {
                pass,
                norm: Some(norm),
                divergence: None,
            });
        }

        let divergence = match policy.on_divergence {
            DivergenceAction::Abort => {
                return Err(CoreError::NumericDivergence {
                    norm,
                    tolerance: policy.tolerance,
                });
            }
            DivergenceAction::Flag => {
                warn!(norm, tolerance = policy.tolerance, "state norm outside tolerance");
                Divergence {
                    norm,
                    tolerance: policy.tolerance,
                    renormalized: false,
                }
            }
            DivergenceAction::Renormalize => {
                if norm == 0.0 || !norm.is_finite() {
                    return Err(CoreError::NumericDivergence {
                        norm,
                        tolerance: policy.tolerance,
                    });
                }
                let scale = norm.sqrt().recip();
                for amplitude in amplitudes.iter_mut() {
                    *amplitude *= scale;
                }
                debug!(norm, scale, "state renormalized");
                Divergence {
                    norm,
                    tolerance: policy.tolerance,
                    renormalized: true,
                }
            }
        };

        Ok(CorrectionReport {
            pass,
            norm: Some(norm),
            divergence: Some(divergence),
        })
    }
}
