//! The sequential testing kernel.
//!
//! Every procedure shares one surface: construct from a [`TestSpec`]
//! (validating derived constants), feed it cumulative `(samples, successes)`
//! observations with [`SequentialTest::observe`], and query
//! [`SequentialTest::report`] once [`SequentialTest::is_done`] holds.
//!
//! `observe` is monotone: callers must feed non-decreasing `n` with
//! `x <= n`. Once a test reaches a terminal outcome its recorded
//! `(samples, successes, estimate)` triple is frozen and later observations
//! are no-ops, so a driver that overshoots a threshold by a whole batch
//! still reports the state at the first transition.

use std::f64::consts::PI;
use std::fmt;

use miette::Diagnostic;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use statrs::function::beta::beta_reg;
use thiserror::Error;

use crate::spec::TestSpec;

#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error("{spec}: Prob(H_1) is either 0 or 1")]
    #[diagnostic(
        code(loris::kernel::degenerate_prior),
        help("the Beta prior puts essentially all its mass on one hypothesis; adjust alpha/beta")
    )]
    DegeneratePrior { spec: String },

    #[error("{spec}: indifference region borders 0 or 1")]
    #[diagnostic(code(loris::kernel::indifference_region))]
    IndifferenceRegion { spec: String },

    #[error("{spec}: result requested before the test terminated")]
    #[diagnostic(code(loris::kernel::pending))]
    Pending { spec: String },
}

/// Terminal state of a sequential test.
///
/// Hypothesis tests end in `AcceptNull` or `AcceptAlt`; estimation and
/// sampling procedures end in `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    AcceptNull,
    AcceptAlt,
    Done,
}

/// Kind-specific state and derived constants.
#[derive(Debug, Clone)]
enum Procedure {
    Sprt {
        log_ratio: f64,
        theta1: f64,
        theta2: f64,
    },
    Bft {
        ratio: f64,
        prior_odds: f64,
        theta: f64,
        alpha: f64,
        beta: f64,
    },
    Bfti {
        ratio: f64,
        prior_odds: f64,
        theta1: f64,
        theta2: f64,
        alpha: f64,
        beta: f64,
    },
    Lai {
        theta: f64,
        cost: f64,
        tie_rng: ChaCha8Rng,
    },
    Chb {
        bound: u64,
    },
    BayesEstim {
        delta: f64,
        coverage: f64,
        alpha: f64,
        beta: f64,
    },
    Nsam {
        bound: u64,
    },
}

enum Decision {
    Null,
    Alt,
    Estimate(f64),
}

/// One live sequential test.
#[derive(Debug, Clone)]
pub struct SequentialTest {
    args_echo: String,
    outcome: Outcome,
    samples: u64,
    successes: u64,
    estimate: Option<f64>,
    procedure: Procedure,
}

impl SequentialTest {
    /// Build a test from its parsed specification, computing derived
    /// constants and rejecting degenerate configurations.
    ///
    /// Lai's tie-break draws from an entropy-seeded stream; use
    /// [`SequentialTest::with_tie_seed`] for a deterministic one.
    pub fn new(spec: &TestSpec) -> Result<Self, KernelError> {
        Self::build(spec, ChaCha8Rng::from_entropy())
    }

    /// Like [`SequentialTest::new`] but with a seeded tie-break stream.
    pub fn with_tie_seed(spec: &TestSpec, seed: u64) -> Result<Self, KernelError> {
        Self::build(spec, ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(spec: &TestSpec, tie_rng: ChaCha8Rng) -> Result<Self, KernelError> {
        let args_echo = spec.args_echo();
        let procedure = match *spec {
            TestSpec::Sprt {
                theta,
                ratio,
                delta,
            } => {
                let (theta1, theta2) = indifference_region(theta, delta, &args_echo)?;
                Procedure::Sprt {
                    log_ratio: ratio.ln(),
                    theta1,
                    theta2,
                }
            }
            TestSpec::Bft {
                theta,
                ratio,
                alpha,
                beta,
            } => Procedure::Bft {
                ratio,
                prior_odds: prior_odds(theta, alpha, beta, &args_echo)?,
                theta,
                alpha,
                beta,
            },
            TestSpec::Bfti {
                theta,
                ratio,
                alpha,
                beta,
                delta,
            } => {
                let (theta1, theta2) = indifference_region(theta, delta, &args_echo)?;
                Procedure::Bfti {
                    ratio,
                    prior_odds: prior_odds(theta1, alpha, beta, &args_echo)?,
                    theta1,
                    theta2,
                    alpha,
                    beta,
                }
            }
            TestSpec::Lai { theta, cost } => Procedure::Lai {
                theta,
                cost,
                tie_rng,
            },
            TestSpec::Chb { delta, coverage } => Procedure::Chb {
                bound: chernoff_hoeffding_bound(delta, coverage),
            },
            TestSpec::BayesEstim {
                delta,
                coverage,
                alpha,
                beta,
            } => Procedure::BayesEstim {
                delta,
                coverage,
                alpha,
                beta,
            },
            TestSpec::Nsam { samples } => Procedure::Nsam { bound: samples },
        };
        Ok(Self {
            args_echo,
            outcome: Outcome::Pending,
            samples: 0,
            successes: 0,
            estimate: None,
            procedure,
        })
    }

    /// Canonical reprint of the spec, as used in the result line.
    pub fn args(&self) -> &str {
        &self.args_echo
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_done(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    /// The precomputed Chernoff-Hoeffding sample bound, if this is a CHB test.
    pub fn chb_bound(&self) -> Option<u64> {
        match self.procedure {
            Procedure::Chb { bound } => Some(bound),
            _ => None,
        }
    }

    /// Feed the cumulative trial counts `(n, x)` and attempt to terminate.
    ///
    /// No-op once terminal, and for the degenerate `n = 0` observation.
    pub fn observe(&mut self, n: u64, x: u64) {
        if self.outcome != Outcome::Pending || n == 0 {
            return;
        }
        debug_assert!(x <= n, "successes {x} exceed samples {n}");

        let decision = match &mut self.procedure {
            Procedure::Chb { bound } | Procedure::Nsam { bound } => {
                (n >= *bound).then(|| Decision::Estimate(x as f64 / n as f64))
            }
            Procedure::BayesEstim {
                delta,
                coverage,
                alpha,
                beta,
            } => {
                let a = x as f64 + *alpha;
                let b = n as f64 + *alpha + *beta;
                let posterior_mean = a / b;
                let mut lower = posterior_mean - *delta;
                let mut upper = posterior_mean + *delta;
                // Shift the interval back inside [0, 1] instead of truncating
                // it, so its width stays 2*delta.
                if upper > 1.0 {
                    upper = 1.0;
                    lower = 1.0 - 2.0 * *delta;
                }
                if lower < 0.0 {
                    lower = 0.0;
                    upper = 2.0 * *delta;
                }
                let cov = beta_reg(a, b - a, upper) - beta_reg(a, b - a, lower);
                (cov >= *coverage).then_some(Decision::Estimate(posterior_mean))
            }
            Procedure::Sprt {
                log_ratio,
                theta1,
                theta2,
            } => {
                let r = x as f64 * (*theta2 / *theta1).ln()
                    + (n - x) as f64 * ((1.0 - *theta2) / (1.0 - *theta1)).ln();
                if r > *log_ratio {
                    Some(Decision::Null)
                } else if r < -*log_ratio {
                    Some(Decision::Alt)
                } else {
                    None
                }
            }
            Procedure::Bft {
                ratio,
                prior_odds,
                theta,
                alpha,
                beta,
            } => {
                let posterior = beta_reg(x as f64 + *alpha, (n - x) as f64 + *beta, *theta);
                let factor = *prior_odds * (1.0 / posterior - 1.0);
                bayes_decision(factor, *ratio)
            }
            Procedure::Bfti {
                ratio,
                prior_odds,
                theta1,
                theta2,
                alpha,
                beta,
            } => {
                let a = x as f64 + *alpha;
                let b = (n - x) as f64 + *beta;
                let factor = *prior_odds * (1.0 - beta_reg(a, b, *theta2)) / beta_reg(a, b, *theta1);
                bayes_decision(factor, *ratio)
            }
            Procedure::Lai {
                theta,
                cost,
                tie_rng,
            } => {
                let max_likelihood = x as f64 / n as f64;
                let kl = if max_likelihood == 0.0 {
                    (1.0 / (1.0 - *theta)).ln()
                } else if max_likelihood == 1.0 {
                    (1.0 / *theta).ln()
                } else {
                    max_likelihood * (max_likelihood / *theta).ln()
                        + (1.0 - max_likelihood) * ((1.0 - max_likelihood) / (1.0 - *theta)).ln()
                };
                let threshold = lai_threshold(*cost * n as f64) / n as f64;
                if kl >= threshold {
                    if max_likelihood > *theta {
                        Some(Decision::Null)
                    } else if max_likelihood < *theta {
                        Some(Decision::Alt)
                    } else if tie_rng.gen_bool(0.5) {
                        Some(Decision::Null)
                    } else {
                        Some(Decision::Alt)
                    }
                } else {
                    None
                }
            }
        };

        if let Some(decision) = decision {
            self.samples = n;
            self.successes = x;
            match decision {
                Decision::Null => self.outcome = Outcome::AcceptNull,
                Decision::Alt => self.outcome = Outcome::AcceptAlt,
                Decision::Estimate(estimate) => {
                    self.estimate = Some(estimate);
                    self.outcome = Outcome::Done;
                }
            }
        }
    }

    /// The frozen result of a terminated test.
    ///
    /// Requesting the result of a pending test is an error, never a silent
    /// partial report.
    pub fn report(&self) -> Result<TestReport, KernelError> {
        if self.outcome == Outcome::Pending {
            return Err(KernelError::Pending {
                spec: self.args_echo.clone(),
            });
        }
        Ok(TestReport {
            spec: self.args_echo.clone(),
            outcome: self.outcome,
            successes: self.successes,
            samples: self.samples,
            estimate: self.estimate,
            chb_bound: self.chb_bound(),
        })
    }
}

fn bayes_decision(factor: f64, ratio: f64) -> Option<Decision> {
    if factor > ratio {
        Some(Decision::Null)
    } else if factor < 1.0 / ratio {
        Some(Decision::Alt)
    } else {
        None
    }
}

fn indifference_region(theta: f64, delta: f64, spec: &str) -> Result<(f64, f64), KernelError> {
    let theta1 = (theta - delta).max(0.0);
    let theta2 = (theta + delta).min(1.0);
    if theta1 <= 0.0 || theta2 >= 1.0 {
        return Err(KernelError::IndifferenceRegion {
            spec: spec.to_string(),
        });
    }
    Ok((theta1, theta2))
}

/// Prior odds P(H_1)/P(H_0) of the Beta(alpha, beta) prior split at `theta`.
fn prior_odds(theta: f64, alpha: f64, beta: f64, spec: &str) -> Result<f64, KernelError> {
    let p_alt = beta_reg(alpha, beta, theta);
    if p_alt <= 0.0 || p_alt >= 1.0 {
        return Err(KernelError::DegeneratePrior {
            spec: spec.to_string(),
        });
    }
    Ok(p_alt / (1.0 - p_alt))
}

/// Chernoff-Hoeffding sample bound for half-width `delta` and coverage `c`.
fn chernoff_hoeffding_bound(delta: f64, coverage: f64) -> u64 {
    (1.0 / (2.0 * delta * delta) * (1.0 / (1.0 - coverage)).ln()).ceil() as u64
}

/// Lai's boundary function g(t) with t the accumulated observation cost.
fn lai_threshold(t: f64) -> f64 {
    if t >= 0.8 {
        let w = 1.0 / t;
        (1.0 / (16.0 * PI))
            * (w.powi(2) - (10.0 / (48.0 * PI)) * w.powi(4) + (5.0 / (48.0 * PI)).powi(2) * w.powi(6))
    } else if t >= 0.1 {
        (-1.38 * t - 2.0).exp() / (2.0 * t)
    } else if t >= 0.01 {
        (0.1521 + 0.000225 / t - 0.00585 / t.sqrt()) / (2.0 * t)
    } else {
        // Small-t asymptotic expansion. The value is sensitive to how these
        // terms are grouped; reviewers changing this branch should re-derive
        // it rather than refactor the arithmetic.
        let w = 1.0 / t;
        0.5 * (2.0 * w.ln() + w.ln().ln() - (4.0 * PI).ln() - 3.0 * (-0.016 * w.sqrt()).exp())
    }
}

/// The frozen result of one terminated test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub spec: String,
    pub outcome: Outcome,
    pub successes: u64,
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chb_bound: Option<u64>,
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::AcceptNull => write!(
                f,
                "{}: Accept Null hypothesis, successes = {}, samples = {}",
                self.spec, self.successes, self.samples
            ),
            Outcome::AcceptAlt => write!(
                f,
                "{}: Reject Null hypothesis, successes = {}, samples = {}",
                self.spec, self.successes, self.samples
            ),
            Outcome::Done => {
                write!(
                    f,
                    "{}: estimate = {}, successes = {}, samples = {}",
                    self.spec,
                    self.estimate.unwrap_or(f64::NAN),
                    self.successes,
                    self.samples
                )?;
                if let Some(bound) = self.chb_bound {
                    write!(f, ", C-H bound = {bound}")?;
                }
                Ok(())
            }
            Outcome::Pending => write!(f, "{}: pending", self.spec),
        }
    }
}
