//! Random-variable descriptors and sampling.

use std::fmt;

use rand::Rng;
use rand_distr::{Distribution as _, Exp, Normal};
use serde::Serialize;

use crate::ModelError;

/// Supported sampling distributions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dist", rename_all = "lowercase")]
pub enum Distribution {
    Uniform { lo: f64, hi: f64 },
    Normal { mean: f64, std_dev: f64 },
    Exponential { rate: f64 },
    Bernoulli { p: f64 },
}

/// One declared random variable: a name plus its distribution.
///
/// Declaration order in the model defines assignment order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RvDescriptor {
    pub name: String,
    pub distribution: Distribution,
}

impl RvDescriptor {
    /// Parse a `random <name> ~ <dist>(<args>);` declaration line.
    pub fn parse(line: &str, line_no: usize) -> Result<Self, ModelError> {
        let malformed = |reason: &str| ModelError::Declaration {
            line: line_no,
            reason: reason.to_string(),
        };

        let rest = line
            .trim()
            .strip_prefix("random")
            .ok_or_else(|| malformed("missing `random` keyword"))?;
        let (name, dist) = rest
            .split_once('~')
            .ok_or_else(|| malformed("missing `~` between name and distribution"))?;

        let name = name.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || name.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(malformed("variable name must be an identifier"));
        }

        let dist = dist.trim().trim_end_matches(';').trim();
        let open = dist
            .find('(')
            .ok_or_else(|| malformed("missing `(` after distribution name"))?;
        let close = dist
            .rfind(')')
            .ok_or_else(|| malformed("missing closing `)`"))?;
        if close < open {
            return Err(malformed("mismatched parentheses"));
        }
        let dist_name = dist[..open].trim();
        let mut args = Vec::new();
        let arg_text = dist[open + 1..close].trim();
        if !arg_text.is_empty() {
            for piece in arg_text.split(',') {
                let value: f64 = piece
                    .trim()
                    .parse()
                    .map_err(|_| malformed(&format!("`{}` is not a number", piece.trim())))?;
                // NaN slips through ordered range checks.
                if !value.is_finite() {
                    return Err(malformed(&format!("`{}` is not finite", piece.trim())));
                }
                args.push(value);
            }
        }

        let invalid = |reason: &'static str| ModelError::Distribution {
            line: line_no,
            name: dist_name.to_string(),
            reason,
        };
        let distribution = match (dist_name, args.as_slice()) {
            ("uniform", &[lo, hi]) => {
                if lo >= hi {
                    return Err(invalid("lower bound must be below upper bound"));
                }
                Distribution::Uniform { lo, hi }
            }
            ("normal", &[mean, std_dev]) => {
                if std_dev <= 0.0 {
                    return Err(invalid("standard deviation must be positive"));
                }
                Distribution::Normal { mean, std_dev }
            }
            ("exponential", &[rate]) => {
                if rate <= 0.0 {
                    return Err(invalid("rate must be positive"));
                }
                Distribution::Exponential { rate }
            }
            ("bernoulli", &[p]) => {
                if !(0.0..=1.0).contains(&p) {
                    return Err(invalid("success probability must lie in [0, 1]"));
                }
                Distribution::Bernoulli { p }
            }
            ("uniform" | "normal" | "exponential" | "bernoulli", _) => {
                return Err(invalid("wrong number of parameters"))
            }
            _ => return Err(malformed(&format!("unknown distribution `{dist_name}`"))),
        };

        Ok(Self {
            name: name.to_string(),
            distribution,
        })
    }
}

impl Distribution {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Distribution::Uniform { lo, hi } => rng.gen_range(lo..hi),
            Distribution::Normal { mean, std_dev } => Normal::new(mean, std_dev)
                .expect("parameters validated at declaration")
                .sample(rng),
            Distribution::Exponential { rate } => Exp::new(rate)
                .expect("parameters validated at declaration")
                .sample(rng),
            Distribution::Bernoulli { p } => {
                if rng.gen_bool(p) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// A drawn valuation of the model's random variables: one decimal token per
/// declaration, in declaration order.
///
/// Assignments are compared token-wise (exact string equality, no numeric
/// normalization); the observation cache keys on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Assignment(Vec<String>);

impl Assignment {
    pub fn new(tokens: Vec<String>) -> Self {
        Self(tokens)
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Draw one value per descriptor, formatted as decimal tokens.
pub fn sample<R: Rng + ?Sized>(rvs: &[RvDescriptor], rng: &mut R) -> Assignment {
    Assignment(
        rvs.iter()
            .map(|rv| rv.distribution.draw(rng).to_string())
            .collect(),
    )
}
