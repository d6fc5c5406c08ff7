//! Test-spec file loader.
//!
//! A spec file holds one test per line. Empty lines and lines starting with
//! `#` are skipped. The first whitespace-delimited token selects the test
//! kind (case-insensitively); the remaining tokens are its numeric
//! parameters. Registration order is preserved.

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SpecError {
    #[error("line {line}: unknown test kind `{kind}`")]
    #[diagnostic(
        code(loris::spec::unknown_kind),
        help("available kinds are SPRT, BFT, BFTI, Lai, CHB, BEST, NSAM")
    )]
    UnknownKind { line: usize, kind: String },

    #[error("line {line}: {kind} expects {expected} parameters, found {found}")]
    #[diagnostic(code(loris::spec::arity))]
    Arity {
        line: usize,
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: `{token}` is not a valid number")]
    #[diagnostic(code(loris::spec::number))]
    Number { line: usize, token: String },

    #[error("line {line}: {spec}: {constraint}")]
    #[diagnostic(code(loris::spec::range))]
    Range {
        line: usize,
        spec: String,
        constraint: &'static str,
    },
}

/// One parsed test specification. Immutable after construction; the driver
/// turns each into a [`crate::kernel::SequentialTest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TestSpec {
    /// Sequential Probability Ratio Test: `SPRT <theta> <T> <delta>`.
    Sprt { theta: f64, ratio: f64, delta: f64 },
    /// Bayes Factor test: `BFT <theta> <T> <alpha> <beta>`.
    Bft {
        theta: f64,
        ratio: f64,
        alpha: f64,
        beta: f64,
    },
    /// Bayes Factor test with indifference region:
    /// `BFTI <theta> <T> <alpha> <beta> <delta>`.
    Bfti {
        theta: f64,
        ratio: f64,
        alpha: f64,
        beta: f64,
        delta: f64,
    },
    /// Lai's sequential test: `Lai <theta> <cost>`.
    Lai { theta: f64, cost: f64 },
    /// Chernoff-Hoeffding bound estimation: `CHB <delta> <coverage>`.
    Chb { delta: f64, coverage: f64 },
    /// Bayesian interval estimation: `BEST <delta> <coverage> <alpha> <beta>`.
    BayesEstim {
        delta: f64,
        coverage: f64,
        alpha: f64,
        beta: f64,
    },
    /// Naive fixed-sample sampling: `NSAM <samples>`.
    Nsam { samples: u64 },
}

impl TestSpec {
    /// Canonical keyword for this kind, as echoed in result lines.
    pub fn kind(&self) -> &'static str {
        match self {
            TestSpec::Sprt { .. } => "SPRT",
            TestSpec::Bft { .. } => "BFT",
            TestSpec::Bfti { .. } => "BFTI",
            TestSpec::Lai { .. } => "Lai",
            TestSpec::Chb { .. } => "CHB",
            TestSpec::BayesEstim { .. } => "BEST",
            TestSpec::Nsam { .. } => "NSAM",
        }
    }

    /// Canonical reprint of the specification, used as the prefix of the
    /// test's result line. Stable from construction.
    pub fn args_echo(&self) -> String {
        match self {
            TestSpec::Sprt {
                theta,
                ratio,
                delta,
            } => format!("SPRT {theta} {ratio} {delta}"),
            TestSpec::Bft {
                theta,
                ratio,
                alpha,
                beta,
            } => format!("BFT {theta} {ratio} {alpha} {beta}"),
            TestSpec::Bfti {
                theta,
                ratio,
                alpha,
                beta,
                delta,
            } => format!("BFTI {theta} {ratio} {alpha} {beta} {delta}"),
            TestSpec::Lai { theta, cost } => format!("Lai {theta} {cost}"),
            TestSpec::Chb { delta, coverage } => format!("CHB {delta} {coverage}"),
            TestSpec::BayesEstim {
                delta,
                coverage,
                alpha,
                beta,
            } => format!("BEST {delta} {coverage} {alpha} {beta}"),
            TestSpec::Nsam { samples } => format!("NSAM {samples}"),
        }
    }
}

/// Parse a whole spec file, preserving registration order.
pub fn parse_spec(text: &str) -> Result<Vec<TestSpec>, SpecError> {
    let mut specs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        specs.push(parse_line(line, idx + 1)?);
    }
    Ok(specs)
}

fn parse_line(line: &str, line_no: usize) -> Result<TestSpec, SpecError> {
    let mut tokens = line.split_whitespace();
    let keyword = tokens.next().expect("non-empty line has a first token");
    let params: Vec<&str> = tokens.collect();

    let spec = match keyword.to_ascii_uppercase().as_str() {
        "SPRT" => {
            let [theta, ratio, delta] = numbers("SPRT", &params, line_no)?;
            TestSpec::Sprt {
                theta,
                ratio,
                delta,
            }
        }
        "BFT" => {
            let [theta, ratio, alpha, beta] = numbers("BFT", &params, line_no)?;
            TestSpec::Bft {
                theta,
                ratio,
                alpha,
                beta,
            }
        }
        "BFTI" => {
            let [theta, ratio, alpha, beta, delta] = numbers("BFTI", &params, line_no)?;
            TestSpec::Bfti {
                theta,
                ratio,
                alpha,
                beta,
                delta,
            }
        }
        "LAI" => {
            let [theta, cost] = numbers("Lai", &params, line_no)?;
            TestSpec::Lai { theta, cost }
        }
        "CHB" => {
            let [delta, coverage] = numbers("CHB", &params, line_no)?;
            TestSpec::Chb { delta, coverage }
        }
        "BEST" => {
            let [delta, coverage, alpha, beta] = numbers("BEST", &params, line_no)?;
            TestSpec::BayesEstim {
                delta,
                coverage,
                alpha,
                beta,
            }
        }
        "NSAM" => {
            let [count] = numbers("NSAM", &params, line_no)?;
            TestSpec::Nsam {
                samples: count.floor() as u64,
            }
        }
        _ => {
            return Err(SpecError::UnknownKind {
                line: line_no,
                kind: keyword.to_string(),
            })
        }
    };

    validate(&spec, line_no)?;
    Ok(spec)
}

fn numbers<const N: usize>(
    kind: &'static str,
    params: &[&str],
    line: usize,
) -> Result<[f64; N], SpecError> {
    if params.len() != N {
        return Err(SpecError::Arity {
            line,
            kind,
            expected: N,
            found: params.len(),
        });
    }
    let mut out = [0.0; N];
    for (slot, token) in out.iter_mut().zip(params) {
        let value: f64 = token.parse().map_err(|_| SpecError::Number {
            line,
            token: token.to_string(),
        })?;
        // NaN slips through ordered range checks.
        if !value.is_finite() {
            return Err(SpecError::Number {
                line,
                token: token.to_string(),
            });
        }
        *slot = value;
    }
    Ok(out)
}

fn validate(spec: &TestSpec, line: usize) -> Result<(), SpecError> {
    let fail = |constraint: &'static str| SpecError::Range {
        line,
        spec: spec.args_echo(),
        constraint,
    };
    match *spec {
        TestSpec::Sprt {
            theta,
            ratio,
            delta,
        } => {
            if theta <= 0.0 || theta >= 1.0 {
                return Err(fail("must have 0 < theta < 1"));
            }
            if ratio <= 1.0 {
                return Err(fail("must have T > 1"));
            }
            if delta <= 0.0 || delta >= 0.5 {
                return Err(fail("must have 0 < delta < 0.5"));
            }
        }
        TestSpec::Bft {
            theta,
            ratio,
            alpha,
            beta,
        } => {
            if theta <= 0.0 || theta >= 1.0 {
                return Err(fail("must have 0 < theta < 1"));
            }
            if ratio <= 1.0 {
                return Err(fail("must have T > 1"));
            }
            if alpha <= 0.0 || beta <= 0.0 {
                return Err(fail("must have alpha, beta > 0"));
            }
        }
        TestSpec::Bfti {
            theta,
            ratio,
            alpha,
            beta,
            delta,
        } => {
            if theta <= 0.0 || theta >= 1.0 {
                return Err(fail("must have 0 < theta < 1"));
            }
            if ratio <= 1.0 {
                return Err(fail("must have T > 1"));
            }
            if alpha <= 0.0 || beta <= 0.0 {
                return Err(fail("must have alpha, beta > 0"));
            }
            if delta <= 0.0 || delta >= 0.5 {
                return Err(fail("must have 0 < delta < 0.5"));
            }
        }
        TestSpec::Lai { theta, cost } => {
            if theta <= 0.0 || theta >= 1.0 {
                return Err(fail("must have 0 < theta < 1"));
            }
            if cost <= 0.0 {
                return Err(fail("must have cost > 0"));
            }
        }
        TestSpec::Chb { delta, coverage } => {
            if delta <= 0.0 || delta >= 0.5 {
                return Err(fail("must have 0 < delta < 0.5"));
            }
            if coverage <= 0.0 {
                return Err(fail("must have c > 0"));
            }
        }
        TestSpec::BayesEstim {
            delta,
            coverage,
            alpha,
            beta,
        } => {
            if delta <= 0.0 || delta > 0.5 {
                return Err(fail("must have 0 < delta <= 0.5"));
            }
            if coverage <= 0.0 {
                return Err(fail("must have c > 0"));
            }
            if alpha <= 0.0 || beta <= 0.0 {
                return Err(fail("must have alpha, beta > 0"));
            }
        }
        TestSpec::Nsam { samples } => {
            if samples == 0 {
                return Err(fail("must have at least one sample"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Happy-path parsing
    // ---------------------------------------------------------------

    #[test]
    fn parses_every_kind() {
        let text = "\
SPRT 0.5 8 0.1
BFT 0.5 100 1 1
BFTI 0.5 100 1 1 0.1
Lai 0.5 0.01
CHB 0.1 0.9
BEST 0.05 0.95 1 1
NSAM 50
";
        let specs = parse_spec(text).unwrap();
        assert_eq!(specs.len(), 7);
        assert_eq!(
            specs[0],
            TestSpec::Sprt {
                theta: 0.5,
                ratio: 8.0,
                delta: 0.1
            }
        );
        assert_eq!(specs[6], TestSpec::Nsam { samples: 50 });
    }

    #[test]
    fn keywords_match_case_insensitively() {
        let specs = parse_spec("sprt 0.5 8 0.1\nlai 0.5 0.01\nnsam 10").unwrap();
        assert_eq!(specs[0].kind(), "SPRT");
        assert_eq!(specs[1].kind(), "Lai");
        assert_eq!(specs[2].kind(), "NSAM");
    }

    #[test]
    fn skips_comments_and_blank_lines_preserving_order() {
        let text = "\n# hypothesis battery\n  \nNSAM 10\n# estimation\nCHB 0.1 0.9\n";
        let specs = parse_spec(text).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(matches!(specs[0], TestSpec::Nsam { .. }));
        assert!(matches!(specs[1], TestSpec::Chb { .. }));
    }

    #[test]
    fn empty_file_yields_no_tests() {
        assert!(parse_spec("").unwrap().is_empty());
        assert!(parse_spec("# only comments\n\n").unwrap().is_empty());
    }

    #[test]
    fn nsam_count_is_floored() {
        let specs = parse_spec("NSAM 50.9").unwrap();
        assert_eq!(specs[0], TestSpec::Nsam { samples: 50 });
    }

    #[test]
    fn args_echo_is_canonical() {
        let specs = parse_spec("sprt 0.50 8.0 0.10\nbest 0.05 0.95 1 1").unwrap();
        assert_eq!(specs[0].args_echo(), "SPRT 0.5 8 0.1");
        assert_eq!(specs[1].args_echo(), "BEST 0.05 0.95 1 1");
    }

    // ---------------------------------------------------------------
    // Rejections
    // ---------------------------------------------------------------

    #[test]
    fn unknown_kind_is_fatal() {
        let err = parse_spec("NSAM 10\nWALD 0.5 8").unwrap_err();
        match err {
            SpecError::UnknownKind { line, kind } => {
                assert_eq!(line, 2);
                assert_eq!(kind, "WALD");
            }
            other => panic!("expected UnknownKind, got {other}"),
        }
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let err = parse_spec("SPRT 0.5 8").unwrap_err();
        match err {
            SpecError::Arity {
                kind,
                expected,
                found,
                ..
            } => {
                assert_eq!(kind, "SPRT");
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("expected Arity, got {other}"),
        }
    }

    #[test]
    fn non_numeric_token_is_fatal() {
        let err = parse_spec("CHB 0.1 high").unwrap_err();
        assert!(matches!(err, SpecError::Number { token, .. } if token == "high"));
    }

    #[test]
    fn sprt_rejects_out_of_range_parameters() {
        for bad in [
            "SPRT 0 8 0.1",
            "SPRT 1 8 0.1",
            "SPRT 0.5 1 0.1",
            "SPRT 0.5 8 0.5",
            "SPRT 0.5 8 0",
        ] {
            assert!(
                matches!(parse_spec(bad), Err(SpecError::Range { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn bft_rejects_non_positive_prior_parameters() {
        assert!(matches!(
            parse_spec("BFT 0.5 8 0 1"),
            Err(SpecError::Range { .. })
        ));
        assert!(matches!(
            parse_spec("BFT 0.5 8 1 -1"),
            Err(SpecError::Range { .. })
        ));
    }

    #[test]
    fn lai_rejects_non_positive_cost() {
        assert!(matches!(
            parse_spec("Lai 0.5 0"),
            Err(SpecError::Range { .. })
        ));
    }

    #[test]
    fn chb_rejects_bad_half_width() {
        assert!(matches!(
            parse_spec("CHB 0.5 0.9"),
            Err(SpecError::Range { .. })
        ));
        assert!(matches!(
            parse_spec("CHB 0.1 0"),
            Err(SpecError::Range { .. })
        ));
    }

    #[test]
    fn best_accepts_half_width_of_exactly_half() {
        // BEST's half-width bound is inclusive, unlike CHB's.
        assert!(parse_spec("BEST 0.5 0.9 1 1").is_ok());
        assert!(matches!(
            parse_spec("BEST 0.51 0.9 1 1"),
            Err(SpecError::Range { .. })
        ));
    }

    #[test]
    fn nsam_rejects_zero_samples() {
        assert!(matches!(
            parse_spec("NSAM 0"),
            Err(SpecError::Range { .. })
        ));
        assert!(matches!(
            parse_spec("NSAM 0.7"),
            Err(SpecError::Range { .. })
        ));
    }
}
