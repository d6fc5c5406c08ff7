//! Driver contract tests against mock trial sources.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use loris_engine::{run, DriverConfig, EngineError, TrialSource};
use loris_model::Assignment;
use loris_solver::{SolverError, Verdict};
use loris_stat::{parse_spec, Outcome, SequentialTest};

fn tests_from(spec: &str) -> Vec<SequentialTest> {
    parse_spec(spec)
        .unwrap()
        .iter()
        .map(|s| SequentialTest::with_tie_seed(s, 5).unwrap())
        .collect()
}

fn config(workers: usize, seed: u64) -> DriverConfig {
    DriverConfig {
        workers: Some(NonZeroUsize::new(workers).unwrap()),
        seed: Some(seed),
    }
}

/// Draws from a bounded token pool and answers with a fixed verdict.
struct FixedSource {
    verdict: Verdict,
    pool: u64,
    decisions: AtomicUsize,
}

impl FixedSource {
    fn new(verdict: Verdict, pool: u64) -> Self {
        Self {
            verdict,
            pool,
            decisions: AtomicUsize::new(0),
        }
    }
}

impl TrialSource for FixedSource {
    fn draw(&self, rng: &mut ChaCha8Rng) -> Assignment {
        Assignment::new(vec![rng.gen_range(0..self.pool).to_string()])
    }

    fn decide(&self, _assignment: &Assignment, _worker_id: usize) -> Result<Verdict, EngineError> {
        self.decisions.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

/// Deterministic Bernoulli oracle: sat iff the drawn token is below the
/// threshold, so the verdict is a pure function of the assignment.
struct BiasedSource {
    threshold: f64,
}

impl TrialSource for BiasedSource {
    fn draw(&self, rng: &mut ChaCha8Rng) -> Assignment {
        Assignment::new(vec![format!("{:.3}", rng.gen::<f64>())])
    }

    fn decide(&self, assignment: &Assignment, _worker_id: usize) -> Result<Verdict, EngineError> {
        let value: f64 = assignment.tokens()[0].parse().unwrap();
        Ok(if value < self.threshold {
            Verdict::Sat
        } else {
            Verdict::Unsat
        })
    }
}

struct FailingSource;

impl TrialSource for FailingSource {
    fn draw(&self, rng: &mut ChaCha8Rng) -> Assignment {
        Assignment::new(vec![rng.gen_range(0..4u32).to_string()])
    }

    fn decide(&self, _assignment: &Assignment, _worker_id: usize) -> Result<Verdict, EngineError> {
        Err(EngineError::Solver(SolverError::MissingOutput {
            base: "model_0".into(),
            bound: 3,
        }))
    }
}

#[test]
fn samples_advance_in_whole_batches() {
    let source = FixedSource::new(Verdict::Sat, u64::MAX);
    let mut out = Vec::new();
    let report = run(tests_from("NSAM 10"), &source, &config(4, 1), &mut out).unwrap();

    assert_eq!(report.workers, 4);
    assert_eq!(report.batches, 3);
    assert_eq!(report.total_samples, 12);
    assert_eq!(report.sat_samples, 12);
    assert_eq!(report.trials.len(), 12);
    assert_eq!(report.tests[0].samples, 12);
    assert_eq!(report.tests[0].estimate, Some(1.0));
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "NSAM 10: estimate = 1, successes = 12, samples = 12\n"
    );
}

#[test]
fn a_threshold_inside_a_batch_overshoots_by_design() {
    let source = FixedSource::new(Verdict::Unsat, u64::MAX);
    let report = run(tests_from("NSAM 3"), &source, &config(4, 2), &mut Vec::new()).unwrap();

    assert_eq!(report.total_samples, 4);
    assert_eq!(report.tests[0].samples, 4);
    assert_eq!(report.tests[0].estimate, Some(0.0));
}

#[test]
fn total_samples_is_always_a_multiple_of_the_worker_count() {
    for workers in [1, 2, 3, 8] {
        let source = FixedSource::new(Verdict::Sat, u64::MAX);
        let report = run(
            tests_from("NSAM 10"),
            &source,
            &config(workers, 3),
            &mut Vec::new(),
        )
        .unwrap();
        assert_eq!(
            report.total_samples % workers as u64,
            0,
            "workers = {workers}"
        );
        assert!(report.total_samples >= 10);
    }
}

#[test]
fn repeated_assignments_are_decided_once() {
    // A pool of one token means every worker draws the same assignment.
    let source = FixedSource::new(Verdict::Sat, 1);
    let report = run(tests_from("NSAM 8"), &source, &config(4, 4), &mut Vec::new()).unwrap();

    assert_eq!(source.decisions.load(Ordering::SeqCst), 1);
    assert_eq!(report.distinct_assignments, 1);
    // Cache hits still count as trials.
    assert_eq!(report.total_samples, 8);
    assert_eq!(report.sat_samples, 8);
}

#[test]
fn verdicts_are_stable_per_assignment_across_the_whole_run() {
    let source = BiasedSource { threshold: 0.5 };
    let report = run(
        tests_from("NSAM 64"),
        &source,
        &config(4, 5),
        &mut Vec::new(),
    )
    .unwrap();

    let mut seen: std::collections::HashMap<Assignment, Verdict> = Default::default();
    for trial in &report.trials {
        let verdict = *seen.entry(trial.assignment.clone()).or_insert(trial.verdict);
        assert_eq!(verdict, trial.verdict, "assignment {}", trial.assignment);
    }
}

#[test]
fn finished_tests_print_immediately_in_registration_order() {
    let source = FixedSource::new(Verdict::Sat, u64::MAX);
    let mut out = Vec::new();
    run(
        tests_from("NSAM 4\nNSAM 8"),
        &source,
        &config(4, 6),
        &mut out,
    )
    .unwrap();

    let printed = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = printed.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("NSAM 4: "), "got {:?}", lines[0]);
    assert!(lines[1].starts_with("NSAM 8: "), "got {:?}", lines[1]);
    assert!(lines[0].ends_with("samples = 4"));
    assert!(lines[1].ends_with("samples = 8"));
}

#[test]
fn hypothesis_tests_terminate_against_a_biased_oracle() {
    let source = BiasedSource { threshold: 0.9 };
    let mut out = Vec::new();
    let report = run(
        tests_from("SPRT 0.5 8 0.1"),
        &source,
        &config(4, 7),
        &mut out,
    )
    .unwrap();

    assert_eq!(report.tests[0].outcome, Outcome::AcceptNull);
    assert_eq!(report.total_samples % 4, 0);
    assert!(String::from_utf8(out)
        .unwrap()
        .contains("Accept Null hypothesis"));
}

#[test]
fn seeded_runs_are_reproducible() {
    let run_once = || {
        let source = BiasedSource { threshold: 0.3 };
        run(
            tests_from("CHB 0.15 0.9"),
            &source,
            &config(4, 8),
            &mut Vec::new(),
        )
        .unwrap()
    };
    let a = run_once();
    let b = run_once();
    assert_eq!(a.total_samples, b.total_samples);
    assert_eq!(a.sat_samples, b.sat_samples);
    assert_eq!(a.tests, b.tests);
}

#[test]
fn a_failing_decision_aborts_the_run() {
    let err = run(
        tests_from("NSAM 100"),
        &FailingSource,
        &config(4, 9),
        &mut Vec::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Solver(SolverError::MissingOutput { .. })
    ));
}

#[test]
fn an_empty_test_list_runs_no_trials() {
    let source = FixedSource::new(Verdict::Sat, u64::MAX);
    let report = run(Vec::new(), &source, &config(4, 10), &mut Vec::new()).unwrap();
    assert_eq!(report.total_samples, 0);
    assert_eq!(source.decisions.load(Ordering::SeqCst), 0);
}
