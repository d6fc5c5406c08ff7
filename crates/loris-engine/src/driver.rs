//! The parallel batch driver.
//!
//! W worker threads each complete one trial per batch; two barrier waits
//! separate trials from the coordinator step, in which worker 0 folds the
//! batch into the global counters, advances every pending test in
//! registration order, and prints tests that just finished. All shared
//! coordinator state is touched only between the barriers, so each test
//! sees a strictly increasing sample count stepping by exactly W.
//!
//! Workers observe the `all_done` flag at the top of the next iteration, so
//! the batch in flight always completes: a test whose threshold falls in
//! the middle of a batch sees a slightly larger `n`, which the kernel's
//! monotone tests tolerate by design.

use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;

use miette::Diagnostic;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use loris_model::{Assignment, ModelError};
use loris_solver::{SolverError, Verdict};
use loris_stat::{KernelError, SequentialTest, TestReport};

use crate::cache::ObservationCache;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("cannot determine the host's available parallelism")]
    #[diagnostic(code(loris::engine::parallelism))]
    Parallelism(#[source] io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kernel(#[from] KernelError),

    #[error("failed to write a result line")]
    #[diagnostic(code(loris::engine::sink))]
    Sink(#[source] io::Error),
}

/// Produces the per-trial work: drawing an assignment and deciding it.
///
/// The production implementation samples the model's random variables and
/// drives the external solver; tests substitute deterministic mocks.
pub trait TrialSource: Sync {
    /// Draw the next assignment from the worker's sampling stream.
    fn draw(&self, rng: &mut ChaCha8Rng) -> Assignment;

    /// Decide an assignment, typically by instantiating the model for this
    /// worker and invoking the solver.
    fn decide(&self, assignment: &Assignment, worker_id: usize) -> Result<Verdict, EngineError>;
}

/// Driver configuration.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Worker count; defaults to the host's available parallelism. Fixed
    /// for the lifetime of the run.
    pub workers: Option<NonZeroUsize>,
    /// Base seed for the per-worker sampling streams; defaults to entropy.
    /// A fixed seed makes a run with a deterministic source reproducible.
    pub seed: Option<u64>,
}

/// One completed trial: the drawn assignment and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialRecord {
    pub assignment: Assignment,
    pub verdict: Verdict,
}

/// Summary of a finished run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub workers: usize,
    pub batches: u64,
    pub total_samples: u64,
    pub sat_samples: u64,
    /// Distinct assignments observed (the cache's key count).
    pub distinct_assignments: usize,
    /// Per-test frozen results, in registration order.
    pub tests: Vec<TestReport>,
    /// Every trial of the run, in batch order.
    pub trials: Vec<TrialRecord>,
}

struct Coordinator<W> {
    tests: Vec<SequentialTest>,
    total_samples: u64,
    sat_samples: u64,
    batches: u64,
    trials: Vec<TrialRecord>,
    out: W,
    failure: Option<EngineError>,
}

struct Shared<'a, S, W> {
    source: &'a S,
    cache: &'a ObservationCache,
    barrier: &'a Barrier,
    slots: &'a [Mutex<Option<TrialRecord>>],
    state: &'a Mutex<Coordinator<W>>,
    all_done: &'a AtomicBool,
}

/// Run every test to termination against the given trial source.
///
/// Result lines are written to `out` the moment each test terminates; the
/// returned report carries the frozen per-test results plus run totals.
pub fn run<S: TrialSource, W: Write + Send>(
    tests: Vec<SequentialTest>,
    source: &S,
    config: &DriverConfig,
    out: W,
) -> Result<RunReport, EngineError> {
    let workers = match config.workers {
        Some(w) => w.get(),
        None => thread::available_parallelism()
            .map_err(EngineError::Parallelism)?
            .get(),
    };
    if tests.is_empty() {
        return Ok(RunReport {
            workers,
            batches: 0,
            total_samples: 0,
            sat_samples: 0,
            distinct_assignments: 0,
            tests: Vec::new(),
            trials: Vec::new(),
        });
    }

    let base_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(workers, tests = tests.len(), "statistical check starting");

    let cache = ObservationCache::new();
    let barrier = Barrier::new(workers);
    let slots: Vec<Mutex<Option<TrialRecord>>> = (0..workers).map(|_| Mutex::new(None)).collect();
    let all_done = AtomicBool::new(false);
    let state = Mutex::new(Coordinator {
        tests,
        total_samples: 0,
        sat_samples: 0,
        batches: 0,
        trials: Vec::new(),
        out,
        failure: None,
    });

    let shared = Shared {
        source,
        cache: &cache,
        barrier: &barrier,
        slots: &slots,
        state: &state,
        all_done: &all_done,
    };

    thread::scope(|scope| {
        for worker_id in 0..workers {
            let shared = &shared;
            let seed = base_seed.wrapping_add(worker_id as u64);
            scope.spawn(move || worker_loop(worker_id, seed, shared));
        }
    });

    let coordinator = state.into_inner().expect("coordinator mutex poisoned");
    if let Some(failure) = coordinator.failure {
        return Err(failure);
    }

    let tests = coordinator
        .tests
        .iter()
        .map(SequentialTest::report)
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        total_samples = coordinator.total_samples,
        sat_samples = coordinator.sat_samples,
        distinct = cache.len(),
        "statistical check finished"
    );
    Ok(RunReport {
        workers,
        batches: coordinator.batches,
        total_samples: coordinator.total_samples,
        sat_samples: coordinator.sat_samples,
        distinct_assignments: cache.len(),
        tests,
        trials: coordinator.trials,
    })
}

fn worker_loop<S: TrialSource, W: Write + Send>(
    worker_id: usize,
    seed: u64,
    shared: &Shared<'_, S, W>,
) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    loop {
        if shared.all_done.load(Ordering::Acquire) {
            break;
        }

        match run_trial(worker_id, shared, &mut rng) {
            Ok(record) => {
                *shared.slots[worker_id].lock().expect("slot mutex poisoned") = Some(record);
            }
            Err(error) => {
                let mut state = shared.state.lock().expect("coordinator mutex poisoned");
                state.failure.get_or_insert(error);
            }
        }

        shared.barrier.wait();
        if worker_id == 0 {
            coordinate(shared);
        }
        shared.barrier.wait();
    }
}

fn run_trial<S: TrialSource, W>(
    worker_id: usize,
    shared: &Shared<'_, S, W>,
    rng: &mut ChaCha8Rng,
) -> Result<TrialRecord, EngineError> {
    let assignment = shared.source.draw(rng);
    let (verdict, fresh) = shared
        .cache
        .lookup_or_solve(&assignment, || shared.source.decide(&assignment, worker_id))?;
    if !fresh {
        debug!(worker_id, %assignment, ?verdict, "cache hit");
    }
    Ok(TrialRecord {
        assignment,
        verdict,
    })
}

/// The between-barriers step: fold the batch into the global counters,
/// advance every pending test, print the ones that finished.
fn coordinate<S, W: Write>(shared: &Shared<'_, S, W>) {
    let mut state = shared.state.lock().expect("coordinator mutex poisoned");
    if state.failure.is_some() {
        shared.all_done.store(true, Ordering::Release);
        return;
    }

    let mut batch_sat = 0u64;
    for slot in shared.slots {
        let record = slot
            .lock()
            .expect("slot mutex poisoned")
            .take()
            .expect("every worker reports a trial or a failure per batch");
        if record.verdict.is_sat() {
            batch_sat += 1;
        }
        state.trials.push(record);
    }
    state.total_samples += shared.slots.len() as u64;
    state.sat_samples += batch_sat;
    state.batches += 1;
    debug!(
        batch = state.batches,
        total_samples = state.total_samples,
        sat_samples = state.sat_samples,
        "batch folded"
    );

    let Coordinator {
        tests,
        total_samples,
        sat_samples,
        out,
        failure,
        ..
    } = &mut *state;
    let (n, x) = (*total_samples, *sat_samples);
    let mut done = true;
    for test in tests.iter_mut() {
        if !test.is_done() {
            test.observe(n, x);
            if test.is_done() {
                let line = test
                    .report()
                    .expect("a test that reports done has a result")
                    .to_string();
                if let Err(error) = writeln!(out, "{line}") {
                    failure.get_or_insert(EngineError::Sink(error));
                }
            }
        }
        done &= test.is_done();
    }

    if done || failure.is_some() {
        shared.all_done.store(true, Ordering::Release);
    }
}
