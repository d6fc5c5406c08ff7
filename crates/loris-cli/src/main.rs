use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use loris_engine::{run, DriverConfig, ModelTrialSource};
use loris_model::preprocess;
use loris_solver::SolverCommand;
use loris_stat::{parse_spec, SequentialTest};

const LONG_ABOUT: &str = "\
Statistical model checker for probabilistic hybrid systems.

Samples the random variables declared in the model, has the delta-decision
solver check each deterministic instance, and feeds the sat/unsat outcomes
into every requested sequential test until all of them terminate.

Available test specifications, one per line of the test-spec file:

Hypothesis tests:
  Lai's test:                                  Lai <theta> <cost per sample>
  Bayes Factor test:                           BFT <theta> <threshold T> <alpha> <beta>
  Bayes Factor test w/ indifference region:    BFTI <theta> <threshold T> <alpha> <beta> <delta>
  Sequential Probability Ratio Test:           SPRT <theta> <threshold T> <delta>

Estimation methods:
  Chernoff-Hoeffding bound:                    CHB <delta> <coverage>
  Bayesian interval estimation:                BEST <delta> <coverage> <alpha> <beta>

Sampling method:
  Naive sampling:                              NSAM <#samples>

Empty lines and lines beginning with '#' are ignored.";

#[derive(Parser)]
#[command(name = "loris", version)]
#[command(about = "Statistical model checker for probabilistic hybrid systems")]
#[command(long_about = LONG_ABOUT)]
struct Cli {
    /// Test-spec file: a sequence of sequential-test specifications
    test_spec: PathBuf,

    /// Probabilistic model file with `random` declarations
    model: PathBuf,

    /// Path to the delta-decision solver executable
    solver: PathBuf,

    /// Upper bound on unfolding steps passed to the solver
    k_upper_bound: u32,

    /// Precision (delta) passed to the solver
    precision: String,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let spec_text = fs::read_to_string(&cli.test_spec)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read test-spec file `{}`", cli.test_spec.display()))?;
    let specs = parse_spec(&spec_text)?;
    if specs.is_empty() {
        println!("No test requested - exiting ...");
        return Ok(());
    }

    let mut tests = Vec::with_capacity(specs.len());
    for spec in &specs {
        tests.push(SequentialTest::new(spec)?);
    }
    info!(tests = tests.len(), "test battery loaded");

    let (template, rvs) = preprocess(&cli.model)?;
    info!(
        random_variables = rvs.len(),
        model = %cli.model.display(),
        "model preprocessed"
    );

    let solver = SolverCommand::new(&cli.solver, cli.k_upper_bound, &cli.precision);
    let workdir = std::env::current_dir()
        .into_diagnostic()
        .wrap_err("cannot determine the working directory")?;
    let source = ModelTrialSource::new(template, rvs, solver, workdir);

    let report = run(
        tests,
        &source,
        &DriverConfig::default(),
        io::stdout(),
    )?;

    let processors = thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(report.workers);
    println!("Number of processors: {processors}");
    println!("Number of threads: {}", report.workers);
    Ok(())
}
