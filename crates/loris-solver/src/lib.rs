//! Invocation of the external δ-decision procedure.
//!
//! The solver is a child process run once per deterministic model instance:
//!
//! ```text
//! <solver> -u <k> -precision=<p> <instance>
//! ```
//!
//! It explores unfoldings of increasing depth and writes its conclusions to
//! files named `<base>_<k>_<i>.output`, where `k` is the unfolding depth it
//! actually reached (at most the requested bound, since infeasible models
//! stop early) and `i` indexes the paths explored at that depth. The verdict of a
//! run is the first line of the *last* such file: the literal `unsat` means
//! the instance is unsatisfiable, anything else is a delta-sat report.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Result of one solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Sat,
    Unsat,
}

impl Verdict {
    pub fn is_sat(self) -> bool {
        self == Verdict::Sat
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SolverError {
    #[error("failed to launch solver: {command}")]
    #[diagnostic(code(loris::solver::spawn))]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("solver terminated abnormally: {command}")]
    #[diagnostic(code(loris::solver::abnormal_exit))]
    AbnormalExit { command: String },

    #[error("solver exited with status {status}: {command}")]
    #[diagnostic(code(loris::solver::unsuccessful))]
    Unsuccessful { command: String, status: i32 },

    #[error("no solver output `{base}_<k>_0.output` exists for any k up to {bound}")]
    #[diagnostic(
        code(loris::solver::missing_output),
        help("the solver writes its verdict next to the model instance; check that it ran in the instance directory")
    )]
    MissingOutput { base: String, bound: u32 },

    #[error("cannot read solver output `{path}`")]
    #[diagnostic(code(loris::solver::output_read))]
    OutputRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A configured solver invocation: program path, unfolding bound, precision.
#[derive(Debug, Clone)]
pub struct SolverCommand {
    program: PathBuf,
    unfold_bound: u32,
    precision: String,
}

impl SolverCommand {
    pub fn new(program: impl Into<PathBuf>, unfold_bound: u32, precision: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            unfold_bound,
            precision: precision.into(),
        }
    }

    pub fn unfold_bound(&self) -> u32 {
        self.unfold_bound
    }

    fn rendered(&self, model: &Path) -> String {
        format!(
            "{} -u {} -precision={} {}",
            self.program.display(),
            self.unfold_bound,
            self.precision,
            model.display()
        )
    }

    /// Run the solver on one model instance and read back its verdict.
    ///
    /// Blocks until the child exits; there is no timeout. The child's stdout
    /// is discarded so the driver's own output stays clean; stderr is
    /// inherited for solver diagnostics.
    pub fn check(&self, model: &Path) -> Result<Verdict, SolverError> {
        let command = self.rendered(model);
        debug!(%command, "invoking solver");

        let status = Command::new(&self.program)
            .arg("-u")
            .arg(self.unfold_bound.to_string())
            .arg(format!("-precision={}", self.precision))
            .arg(model)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SolverError::Spawn {
                command: command.clone(),
                source,
            })?
            .wait()
            .map_err(|source| SolverError::Spawn {
                command: command.clone(),
                source,
            })?;

        match status.code() {
            None => return Err(SolverError::AbnormalExit { command }),
            Some(0) => {}
            Some(code) => {
                return Err(SolverError::Unsuccessful {
                    command,
                    status: code,
                })
            }
        }

        let base = model.with_extension("");
        let output = locate_verdict_file(&base, self.unfold_bound)?;
        let verdict = read_verdict(&output)?;
        debug!(output = %output.display(), ?verdict, "solver verdict");
        Ok(verdict)
    }
}

fn output_path(base: &Path, k: u32, i: u32) -> PathBuf {
    PathBuf::from(format!("{}_{k}_{i}.output", base.display()))
}

/// Find the output file that decides a run with unfolding bound `bound`.
///
/// The solver stops at the deepest feasible unfolding, which may be below
/// the requested bound, so probe `<base>_<k>_0.output` downward from `bound`
/// until a depth that was actually explored turns up. Within that depth the
/// paths are numbered from 0 and the last one carries the conclusion, so
/// advance the path index while files keep existing.
pub fn locate_verdict_file(base: &Path, bound: u32) -> Result<PathBuf, SolverError> {
    let mut k = bound as i64;
    let depth = loop {
        if k < 0 {
            return Err(SolverError::MissingOutput {
                base: base.display().to_string(),
                bound,
            });
        }
        if output_path(base, k as u32, 0).exists() {
            break k as u32;
        }
        k -= 1;
    };

    let mut i = 0;
    while output_path(base, depth, i + 1).exists() {
        i += 1;
    }
    Ok(output_path(base, depth, i))
}

/// Read the verdict from the first line of an output file: the literal
/// `unsat` is unsatisfiable, any other content is a delta-sat report.
pub fn read_verdict(path: &Path) -> Result<Verdict, SolverError> {
    let file = File::open(path).map_err(|source| SolverError::OutputRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .map_err(|source| SolverError::OutputRead {
            path: path.to_path_buf(),
            source,
        })?;
    if line.trim_end() == "unsat" {
        Ok(Verdict::Unsat)
    } else {
        Ok(Verdict::Sat)
    }
}
