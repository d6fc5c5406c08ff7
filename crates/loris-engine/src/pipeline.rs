//! Glue between the driver and the model/solver front-ends.

use std::path::PathBuf;

use rand_chacha::ChaCha8Rng;

use loris_model::{instantiate, sample, Assignment, ModelTemplate, RvDescriptor};
use loris_solver::{SolverCommand, Verdict};

use crate::driver::{EngineError, TrialSource};

/// The production trial source: draw an assignment from the model's random
/// variables, write the worker's deterministic instance, and let the
/// external solver decide it.
#[derive(Debug)]
pub struct ModelTrialSource {
    template: ModelTemplate,
    rvs: Vec<RvDescriptor>,
    solver: SolverCommand,
    workdir: PathBuf,
}

impl ModelTrialSource {
    pub fn new(
        template: ModelTemplate,
        rvs: Vec<RvDescriptor>,
        solver: SolverCommand,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template,
            rvs,
            solver,
            workdir: workdir.into(),
        }
    }
}

impl TrialSource for ModelTrialSource {
    fn draw(&self, rng: &mut ChaCha8Rng) -> Assignment {
        sample(&self.rvs, rng)
    }

    fn decide(&self, assignment: &Assignment, worker_id: usize) -> Result<Verdict, EngineError> {
        let instance = instantiate(
            &self.template,
            &self.rvs,
            assignment,
            worker_id,
            &self.workdir,
        )?;
        Ok(self.solver.check(&instance)?)
    }
}
