//! Statistical checking engine.
//!
//! This crate ties the pieces of the loris model checker together: the
//! write-once observation cache that deduplicates solver work, the parallel
//! batch driver that advances every sequential test in lock-step, and the
//! pipeline glue that feeds the driver from a probabilistic model and an
//! external δ-decision solver.

pub mod cache;
pub mod driver;
pub mod pipeline;

pub use cache::ObservationCache;
pub use driver::{run, DriverConfig, EngineError, RunReport, TrialRecord, TrialSource};
pub use pipeline::ModelTrialSource;
