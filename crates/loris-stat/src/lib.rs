//! Sequential statistical tests over Bernoulli trial streams.
//!
//! This crate holds the testing kernel of the loris statistical model
//! checker: seven sequential procedures (three hypothesis tests, three
//! estimation procedures, one fixed-sample sampler) behind a single
//! `observe / is_done / report` surface, plus the loader that parses a
//! test-spec file into the heterogeneous test list the driver runs.

pub mod kernel;
pub mod spec;

pub use kernel::{KernelError, Outcome, SequentialTest, TestReport};
pub use spec::{parse_spec, SpecError, TestSpec};
