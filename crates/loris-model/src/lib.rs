//! Probabilistic model front-end.
//!
//! A probabilistic model is a deterministic model body with embedded
//! random-variable declarations, one per line:
//!
//! ```text
//! random mu ~ normal(0.0, 1.0);
//! random d  ~ uniform(0.1, 0.9);
//! ```
//!
//! [`template::preprocess`] splits such a file into the fixed
//! [`template::ModelTemplate`] and the ordered random-variable descriptors;
//! [`rv::sample`] draws one decimal token per descriptor; and
//! [`template::instantiate`] splices a drawn [`rv::Assignment`] back into a
//! per-worker deterministic instance ready for the solver.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub mod rv;
pub mod template;

pub use rv::{sample, Assignment, Distribution, RvDescriptor};
pub use template::{instantiate, preprocess, ModelTemplate};

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("cannot read model file `{path}`")]
    #[diagnostic(code(loris::model::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: malformed random-variable declaration: {reason}")]
    #[diagnostic(
        code(loris::model::declaration),
        help("expected `random <name> ~ <dist>(<args>);` with dist one of uniform, normal, exponential, bernoulli")
    )]
    Declaration { line: usize, reason: String },

    #[error("line {line}: invalid parameters for `{name}`: {reason}")]
    #[diagnostic(code(loris::model::distribution))]
    Distribution {
        line: usize,
        name: String,
        reason: &'static str,
    },

    #[error("duplicate random variable `{name}`")]
    #[diagnostic(code(loris::model::duplicate))]
    Duplicate { name: String },

    #[error("assignment carries {got} values for {expected} random variables")]
    #[diagnostic(code(loris::model::assignment_arity))]
    AssignmentArity { expected: usize, got: usize },

    #[error("cannot write model instance `{path}`")]
    #[diagnostic(code(loris::model::write))]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
