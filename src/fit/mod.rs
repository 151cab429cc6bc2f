//! Offline curve-fitting workbench.
//!
//! A [`FitModelSpec`] composes background and peak terms into one additive
//! mixture; the solver fits it to a single spectrum; the engine runs the
//! solver over every time slice of a dataset in parallel and assembles one
//! column-ordered table.

pub mod engine;
pub mod model;
pub mod solver;

pub use engine::{fit_range, ColumnOutcome, FitProgress, FitResult, FitTable};
pub use model::{FitModelSpec, MixtureModel, ModelKind, ModelTerm, Parameter, PeakShape};
pub use solver::{fit, FitOutcome};
