//! # Spectra DAQ Core Library
//!
//! Core library of the `spectra-daq` application: spectrometer acquisition,
//! time-resolved recording, and the offline curve-fitting workbench. The
//! binary (`main.rs`) is a thin CLI over this crate; keeping the logic here
//! lets tests drive the same pipeline the operator does.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the concurrent pipeline: frame producer (hardware
//!   or synthetic), relay/fan-out bus, frequency monitor, reference
//!   averagers, series recorder, and the controller that owns them.
//! - **`config`**: TOML + environment configuration via `figment`. See
//!   `config::Settings`.
//! - **`dataset`**: in-memory matrices, recorded series, and the transposed
//!   dataset view the fit engine operates on.
//! - **`error`**: the central `SpectraError` enum.
//! - **`fit`**: mixture-model composition, the nonlinear least-squares
//!   solver, and the parallel batch-fit engine.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`metadata`**: experimental metadata written into every saved series.
//! - **`spectra_math`**: dark/bright normalization snapshots.
//! - **`storage`**: CSV persistence for series and fit tables.

pub mod acquisition;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fit;
pub mod logging;
pub mod metadata;
pub mod spectra_math;
pub mod storage;

pub use error::{AppResult, SpectraError};
