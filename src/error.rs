//! Custom error types for the application.
//!
//! This module defines the primary error type, `SpectraError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the pipeline can
//! produce, from configuration and I/O issues to device communication and
//! fit non-convergence.
//!
//! Per-column fit failures are deliberately *not* represented here: they are
//! recorded inside the batch results (see [`crate::fit::engine`]) so that one
//! bad time slice never aborts a whole batch.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SpectraError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum SpectraError {
    /// Configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but contains logically invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Spectrometer device communication failure.
    #[error("Device error: {0}")]
    Device(String),

    /// Acquisition pipeline failure (channel closed, task panicked, ...).
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// The frame source never converged to the requested integration time.
    #[error("Integration time sync timed out after {0:.1} s")]
    SyncTimeout(f64),

    /// The acquisition was cancelled (shutdown requested) mid-operation.
    #[error("Acquisition cancelled")]
    Cancelled,

    /// Whole-batch fit failure (empty model, bad range). Per-column failures
    /// are recorded in the results table instead.
    #[error("Fit error: {0}")]
    Fit(String),

    /// Data persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// CSV encoding/decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = SpectraError::Device("spectrometer not responding".into());
        assert_eq!(err.to_string(), "Device error: spectrometer not responding");

        let err = SpectraError::SyncTimeout(5.0);
        assert!(err.to_string().contains("5.0"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SpectraError = io.into();
        assert!(matches!(err, SpectraError::Io(_)));
    }
}
