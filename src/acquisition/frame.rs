//! Raw spectrometer frames.

use serde::{Deserialize, Serialize};

/// One raw spectrometer reading: intensity per spectral-axis index plus the
/// wall-clock timestamp of the acquisition tick. Immutable after creation;
/// shared across consumers behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds since the Unix epoch at the moment the frame was produced.
    pub timestamp: f64,
    /// Intensity samples, length fixed per frame source.
    pub samples: Vec<f64>,
}

impl Frame {
    /// Create a frame from a timestamp and its samples.
    pub fn new(timestamp: f64, samples: Vec<f64>) -> Self {
        Self { timestamp, samples }
    }

    /// Number of samples in this frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame carries no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
