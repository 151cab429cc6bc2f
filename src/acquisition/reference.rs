//! Dark/bright reference accumulation.
//!
//! A [`ReferenceAverager`] is a one-shot worker: constructed fresh for each
//! reference measurement, it accumulates `average_cycles` consecutive frames
//! into a pre-allocated buffer, emits exactly one averaged spectrum, and is
//! then done. The subscription that feeds it is dropped on completion.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::acquisition::frame::Frame;
use crate::acquisition::relay;
use crate::dataset::Matrix;
use crate::error::{AppResult, SpectraError};

/// Which reference a spectrum represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Baseline reading with the light source off.
    Dark,
    /// Full-illumination reading used as the normalization ceiling.
    Bright,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::Dark => write!(f, "dark"),
            ReferenceKind::Bright => write!(f, "bright"),
        }
    }
}

/// An averaged reference spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpectrum {
    /// Dark or bright.
    pub kind: ReferenceKind,
    /// Arithmetic mean over the accumulated frames, one value per sample.
    pub mean: Arc<Vec<f64>>,
}

/// Accumulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AveragerState {
    Accumulating,
    Done,
}

/// One-shot frame averager.
pub struct ReferenceAverager {
    kind: ReferenceKind,
    buffer: Matrix,
    counter: usize,
    average_cycles: usize,
    state: AveragerState,
}

impl ReferenceAverager {
    /// Allocate a fresh averager for `average_cycles` frames of
    /// `array_size` samples.
    pub fn new(kind: ReferenceKind, average_cycles: usize, array_size: usize) -> Self {
        Self {
            kind,
            buffer: Matrix::filled_with_nan(average_cycles, array_size),
            counter: 0,
            average_cycles,
            state: AveragerState::Accumulating,
        }
    }

    /// Feed one frame. Returns the averaged spectrum exactly once, on the
    /// frame that completes the accumulation; frames after completion are
    /// ignored.
    pub fn push(&mut self, frame: &Frame) -> Option<ReferenceSpectrum> {
        if self.state == AveragerState::Done {
            return None;
        }
        self.buffer.set_row(self.counter, &frame.samples);
        self.counter += 1;
        if self.counter < self.average_cycles {
            return None;
        }

        self.state = AveragerState::Done;
        let cols = self.buffer.cols();
        let mut mean = vec![0.0; cols];
        for r in 0..self.average_cycles {
            for (m, v) in mean.iter_mut().zip(self.buffer.row(r)) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= self.average_cycles as f64;
        }
        Some(ReferenceSpectrum {
            kind: self.kind,
            mean: Arc::new(mean),
        })
    }

    /// Whether the averager has emitted its spectrum.
    pub fn is_done(&self) -> bool {
        self.state == AveragerState::Done
    }
}

/// Collect one reference from a live frame subscription.
///
/// The receiver is consumed and dropped when the accumulation completes,
/// unsubscribing this one-shot consumer from the bus.
pub async fn collect_reference(
    mut rx: broadcast::Receiver<Arc<Frame>>,
    kind: ReferenceKind,
    average_cycles: usize,
    array_size: usize,
) -> AppResult<ReferenceSpectrum> {
    let mut averager = ReferenceAverager::new(kind, average_cycles, array_size);
    while let Some(frame) = relay::next_frame(&mut rx).await {
        if let Some(reference) = averager.push(&frame) {
            return Ok(reference);
        }
    }
    Err(SpectraError::Acquisition(format!(
        "frame stream ended before {kind} reference completed"
    )))
}
