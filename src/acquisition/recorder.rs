//! Time-resolved series recording.
//!
//! A [`SeriesRecorder`] is constructed fresh per run with the normalization
//! snapshot current at start time. Buffers are pre-allocated and filled with
//! NaN; rows fill left to right as frames arrive, honoring the skip setting,
//! and the series is sealed and emitted exactly once when the tick counter
//! reaches `total_frames`. The recorder performs no I/O: persistence and
//! plotting react to the emitted series, not the other way around.

use crate::acquisition::frame::Frame;
use crate::dataset::{Matrix, MeasurementSeries};
use crate::spectra_math::NormalizationState;

/// Number of frames needed to cover `duration_s` at the current
/// integration time: `ceil(duration / integration_time)`, never less
/// than one frame.
pub fn frames_for_duration(duration_s: f64, integration_time_s: f64) -> usize {
    if duration_s <= 0.0 || integration_time_s <= 0.0 {
        return 1;
    }
    ((duration_s / integration_time_s).ceil() as usize).max(1)
}

/// Event produced by the recorder for each received frame.
#[derive(Debug)]
pub enum RecorderEvent {
    /// Running tick count, emitted after every received frame.
    Progress(usize),
    /// The sealed series, emitted exactly once.
    Complete(MeasurementSeries),
}

/// Records a bounded matrix of raw and normalized spectra plus timestamps.
pub struct SeriesRecorder {
    total_frames: usize,
    array_size: usize,
    /// Record every `modulus`-th tick (`skip + 1`).
    modulus: usize,
    normalization: NormalizationState,
    raw: Matrix,
    normalized: Matrix,
    times: Vec<f64>,
    spectra_counter: usize,
    array_count: usize,
    start_time: Option<f64>,
    sealed: bool,
}

impl SeriesRecorder {
    /// Allocate a recorder for one run.
    ///
    /// `skip = 0` records every frame; `skip = k` records every (k+1)-th.
    pub fn new(
        total_frames: usize,
        array_size: usize,
        skip: usize,
        normalization: NormalizationState,
    ) -> Self {
        let total_frames = total_frames.max(1);
        Self {
            total_frames,
            array_size,
            modulus: skip + 1,
            normalization,
            raw: Matrix::filled_with_nan(total_frames, array_size),
            normalized: Matrix::filled_with_nan(total_frames, array_size),
            times: vec![f64::NAN; total_frames],
            spectra_counter: 0,
            array_count: 0,
            start_time: None,
            sealed: false,
        }
    }

    /// Feed one frame; returns the event to publish.
    ///
    /// After the series has been sealed further frames produce no event;
    /// callers normally unsubscribe on [`RecorderEvent::Complete`].
    pub fn push(&mut self, frame: &Frame) -> Option<RecorderEvent> {
        if self.sealed {
            return None;
        }
        let start = *self.start_time.get_or_insert(frame.timestamp);

        if self.spectra_counter % self.modulus == 0 && self.array_count < self.total_frames {
            let normalized = self.normalization.normalize(&frame.samples);
            self.raw.set_row(self.array_count, &frame.samples);
            self.normalized.set_row(self.array_count, &normalized);
            self.times[self.array_count] = frame.timestamp - start;
            self.array_count += 1;
        }
        self.spectra_counter += 1;

        if self.spectra_counter >= self.total_frames {
            return Some(RecorderEvent::Complete(self.seal()));
        }
        Some(RecorderEvent::Progress(self.spectra_counter))
    }

    /// Seal the series: rebase the time column to start at zero and hand the
    /// buffers out.
    fn seal(&mut self) -> MeasurementSeries {
        self.sealed = true;
        let t0 = self.times.first().copied().unwrap_or(0.0);
        let times: Vec<f64> = self.times.iter().map(|t| t - t0).collect();
        MeasurementSeries {
            raw: self.raw.clone(),
            normalized: self.normalized.clone(),
            times,
        }
    }

    /// Re-fill all buffers with NaN and zero the counters for a new run.
    pub fn reset(&mut self) {
        self.raw.reset_to_nan();
        self.normalized.reset_to_nan();
        self.times.fill(f64::NAN);
        self.spectra_counter = 0;
        self.array_count = 0;
        self.start_time = None;
        self.sealed = false;
    }

    /// Ticks received so far.
    pub fn spectra_counter(&self) -> usize {
        self.spectra_counter
    }

    /// Rows actually recorded so far.
    pub fn array_count(&self) -> usize {
        self.array_count
    }

    /// Expected sample count per frame.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Whether the series has been sealed and emitted.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
