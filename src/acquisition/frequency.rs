//! Live inter-frame period estimation.
//!
//! Before a dark/bright reference or a timed recording starts, the pipeline
//! must confirm that the frame source has actually converged to the
//! requested integration time; starting a timed recording against a stale
//! frame rate would mis-scale the whole series. The monitor keeps a sliding
//! window of recent frame timestamps and the sync wait polls it, yielding
//! between polls and aborting on shutdown.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::acquisition::frame::Frame;
use crate::acquisition::relay;
use crate::error::{AppResult, SpectraError};

/// Sliding-window estimator of the mean inter-frame period.
#[derive(Debug)]
pub struct FrequencyMonitor {
    timestamps: VecDeque<f64>,
    n_measure_cycles: usize,
    mean_period_ms: f64,
}

impl FrequencyMonitor {
    /// Monitor with a window of `n_measure_cycles` timestamps.
    pub fn new(n_measure_cycles: usize) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(n_measure_cycles + 1),
            n_measure_cycles,
            mean_period_ms: 0.0,
        }
    }

    /// Record one frame timestamp, dropping the oldest when the window
    /// overflows, and refresh the estimate whenever the window is full.
    pub fn push(&mut self, timestamp: f64) {
        self.timestamps.push_back(timestamp);
        if self.timestamps.len() > self.n_measure_cycles {
            self.timestamps.pop_front();
        }
        if self.timestamps.len() == self.n_measure_cycles {
            self.refresh_estimate();
        }
    }

    fn refresh_estimate(&mut self) {
        let init = match self.timestamps.front() {
            Some(first) => *first,
            None => return,
        };
        let sum: f64 = self.timestamps.iter().map(|ts| ts - init).sum();
        self.mean_period_ms = 1000.0 * sum / (2.0 * self.n_measure_cycles as f64);
    }

    /// Current mean period estimate in milliseconds. Zero until the window
    /// has filled once.
    pub fn mean_period_ms(&self) -> f64 {
        self.mean_period_ms
    }

    /// Whether the live rate matches `requested_ms` within `tolerance_ms`.
    pub fn is_synced(&self, requested_ms: f64, tolerance_ms: f64) -> bool {
        (requested_ms - self.mean_period_ms).abs() <= tolerance_ms
    }

    /// Clear the window and the estimate.
    pub fn reset(&mut self) {
        self.timestamps.clear();
        self.mean_period_ms = 0.0;
    }
}

/// Shared monitor handle updated by a background subscriber task.
#[derive(Clone)]
pub struct SharedMonitor {
    inner: Arc<RwLock<FrequencyMonitor>>,
}

impl SharedMonitor {
    /// Wrap a fresh monitor.
    pub fn new(n_measure_cycles: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FrequencyMonitor::new(n_measure_cycles))),
        }
    }

    /// Feed one timestamp.
    pub fn push(&self, timestamp: f64) {
        if let Ok(mut monitor) = self.inner.write() {
            monitor.push(timestamp);
        }
    }

    /// Current estimate in milliseconds.
    pub fn mean_period_ms(&self) -> f64 {
        self.inner.read().map(|m| m.mean_period_ms()).unwrap_or(0.0)
    }

    /// Whether the live rate matches the request.
    pub fn is_synced(&self, requested_ms: f64, tolerance_ms: f64) -> bool {
        self.inner
            .read()
            .map(|m| m.is_synced(requested_ms, tolerance_ms))
            .unwrap_or(false)
    }

    /// Discard the window, e.g. after an integration-time change made the
    /// accumulated timestamps meaningless.
    pub fn reset(&self) {
        if let Ok(mut monitor) = self.inner.write() {
            monitor.reset();
        }
    }

    /// Run the feeding loop over a frame subscription until the stream ends.
    pub async fn run(self, mut rx: broadcast::Receiver<Arc<Frame>>) {
        while let Some(frame) = relay::next_frame(&mut rx).await {
            self.push(frame.timestamp);
        }
        debug!("frequency monitor stream ended");
    }

    /// Poll until the live rate matches `requested_ms` within
    /// `tolerance_ms`, yielding between polls. Fails with
    /// [`SpectraError::Cancelled`] when `shutdown` fires, or
    /// [`SpectraError::SyncTimeout`] after `timeout`.
    pub async fn wait_until_synced(
        &self,
        requested_ms: f64,
        tolerance_ms: f64,
        timeout: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> AppResult<()> {
        let start = tokio::time::Instant::now();
        loop {
            if self.is_synced(requested_ms, tolerance_ms) {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(SpectraError::SyncTimeout(timeout.as_secs_f64()));
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(SpectraError::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_estimates_100ms_period() {
        let mut monitor = FrequencyMonitor::new(5);
        for ts in [0.0, 0.1, 0.2, 0.3, 0.4] {
            monitor.push(ts);
        }
        assert!((monitor.mean_period_ms() - 100.0).abs() < 1.0);
    }

    #[test]
    fn estimates_100ms_period() {
        let mut monitor = FrequencyMonitor::new(5);
        for ts in [0.0, 0.1, 0.2, 0.3, 0.4, 0.5] {
            monitor.push(ts);
        }
        // Window holds [0.1..0.5]; offsets sum to 1.0 s over 2*5 cycles.
        assert!((monitor.mean_period_ms() - 100.0).abs() < 1.0);
        assert!(monitor.is_synced(100.0, 10.0));
        assert!(!monitor.is_synced(200.0, 10.0));
    }

    #[test]
    fn estimate_is_zero_until_window_fills() {
        let mut monitor = FrequencyMonitor::new(5);
        for ts in [0.0, 0.1, 0.2] {
            monitor.push(ts);
        }
        assert_eq!(monitor.mean_period_ms(), 0.0);
    }

    #[test]
    fn reset_clears_estimate() {
        let mut monitor = FrequencyMonitor::new(2);
        for ts in [0.0, 0.05, 0.1] {
            monitor.push(ts);
        }
        assert!(monitor.mean_period_ms() > 0.0);
        monitor.reset();
        assert_eq!(monitor.mean_period_ms(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_never_synced() {
        let shared = SharedMonitor::new(5);
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let result = shared
            .wait_until_synced(100.0, 10.0, Duration::from_millis(200), rx)
            .await;
        assert!(matches!(result, Err(SpectraError::SyncTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cancellable() {
        let shared = SharedMonitor::new(5);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let wait = tokio::spawn({
            let shared = shared.clone();
            async move {
                shared
                    .wait_until_synced(100.0, 10.0, Duration::from_secs(60), rx)
                    .await
            }
        });
        tx.send(true).expect("signal shutdown");
        let result = wait.await.expect("task");
        assert!(matches!(result, Err(SpectraError::Cancelled)));
    }

    #[tokio::test]
    async fn wait_returns_once_synced() {
        let shared = SharedMonitor::new(5);
        for i in 0..6 {
            shared.push(i as f64 * 0.1);
        }
        let (_tx, rx) = tokio::sync::watch::channel(false);
        shared
            .wait_until_synced(100.0, 10.0, Duration::from_secs(1), rx)
            .await
            .expect("already synced");
    }
}
