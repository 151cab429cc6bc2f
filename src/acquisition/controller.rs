//! Acquisition controller: owns the running pipeline.
//!
//! The controller spawns the three long-lived tasks (producer, relay,
//! frequency monitor), holds the control side of the transport and the
//! current normalization snapshot, and exposes the operations the rest of
//! the application drives the pipeline with: integration-time changes,
//! reference measurements, timed recordings, and orderly shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::acquisition::frame::Frame;
use crate::acquisition::frequency::SharedMonitor;
use crate::acquisition::recorder::{RecorderEvent, SeriesRecorder};
use crate::acquisition::reference::{self, ReferenceKind, ReferenceSpectrum};
use crate::acquisition::relay::{self, FrameBus};
use crate::acquisition::source::FrameSource;
use crate::acquisition::transport::{ControlCommand, ControlLink};
use crate::config::AcquisitionConfig;
use crate::dataset::MeasurementSeries;
use crate::error::{AppResult, SpectraError};
use crate::spectra_math::NormalizationState;

/// Handle to a running acquisition pipeline.
pub struct AcquisitionController {
    bus: FrameBus,
    control_tx: watch::Sender<ControlCommand>,
    monitor: SharedMonitor,
    shutdown_tx: watch::Sender<bool>,
    producer: JoinHandle<u64>,
    relay: JoinHandle<u64>,
    monitor_task: JoinHandle<()>,
    normalization: NormalizationState,
    wavelengths: Arc<Vec<f64>>,
    hardware: bool,
    integration_time_s: f64,
    sync_tolerance_ms: f64,
    average_cycles: usize,
}

impl AcquisitionController {
    /// Spawn the pipeline tasks and return the controller handle.
    ///
    /// `source` and `control` must come from the same
    /// [`transport::channel`](crate::acquisition::transport::channel) pair.
    pub fn start(source: FrameSource, control: ControlLink, config: &AcquisitionConfig) -> Self {
        let wavelengths = Arc::new(source.wavelengths());
        let hardware = source.is_hardware();
        let array_size = wavelengths.len();

        let ControlLink {
            frame_rx,
            control_tx,
        } = control;

        let bus = FrameBus::new(config.fanout_capacity);
        let monitor = SharedMonitor::new(config.monitor_window);
        let (shutdown_tx, _) = watch::channel(false);

        let monitor_task = tokio::spawn(monitor.clone().run(bus.subscribe()));
        let relay = tokio::spawn(relay::run_relay(frame_rx, bus.clone()));
        let producer = tokio::spawn(source.run());
        info!(array_size, hardware, "acquisition pipeline started");

        Self {
            bus,
            control_tx,
            monitor,
            shutdown_tx,
            producer,
            relay,
            monitor_task,
            normalization: NormalizationState::identity(array_size),
            wavelengths,
            hardware,
            integration_time_s: config.integration_time_s,
            sync_tolerance_ms: config.sync_tolerance_ms,
            average_cycles: config.average_cycles,
        }
    }

    /// The spectral axis of the running source, in nm.
    pub fn wavelengths(&self) -> Arc<Vec<f64>> {
        Arc::clone(&self.wavelengths)
    }

    /// Samples per frame.
    pub fn array_size(&self) -> usize {
        self.wavelengths.len()
    }

    /// Whether real hardware is behind the pipeline.
    pub fn is_hardware(&self) -> bool {
        self.hardware
    }

    /// Currently requested integration time in seconds.
    pub fn integration_time_s(&self) -> f64 {
        self.integration_time_s
    }

    /// Current normalization snapshot.
    pub fn normalization_state(&self) -> NormalizationState {
        self.normalization.clone()
    }

    /// Subscribe to the live frame stream.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.bus.subscribe()
    }

    /// Current mean inter-frame period estimate in milliseconds.
    pub fn mean_period_ms(&self) -> f64 {
        self.monitor.mean_period_ms()
    }

    /// Request a new integration time. The frequency window is discarded so
    /// a stale estimate can never satisfy the next sync wait.
    pub fn set_integration_time(&mut self, seconds: f64) {
        self.integration_time_s = seconds;
        let _ = self
            .control_tx
            .send(ControlCommand::SetIntegrationTime(seconds));
        self.monitor.reset();
        debug!(seconds, "integration time requested");
    }

    /// Wait until the live frame rate matches the requested integration time.
    pub async fn wait_until_synced(&self, timeout: Duration) -> AppResult<()> {
        self.monitor
            .wait_until_synced(
                self.integration_time_s * 1000.0,
                self.sync_tolerance_ms,
                timeout,
                self.shutdown_tx.subscribe(),
            )
            .await
    }

    /// Measure a dark or bright reference and fold it into the normalization
    /// snapshot. Waits for rate sync first.
    pub async fn measure_reference(
        &mut self,
        kind: ReferenceKind,
        sync_timeout: Duration,
    ) -> AppResult<ReferenceSpectrum> {
        self.wait_until_synced(sync_timeout).await?;
        let spectrum = reference::collect_reference(
            self.bus.subscribe(),
            kind,
            self.average_cycles,
            self.array_size(),
        )
        .await?;

        self.normalization = match kind {
            ReferenceKind::Dark => self.normalization.with_dark(Arc::clone(&spectrum.mean)),
            ReferenceKind::Bright => self.normalization.with_bright(Arc::clone(&spectrum.mean)),
        };
        info!(%kind, cycles = self.average_cycles, "reference measured");
        Ok(spectrum)
    }

    /// Delete a reference: normalization falls back to the remaining one, or
    /// to the identity when none is left.
    pub fn delete_reference(&mut self, kind: ReferenceKind) {
        self.normalization = match kind {
            ReferenceKind::Dark => self.normalization.without_dark(),
            ReferenceKind::Bright => self.normalization.without_bright(),
        };
        info!(%kind, "reference deleted");
    }

    /// Record a time-resolved series of `total_frames` frames, storing every
    /// `(skip + 1)`-th one. Waits for rate sync first. Tick counts are
    /// reported on `progress` when provided; the sealed series is returned.
    pub async fn record(
        &self,
        total_frames: usize,
        skip: usize,
        sync_timeout: Duration,
        progress: Option<mpsc::UnboundedSender<usize>>,
    ) -> AppResult<MeasurementSeries> {
        self.wait_until_synced(sync_timeout).await?;

        let mut recorder = SeriesRecorder::new(
            total_frames,
            self.array_size(),
            skip,
            self.normalization.clone(),
        );
        let mut rx = self.bus.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(total_frames, skip, "recording started");

        loop {
            let frame = tokio::select! {
                frame = relay::next_frame(&mut rx) => frame,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(SpectraError::Cancelled);
                    }
                    continue;
                }
            };
            let Some(frame) = frame else {
                return Err(SpectraError::Acquisition(
                    "frame stream ended before the recording completed".into(),
                ));
            };
            match recorder.push(&frame) {
                Some(RecorderEvent::Complete(series)) => {
                    // The sealing frame still counts as a tick.
                    if let Some(tx) = &progress {
                        let _ = tx.send(recorder.spectra_counter());
                    }
                    info!(
                        recorded = series.recorded_rows(),
                        "recording complete"
                    );
                    return Ok(series);
                }
                Some(RecorderEvent::Progress(count)) => {
                    if let Some(tx) = &progress {
                        let _ = tx.send(count);
                    }
                }
                None => {}
            }
        }
    }

    /// Stop the producer and join all pipeline tasks. Returns the produced
    /// and relayed frame counts.
    pub async fn shutdown(self) -> AppResult<(u64, u64)> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.control_tx.send(ControlCommand::Stop);

        let produced = self
            .producer
            .await
            .map_err(|e| SpectraError::Acquisition(format!("producer task failed: {e}")))?;
        let relayed = self
            .relay
            .await
            .map_err(|e| SpectraError::Acquisition(format!("relay task failed: {e}")))?;

        // With the relay gone this controller holds the last bus handle;
        // dropping it ends the monitor's subscription.
        drop(self.bus);
        self.monitor_task
            .await
            .map_err(|e| SpectraError::Acquisition(format!("monitor task failed: {e}")))?;

        info!(produced, relayed, "acquisition pipeline shut down");
        Ok((produced, relayed))
    }
}
