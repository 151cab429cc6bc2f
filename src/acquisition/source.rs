//! Frame sources: spectrometer hardware and the synthetic generator.
//!
//! [`FrameSource::run`] is the producer loop: one frame per tick onto the
//! transport, then a non-blocking check for a pending integration-time
//! command. When no device is present at startup the source falls back to
//! the synthetic generator for the rest of its lifetime ("demo mode").

use anyhow::Result;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::acquisition::frame::Frame;
use crate::acquisition::transport::{ControlCommand, ProducerLink};
use crate::config::SyntheticConfig;

/// Spectrometer model whose dead pixel is known and corrected.
pub const VERIFIED_MODEL: &str = "FLMS12200";

/// Dead pixel index on the verified model (831.5 nm).
const DEAD_PIXEL: usize = 1420;

/// Consecutive device read failures tolerated before the source gives up
/// and closes the frame pipe.
const MAX_READ_ERRORS: u32 = 5;

/// Capability trait for spectrometer hardware.
///
/// Implementations wrap a vendor driver. All methods take `&mut self`; the
/// producer loop is the only owner of the device for its whole lifetime.
#[async_trait]
pub trait SpectrometerDevice: Send {
    /// Human-readable model and serial description.
    fn description(&self) -> String;

    /// The device's wavelength axis in nm.
    fn wavelengths(&self) -> Vec<f64>;

    /// Whether the connected unit is a verified model (enables dead-pixel
    /// correction).
    fn is_model_verified(&self) -> bool;

    /// Read one intensity spectrum.
    async fn read_intensities(&mut self) -> Result<Vec<f64>>;

    /// Program the device integration time.
    async fn set_integration_time_micros(&mut self, micros: u64) -> Result<()>;

    /// Release the device handle.
    async fn close(&mut self) -> Result<()>;
}

/// Deterministic synthetic spectrum generator.
///
/// Produces a fixed Gaussian-shaped curve plus one uniform random offset per
/// tick, so tests that fix the seed are fully reproducible.
pub struct SyntheticSpectrometer {
    curve: Vec<f64>,
    axis: Vec<f64>,
    rng: StdRng,
}

impl SyntheticSpectrometer {
    /// Build from configuration with an OS-sourced seed.
    pub fn new(config: &SyntheticConfig) -> Self {
        Self::with_seed(config, rand::random())
    }

    /// Build with a fixed seed (deterministic output).
    pub fn with_seed(config: &SyntheticConfig, seed: u64) -> Self {
        let n = config.array_size;
        let curve = (0..n)
            .map(|i| {
                let x = i as f64;
                50_000.0 * (-(x - 900.0).powi(2) / (2.0 * 100_000.0)).exp()
            })
            .collect();
        let span = config.wavelength_max_nm - config.wavelength_min_nm;
        let axis = (0..n)
            .map(|i| config.wavelength_min_nm + span * i as f64 / (n - 1) as f64)
            .collect();
        Self {
            curve,
            axis,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The synthetic wavelength axis in nm.
    pub fn wavelengths(&self) -> Vec<f64> {
        self.axis.clone()
    }

    /// One synthetic reading: the base curve plus a per-tick offset.
    pub fn read(&mut self) -> Vec<f64> {
        let jitter = self.rng.gen_range(0.0..=10_000.0);
        self.curve.iter().map(|y| y + jitter).collect()
    }
}

enum SourceKind {
    Device(Box<dyn SpectrometerDevice>),
    Synthetic(SyntheticSpectrometer),
}

/// The frame producer: owns its source exclusively and feeds the transport.
pub struct FrameSource {
    kind: SourceKind,
    link: ProducerLink,
    interval: Duration,
}

impl FrameSource {
    /// Producer backed by real hardware.
    pub fn from_device(
        device: Box<dyn SpectrometerDevice>,
        link: ProducerLink,
        integration_time_s: f64,
    ) -> Self {
        info!(device = %device.description(), "spectrometer connected");
        Self {
            kind: SourceKind::Device(device),
            link,
            interval: Duration::from_secs_f64(integration_time_s),
        }
    }

    /// Producer backed by the synthetic generator (demo mode).
    pub fn synthetic(
        config: &SyntheticConfig,
        link: ProducerLink,
        integration_time_s: f64,
    ) -> Self {
        info!("no spectrometer found, producing synthetic demo data");
        Self {
            kind: SourceKind::Synthetic(SyntheticSpectrometer::new(config)),
            link,
            interval: Duration::from_secs_f64(integration_time_s),
        }
    }

    /// Same as [`FrameSource::synthetic`] but with a fixed jitter seed.
    pub fn synthetic_seeded(
        config: &SyntheticConfig,
        link: ProducerLink,
        integration_time_s: f64,
        seed: u64,
    ) -> Self {
        Self {
            kind: SourceKind::Synthetic(SyntheticSpectrometer::with_seed(config, seed)),
            link,
            interval: Duration::from_secs_f64(integration_time_s),
        }
    }

    /// Whether this source reads real hardware.
    pub fn is_hardware(&self) -> bool {
        matches!(self.kind, SourceKind::Device(_))
    }

    /// The source's wavelength axis in nm.
    pub fn wavelengths(&self) -> Vec<f64> {
        match &self.kind {
            SourceKind::Device(device) => device.wavelengths(),
            SourceKind::Synthetic(synth) => synth.wavelengths(),
        }
    }

    /// Run the production loop until the stop sentinel arrives or the frame
    /// pipe closes. Returns the number of frames produced.
    pub async fn run(mut self) -> u64 {
        let mut produced: u64 = 0;
        let mut read_errors: u32 = 0;

        loop {
            let samples = match &mut self.kind {
                SourceKind::Device(device) => match device.read_intensities().await {
                    Ok(mut samples) => {
                        read_errors = 0;
                        if device.is_model_verified() {
                            correct_dead_pixel(&mut samples, DEAD_PIXEL);
                        }
                        samples
                    }
                    Err(err) => {
                        read_errors += 1;
                        warn!(attempt = read_errors, %err, "spectrometer read failed");
                        if read_errors >= MAX_READ_ERRORS {
                            warn!("persistent device failure, closing frame source");
                            let _ = device.close().await;
                            break;
                        }
                        tokio::time::sleep(self.interval).await;
                        continue;
                    }
                },
                SourceKind::Synthetic(synth) => {
                    // The synthetic source paces itself; hardware is paced
                    // by the device's own integration time.
                    tokio::time::sleep(self.interval).await;
                    synth.read()
                }
            };

            let frame = Arc::new(Frame::new(unix_time_secs(), samples));
            if self.link.frame_tx.send(frame).await.is_err() {
                debug!("frame pipe closed, stopping source");
                break;
            }
            produced += 1;

            match self.link.try_latest_command() {
                Some(ControlCommand::SetIntegrationTime(seconds)) => {
                    self.interval = Duration::from_secs_f64(seconds.max(1e-4));
                    if let SourceKind::Device(device) = &mut self.kind {
                        let micros = (seconds * 1_000_000.0) as u64;
                        if let Err(err) = device.set_integration_time_micros(micros).await {
                            warn!(%err, "failed to program integration time");
                        }
                    }
                    debug!(seconds, "integration time updated");
                }
                Some(ControlCommand::Stop) => {
                    if let SourceKind::Device(device) = &mut self.kind {
                        let _ = device.close().await;
                    }
                    info!(produced, "frame source stopped");
                    break;
                }
                None => {}
            }
        }

        produced
    }
}

/// Replace a known-dead sample with the mean of its four nearest valid
/// neighbors (two on each side).
fn correct_dead_pixel(samples: &mut [f64], index: usize) {
    if index < 2 || index + 2 >= samples.len() {
        return;
    }
    samples[index] = (samples[index - 2]
        + samples[index - 1]
        + samples[index + 1]
        + samples[index + 2])
        / 4.0;
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
