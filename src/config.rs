//! Configuration system using Figment.
//!
//! This module provides strongly-typed configuration loading for the whole
//! application. Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `SPECTRA_DAQ_`)
//!
//! # Example
//! ```no_run
//! use spectra_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! println!("Integration time: {} s", settings.acquisition.integration_time_s);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition pipeline settings.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Synthetic frame source settings (used when no spectrometer is found).
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    /// Data output settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            synthetic: SyntheticConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name (used in metadata headers).
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Acquisition pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Initial integration time in seconds.
    #[serde(default = "default_integration_time")]
    pub integration_time_s: f64,
    /// Number of frames averaged into a dark/bright reference.
    #[serde(default = "default_average_cycles")]
    pub average_cycles: usize,
    /// Sliding window size for the inter-frame period estimate.
    #[serde(default = "default_monitor_window")]
    pub monitor_window: usize,
    /// Tolerance, in milliseconds, for integration-time convergence.
    #[serde(default = "default_sync_tolerance")]
    pub sync_tolerance_ms: f64,
    /// Capacity of the frame pipe between producer and relay.
    #[serde(default = "default_frame_pipe_capacity")]
    pub frame_pipe_capacity: usize,
    /// Per-subscriber buffer depth on the relay fan-out.
    #[serde(default = "default_fanout_capacity")]
    pub fanout_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration_time_s: default_integration_time(),
            average_cycles: default_average_cycles(),
            monitor_window: default_monitor_window(),
            sync_tolerance_ms: default_sync_tolerance(),
            frame_pipe_capacity: default_frame_pipe_capacity(),
            fanout_capacity: default_fanout_capacity(),
        }
    }
}

/// Synthetic spectrum generator configuration.
///
/// Defaults mirror a 2048-pixel visible/NIR spectrometer with the first two
/// pixels discarded by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of samples per frame.
    #[serde(default = "default_array_size")]
    pub array_size: usize,
    /// First wavelength of the synthetic axis, in nm.
    #[serde(default = "default_wavelength_min")]
    pub wavelength_min_nm: f64,
    /// Last wavelength of the synthetic axis, in nm.
    #[serde(default = "default_wavelength_max")]
    pub wavelength_max_nm: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            array_size: default_array_size(),
            wavelength_min_nm: default_wavelength_min(),
            wavelength_max_nm: default_wavelength_max(),
        }
    }
}

/// Data output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory where measurement and fit CSV files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "spectra-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_integration_time() -> f64 {
    0.2
}

fn default_average_cycles() -> usize {
    5
}

fn default_monitor_window() -> usize {
    5
}

fn default_sync_tolerance() -> f64 {
    10.0
}

fn default_frame_pipe_capacity() -> usize {
    64
}

fn default_fanout_capacity() -> usize {
    64
}

fn default_array_size() -> usize {
    2046
}

fn default_wavelength_min() -> f64 {
    340.0
}

fn default_wavelength_max() -> f64 {
    1015.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Settings {
    /// Load configuration from `spectra-daq.toml` and environment variables.
    ///
    /// Environment variables can override configuration with prefix
    /// `SPECTRA_DAQ_`, e.g. `SPECTRA_DAQ_APPLICATION_LOG_LEVEL=debug`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("spectra-daq.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPECTRA_DAQ_").split("_"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.acquisition.integration_time_s <= 0.0 {
            return Err(format!(
                "integration_time_s must be positive, got {}",
                self.acquisition.integration_time_s
            ));
        }

        if self.acquisition.average_cycles == 0 {
            return Err("average_cycles must be at least 1".to_string());
        }

        if self.acquisition.monitor_window < 2 {
            return Err("monitor_window must be at least 2".to_string());
        }

        if self.synthetic.array_size < 8 {
            return Err(format!(
                "synthetic array_size too small: {}",
                self.synthetic.array_size
            ));
        }

        if self.synthetic.wavelength_min_nm >= self.synthetic.wavelength_max_nm {
            return Err("synthetic wavelength range is empty".to_string());
        }

        Ok(())
    }
}
