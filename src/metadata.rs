//! Experimental metadata structures and handling.
//!
//! The metadata block is written verbatim into the header of every saved
//! measurement so a spectrum series can always be traced back to the sample,
//! operator and acquisition settings that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Captures the metadata for one measurement run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Sample identifier.
    pub sample: String,
    /// Operator name.
    pub user: String,
    /// Wall-clock time of the measurement start.
    pub date: DateTime<Utc>,
    /// Host machine the data was taken on.
    pub location: String,
    /// Device description (model and serial), if a spectrometer was present.
    pub device: Option<String>,
    /// Integration time in seconds at measurement start.
    pub integration_time_s: f64,
    /// Whether a dark reference was applied.
    pub dark_measurement: bool,
    /// Whether a bright reference was applied.
    pub bright_measurement: bool,
    /// User-defined experiment variables (material, solvents, filters, ...).
    pub variables: BTreeMap<String, String>,
    /// Free-form comments.
    pub comments: String,
    /// Version of this software.
    pub software_version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            sample: String::new(),
            user: String::new(),
            date: Utc::now(),
            location: host_name(),
            device: None,
            integration_time_s: 0.0,
            dark_measurement: false,
            bright_measurement: false,
            variables: BTreeMap::new(),
            comments: String::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Metadata {
    /// Validate the metadata before persisting.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample.is_empty() {
            return Err("Sample name cannot be empty.".to_string());
        }
        Ok(())
    }
}

/// A builder for constructing [`Metadata`] instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    /// Start a fresh builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sample identifier.
    pub fn sample(mut self, sample: &str) -> Self {
        self.inner.sample = sample.to_string();
        self
    }

    /// Set the operator name.
    pub fn user(mut self, user: &str) -> Self {
        self.inner.user = user.to_string();
        self
    }

    /// Set the device description string.
    pub fn device(mut self, device: &str) -> Self {
        self.inner.device = Some(device.to_string());
        self
    }

    /// Set the integration time in seconds.
    pub fn integration_time_s(mut self, seconds: f64) -> Self {
        self.inner.integration_time_s = seconds;
        self
    }

    /// Record which references were applied during normalization.
    pub fn references(mut self, dark: bool, bright: bool) -> Self {
        self.inner.dark_measurement = dark;
        self.inner.bright_measurement = bright;
        self
    }

    /// Add one experiment variable.
    pub fn variable(mut self, key: &str, value: &str) -> Self {
        self.inner.variables.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the free-form comment field.
    pub fn comments(mut self, comments: &str) -> Self {
        self.inner.comments = comments.to_string();
        self
    }

    /// Finish building.
    pub fn build(self) -> Metadata {
        self.inner
    }
}

/// Host name of this machine, falling back to "unknown".
fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
