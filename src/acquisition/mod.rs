//! Concurrent acquisition pipeline.
//!
//! One producer (hardware or synthetic) feeds frames over a bounded pipe to
//! a relay, which fans them out on a broadcast bus to any number of
//! consumers: the frequency monitor, one-shot reference averagers, and
//! per-run series recorders. The [`AcquisitionController`] owns the tasks
//! and the control surface.

pub mod controller;
pub mod frame;
pub mod frequency;
pub mod recorder;
pub mod reference;
pub mod relay;
pub mod source;
pub mod transport;

pub use controller::AcquisitionController;
pub use frame::Frame;
pub use frequency::{FrequencyMonitor, SharedMonitor};
pub use recorder::{frames_for_duration, RecorderEvent, SeriesRecorder};
pub use reference::{ReferenceKind, ReferenceSpectrum};
pub use relay::FrameBus;
pub use source::{FrameSource, SpectrometerDevice, SyntheticSpectrometer};
pub use transport::{ControlCommand, ControlLink, ProducerLink};
