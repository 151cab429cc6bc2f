//! Duplex transport between the frame producer and the rest of the pipeline.
//!
//! Frames travel producer → relay over a bounded FIFO pipe; blocking on send
//! is acceptable and provides natural pacing if the relay ever falls behind.
//! Control commands travel the other way over a `watch` cell: only the most
//! recent pending command matters, and the producer reads it with a
//! non-blocking "has it changed" check on every tick. Absence of a new
//! command is the common case and costs one atomic load.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::acquisition::frame::Frame;

/// Command sent from the control surface to the frame producer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    /// Adjust the integration time (tick interval), in seconds.
    SetIntegrationTime(f64),
    /// Tear the producer down; the frame pipe closes behind it.
    Stop,
}

/// Producer-side endpoints of the transport.
pub struct ProducerLink {
    /// FIFO frame pipe into the relay.
    pub frame_tx: mpsc::Sender<Arc<Frame>>,
    /// Latest-value command cell.
    pub control_rx: watch::Receiver<ControlCommand>,
}

impl ProducerLink {
    /// Non-blocking read of the latest command, if it changed since the
    /// previous call. Stale intermediate values are skipped by design.
    pub fn try_latest_command(&mut self) -> Option<ControlCommand> {
        if self
            .control_rx
            .has_changed()
            .unwrap_or(/* control side dropped */ false)
        {
            Some(*self.control_rx.borrow_and_update())
        } else {
            None
        }
    }
}

/// Control-side endpoints of the transport.
pub struct ControlLink {
    /// Receiving end of the frame pipe, consumed by the relay.
    pub frame_rx: mpsc::Receiver<Arc<Frame>>,
    /// Command sender.
    pub control_tx: watch::Sender<ControlCommand>,
}

impl ControlLink {
    /// Request a new integration time. Best-effort: an already-stopped
    /// producer simply never observes it.
    pub fn set_integration_time(&self, seconds: f64) {
        let _ = self
            .control_tx
            .send(ControlCommand::SetIntegrationTime(seconds));
    }

    /// Send the stop sentinel.
    pub fn stop(&self) {
        let _ = self.control_tx.send(ControlCommand::Stop);
    }
}

/// Create a connected transport pair.
///
/// `capacity` bounds the frame pipe; `initial_integration_time_s` seeds the
/// command cell so the producer has a valid interval before any command
/// arrives.
pub fn channel(capacity: usize, initial_integration_time_s: f64) -> (ProducerLink, ControlLink) {
    let (frame_tx, frame_rx) = mpsc::channel(capacity);
    let (control_tx, control_rx) =
        watch::channel(ControlCommand::SetIntegrationTime(initial_integration_time_s));
    (
        ProducerLink {
            frame_tx,
            control_rx,
        },
        ControlLink {
            frame_rx,
            control_tx,
        },
    )
}
