//! Frame relay: bridges the producer's pipe onto an in-process fan-out bus.
//!
//! The relay is the only reader of the transport's frame pipe. It republishes
//! every frame, in arrival order, on a `tokio::sync::broadcast` channel so
//! any number of consumers (live plot, frequency monitor, averager, recorder)
//! can subscribe independently. A consumer that falls behind loses *its own*
//! oldest frames (`RecvError::Lagged`) and never stalls the relay or its
//! peers.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::acquisition::frame::Frame;

/// Handle to the fan-out bus. Cheap to clone.
#[derive(Clone)]
pub struct FrameBus {
    sender: broadcast::Sender<Arc<Frame>>,
}

impl FrameBus {
    /// Create a bus whose subscribers each buffer up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish one frame. A send with no subscribers is not an error; frames
    /// simply fall on the floor until someone subscribes.
    pub fn publish(&self, frame: Arc<Frame>) {
        let _ = self.sender.send(frame);
    }
}

/// Relay loop: drain the producer pipe, republish on the bus.
///
/// Returns the number of frames relayed once the producer closes its end of
/// the pipe (end-of-stream).
pub async fn run_relay(mut frame_rx: mpsc::Receiver<Arc<Frame>>, bus: FrameBus) -> u64 {
    let mut relayed: u64 = 0;
    while let Some(frame) = frame_rx.recv().await {
        bus.publish(frame);
        relayed += 1;
    }
    info!(relayed, "frame relay finished (producer closed)");
    relayed
}

/// Receive the next frame from a subscription, skipping over any frames the
/// subscriber was too slow to keep. Returns `None` at end-of-stream.
pub async fn next_frame(rx: &mut broadcast::Receiver<Arc<Frame>>) -> Option<Arc<Frame>> {
    loop {
        match rx.recv().await {
            Ok(frame) => return Some(frame),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "subscriber lagged, dropping its backlog");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
