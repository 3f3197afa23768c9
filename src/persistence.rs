//! Where measurement samples go while a logging session is active.
//!
//! The sink is fire-and-forget: `append` must not block the device actor.

use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::actors::messages::DeviceSample;

pub trait PersistenceSink: Send + Sync {
    fn append(&self, sample: &DeviceSample);
}

/// Hands samples to a writer task over an unbounded channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DeviceSample>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceSample>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PersistenceSink for ChannelSink {
    fn append(&self, sample: &DeviceSample) {
        if self.sender.send(sample.clone()).is_err() {
            trace!("persistence writer is gone, dropping sample");
        }
    }
}

/// Records samples in the log under the `persistence` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl PersistenceSink for TracingSink {
    fn append(&self, sample: &DeviceSample) {
        info!(
            target: "persistence",
            kind = %sample.kind,
            timestamp = %sample.timestamp,
            "{}",
            sample.payload
        );
    }
}
