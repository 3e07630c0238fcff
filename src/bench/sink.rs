//! Progress/result sinks
//!
//! A sink is the only coupling between the benchmark core and whatever
//! presents results. It receives a snapshot of a volume's state after every
//! change, in the order the changes were made.

use tokio::sync::mpsc;

use crate::models::{Volume, VolumeTestState};

/// Consumer of per-volume state snapshots
pub trait ProgressSink: Send {
    /// Called after every state change; may be called once per chunk
    fn on_update(&mut self, volume: &Volume, state: &VolumeTestState);
}

impl<S: ProgressSink + ?Sized> ProgressSink for Box<S> {
    fn on_update(&mut self, volume: &Volume, state: &VolumeTestState) {
        (**self).on_update(volume, state);
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_update(&mut self, _volume: &Volume, _state: &VolumeTestState) {}
}

/// Owned snapshot of one update
#[derive(Debug, Clone)]
pub struct VolumeUpdate {
    pub volume: Volume,
    pub state: VolumeTestState,
}

/// Forwards snapshots over a Tokio channel to a UI task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<VolumeUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VolumeUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_update(&mut self, volume: &Volume, state: &VolumeTestState) {
        let update = VolumeUpdate {
            volume: volume.clone(),
            state: state.clone(),
        };
        if self.tx.send(update).is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}
