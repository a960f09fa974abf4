//! Fan-out of encoded frames from the single producer to all viewers.
//!
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use crate::{encoder::EncodedChunk, error::SinkError, pipeline::ChunkSink};

pub type ChunkSender = broadcast::Sender<Arc<EncodedChunk>>;
pub type ChunkReceiver = broadcast::Receiver<Arc<EncodedChunk>>;

/// Number of chunks a viewer may fall behind before it starts skipping.
pub const DEFAULT_CAPACITY: usize = 20;

/// Broadcasts the chunks of the shared pipeline to any number of viewers.
pub struct FrameHub {
    tx: Mutex<Option<ChunkSender>>,
    demand: Notify,
}

impl FrameHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            demand: Notify::new(),
        }
    }

    /// Subscribe a new viewer. Returns `None` once the producer has stopped for good.
    pub fn subscribe(&self) -> Option<ChunkReceiver> {
        let rx = self.sender().as_ref().map(|tx| tx.subscribe());
        if rx.is_some() {
            self.demand.notify_one();
        }
        rx
    }

    pub fn viewer_count(&self) -> usize {
        self.sender()
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Stop accepting viewers. Current viewers see the end of their stream.
    pub fn close(&self) {
        if self.sender().take().is_some() {
            log::info!("Frame hub closed");
        }
        self.demand.notify_one();
    }

    fn publish(&self, chunk: EncodedChunk) -> Result<(), SinkError> {
        match self.sender().as_ref() {
            None => Err(SinkError::Disconnected),
            Some(tx) => {
                // No viewers right now is fine, the chunk is simply dropped
                if tx.send(Arc::new(chunk)).is_err() {
                    log::debug!("Dropping chunk without viewers");
                }
                Ok(())
            }
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<ChunkSender>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Pipeline side of a [`FrameHub`].
///
/// Keeps the pipeline idle while nobody is watching.
pub struct HubSink {
    hub: Arc<FrameHub>,
}

impl HubSink {
    pub fn new(hub: Arc<FrameHub>) -> Self {
        Self { hub }
    }
}

impl ChunkSink for HubSink {
    fn wait_for_demand(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() || self.hub.is_closed() {
                return false;
            }
            if self.hub.viewer_count() > 0 {
                return true;
            }

            log::debug!("No viewers, pausing capture");
            futures::executor::block_on(async {
                tokio::select! {
                    _ = self.hub.demand.notified() => (),
                    _ = cancel.cancelled() => (),
                }
            });
        }
    }

    fn emit(&mut self, chunk: EncodedChunk) -> Result<(), SinkError> {
        self.hub.publish(chunk)
    }
}
