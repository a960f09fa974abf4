//! Process-wide state shared by all request handlers.
//!
use std::sync::{Arc, Mutex, PoisonError};

use cam_source::CaptureSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    detection::Detect,
    encoder::JpegFrameEncoder,
    hub::{FrameHub, HubSink},
    pipeline::{Pipeline, PipelineSettings, StopReason},
};

/// Owns the one producer pipeline and the hub its chunks are broadcast on.
///
/// Built once at startup, after the camera and the model were initialized, and handed to the
/// HTTP handlers.
pub struct PipelineContext {
    hub: Arc<FrameHub>,
    cancel: CancellationToken,
    settings: PipelineSettings,
    producer: Mutex<Option<JoinHandle<StopReason>>>,
}

impl PipelineContext {
    /// Spawn the producer pipeline on a blocking thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, D>(source: S, detector: D, settings: PipelineSettings) -> Arc<Self>
    where
        S: CaptureSource + Send + 'static,
        D: Detect + Send + 'static,
    {
        let hub = Arc::new(FrameHub::default());
        let cancel = CancellationToken::new();

        let mut pipeline = Pipeline::new(
            source,
            detector,
            JpegFrameEncoder::new(settings.jpeg_quality),
            settings.thresholds,
        );

        let producer = {
            let hub = Arc::clone(&hub);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let mut sink = HubSink::new(Arc::clone(&hub));
                let reason = pipeline.run(&mut sink, &cancel);
                hub.close();
                reason
            })
        };

        Arc::new(Self {
            hub,
            cancel,
            settings,
            producer: Mutex::new(Some(producer)),
        })
    }

    pub fn hub(&self) -> &FrameHub {
        &self.hub
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Whether the producer has stopped and no further frames will come.
    pub fn is_stopped(&self) -> bool {
        self.hub.is_closed()
    }

    /// Ask the producer to stop after its current frame.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the producer, wait for it to release the camera and return why it stopped.
    ///
    /// Returns `None` if the producer was already collected by an earlier call.
    pub async fn shutdown(&self) -> Option<StopReason> {
        self.request_stop();

        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        match producer.await {
            Ok(reason) => Some(reason),
            Err(e) => {
                log::error!("Frame producer panicked: {e}");
                self.hub.close();
                Some(StopReason::DeviceFailure(e.to_string()))
            }
        }
    }
}
