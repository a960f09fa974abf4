//! The per-frame pipeline: capture, detect, annotate, encode, emit.
//!
//! A [`Pipeline`] is a pull-based sequence of [`Step`]s. Every call to `next` performs one full
//! iteration on one frame, strictly in that order and without overlapping the next frame.
//! [`Pipeline::run`] drives the sequence into a [`ChunkSink`] and checks a cancellation token
//! between iterations.
//!
//! ```text
//! Starting --start()--> Running --end of stream / device failure / disconnect / cancel--> Stopped
//! ```
use cam_source::{CaptureSource, Frame};
use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::{
    annotate::annotate,
    detection::{Detect, Thresholds},
    encoder::{EncodedChunk, FrameEncoder},
    error::{EncodeError, SinkError},
    meter::METER,
};

/// Tunables of one pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub thresholds: Thresholds,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Stopped(StopReason),
}

/// Why a pipeline reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source has no more frames.
    EndOfStream,
    /// The source failed and cannot continue.
    DeviceFailure(String),
    /// Nobody consumes the output anymore.
    Disconnected,
    /// Shutdown was requested.
    Cancelled,
}

/// Why a single frame was dropped. The pipeline continues with the next frame.
#[derive(Debug)]
pub enum SkipReason {
    CorruptFrame(String),
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    Inference(String),
    Encode(EncodeError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::CorruptFrame(e) => write!(f, "corrupt frame: {e}"),
            SkipReason::SizeMismatch { expected, actual } => write!(
                f,
                "frame size {}x{} differs from session size {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            SkipReason::Inference(e) => write!(f, "inference failed: {e}"),
            SkipReason::Encode(e) => write!(f, "encoding failed: {e}"),
        }
    }
}

/// Result of one pipeline iteration.
#[derive(Debug)]
pub enum Step {
    Chunk(EncodedChunk),
    Skipped {
        /// Sequence number of the dropped frame, if it was captured at all.
        seq: Option<u64>,
        reason: SkipReason,
    },
}

/// Consumer of encoded chunks.
pub trait ChunkSink {
    /// Block until somebody wants chunks. Returns `false` if the pipeline should stop instead.
    fn wait_for_demand(&mut self, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
    }

    fn emit(&mut self, chunk: EncodedChunk) -> Result<(), SinkError>;
}

impl ChunkSink for Vec<EncodedChunk> {
    fn emit(&mut self, chunk: EncodedChunk) -> Result<(), SinkError> {
        self.push(chunk);
        Ok(())
    }
}

pub struct Pipeline<S, D, E> {
    source: S,
    detector: D,
    encoder: E,
    thresholds: Thresholds,
    state: PipelineState,
    dimensions: Option<(u32, u32)>,
}

impl<S, D, E> Pipeline<S, D, E>
where
    S: CaptureSource,
    D: Detect,
    E: FrameEncoder,
{
    /// Assemble a pipeline from an opened source and a loaded detector.
    pub fn new(source: S, detector: D, encoder: E, thresholds: Thresholds) -> Self {
        Self {
            source,
            detector,
            encoder,
            thresholds,
            state: PipelineState::Starting,
            dimensions: None,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Move from `Starting` to `Running`. No effect in any other state.
    pub fn start(&mut self) {
        if self.state == PipelineState::Starting {
            log::info!("Pipeline running on {}", self.source.describe());
            self.state = PipelineState::Running;
        }
    }

    /// Stop the pipeline and release the source.
    ///
    /// Only the first stop counts, later calls return the original reason.
    pub fn stop(&mut self, reason: StopReason) -> StopReason {
        if let PipelineState::Stopped(first) = &self.state {
            return first.clone();
        }

        match &reason {
            StopReason::DeviceFailure(e) => log::warn!("Pipeline stopped on device failure: {e}"),
            reason => log::info!("Pipeline stopped: {reason:?}"),
        }
        self.source.release();
        self.state = PipelineState::Stopped(reason.clone());

        reason
    }

    /// Run detection on a frame and draw the result onto a copy of it.
    pub fn render(&self, frame: &Frame) -> Result<RgbImage, SkipReason> {
        let detections = self
            .detector
            .detect(frame, &self.thresholds)
            .map_err(|e| SkipReason::Inference(format!("{e:#}")))?;
        log::debug!(
            "Found {} objects in frame {}",
            detections.len(),
            frame.seq()
        );

        Ok(annotate(frame.image(), &detections))
    }

    /// Pull chunks and hand them to `sink` until the pipeline stops.
    pub fn run<K: ChunkSink>(&mut self, sink: &mut K, cancel: &CancellationToken) -> StopReason {
        self.start();

        loop {
            if let PipelineState::Stopped(reason) = &self.state {
                return reason.clone();
            }
            if !sink.wait_for_demand(cancel) {
                let reason = match cancel.is_cancelled() {
                    true => StopReason::Cancelled,
                    false => StopReason::Disconnected,
                };
                return self.stop(reason);
            }

            match self.next() {
                // Stopped on its own, the state holds the reason
                None => continue,
                Some(Step::Skipped { .. }) => continue,
                Some(Step::Chunk(chunk)) => {
                    if let Err(SinkError::Disconnected) = sink.emit(chunk) {
                        return self.stop(StopReason::Disconnected);
                    }
                }
            }
        }
    }

    fn process(&mut self, frame: &Frame) -> Result<EncodedChunk, SkipReason> {
        // The first frame fixes the size of the session
        let actual = frame.dimensions();
        let expected = *self.dimensions.get_or_insert(actual);
        if expected != actual {
            return Err(SkipReason::SizeMismatch { expected, actual });
        }

        let annotated = self.render(frame)?;
        self.encoder
            .encode(frame.seq(), &annotated)
            .map_err(SkipReason::Encode)
    }

    fn skipped(seq: Option<u64>, reason: SkipReason) -> Step {
        match seq {
            Some(seq) => log::warn!("Skipping frame {seq}: {reason}"),
            None => log::warn!("Skipping frame: {reason}"),
        }
        METER.tick_skipped();

        Step::Skipped { seq, reason }
    }
}

impl<S, D, E> Iterator for Pipeline<S, D, E>
where
    S: CaptureSource,
    D: Detect,
    E: FrameEncoder,
{
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        match self.state {
            PipelineState::Starting => self.start(),
            PipelineState::Running => (),
            PipelineState::Stopped(_) => return None,
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stop(StopReason::EndOfStream);
                return None;
            }
            Err(e) if e.is_frame_level() => {
                return Some(Self::skipped(None, SkipReason::CorruptFrame(e.to_string())))
            }
            Err(e) => {
                self.stop(StopReason::DeviceFailure(e.to_string()));
                return None;
            }
        };
        METER.tick_captured();

        let seq = frame.seq();
        match self.process(&frame) {
            Ok(chunk) => Some(Step::Chunk(chunk)),
            Err(reason) => Some(Self::skipped(Some(seq), reason)),
        }
    }
}
