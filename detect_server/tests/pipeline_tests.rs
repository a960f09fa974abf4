mod common;

use std::sync::atomic::Ordering;

use cam_source::CaptureSource;
use common::{FlakyEncoder, ScriptedDetector, Shot, SyntheticSource};
use detect_server::{
    detection::Thresholds,
    encoder::{EncodedChunk, JpegFrameEncoder},
    error::SinkError,
    pipeline::{ChunkSink, Pipeline, PipelineState, SkipReason, Step, StopReason},
};
use tokio_util::sync::CancellationToken;

fn seqs(chunks: &[EncodedChunk]) -> Vec<u64> {
    chunks.iter().map(|chunk| chunk.seq()).collect()
}

/// Sink accepting a fixed number of chunks before its viewer disappears.
struct LeavingViewer {
    received: Vec<EncodedChunk>,
    leave_after: usize,
}

impl ChunkSink for LeavingViewer {
    fn emit(&mut self, chunk: EncodedChunk) -> Result<(), SinkError> {
        if self.received.len() >= self.leave_after {
            return Err(SinkError::Disconnected);
        }
        self.received.push(chunk);
        Ok(())
    }
}

#[test]
fn emits_every_frame_in_capture_order_then_stops() {
    let source = SyntheticSource::frames(5);
    let releases = source.release_counter();
    let mut pipeline = Pipeline::new(
        source,
        ScriptedDetector::with_confidences(&[0.8]),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );

    let mut sink: Vec<EncodedChunk> = Vec::new();
    let reason = pipeline.run(&mut sink, &CancellationToken::new());

    assert_eq!(reason, StopReason::EndOfStream);
    assert_eq!(seqs(&sink), vec![0, 1, 2, 3, 4]);
    assert!(sink.iter().all(|chunk| !chunk.data().is_empty()));
    assert_eq!(
        pipeline.state(),
        &PipelineState::Stopped(StopReason::EndOfStream)
    );
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn encode_failure_skips_exactly_one_frame() {
    let mut pipeline = Pipeline::new(
        SyntheticSource::frames(5),
        ScriptedDetector::empty(),
        FlakyEncoder::failing_on(vec![2]),
        Thresholds::default(),
    );

    let steps: Vec<Step> = pipeline.by_ref().collect();
    assert_eq!(steps.len(), 5);

    let skipped: Vec<Option<u64>> = steps
        .iter()
        .filter_map(|step| match step {
            Step::Skipped {
                seq,
                reason: SkipReason::Encode(_),
            } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![Some(2)]);

    let emitted: Vec<u64> = steps
        .iter()
        .filter_map(|step| match step {
            Step::Chunk(chunk) => Some(chunk.seq()),
            _ => None,
        })
        .collect();
    assert_eq!(emitted, vec![0, 1, 3, 4]);
}

#[test]
fn corrupt_and_resized_frames_are_skipped() {
    let mut pipeline = Pipeline::new(
        SyntheticSource::scripted(vec![
            Shot::Frame,
            Shot::Corrupt,
            Shot::Resized(32, 32),
            Shot::Frame,
        ]),
        ScriptedDetector::empty(),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );

    let mut sink: Vec<EncodedChunk> = Vec::new();
    let reason = pipeline.run(&mut sink, &CancellationToken::new());

    assert_eq!(reason, StopReason::EndOfStream);
    // The corrupt shot never became a frame, the resized one got seq 1
    assert_eq!(seqs(&sink), vec![0, 2]);
}

#[test]
fn device_failure_stops_the_pipeline() {
    let source = SyntheticSource::scripted(vec![Shot::Frame, Shot::Broken, Shot::Frame]);
    let releases = source.release_counter();
    let mut pipeline = Pipeline::new(
        source,
        ScriptedDetector::empty(),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );

    let mut sink: Vec<EncodedChunk> = Vec::new();
    let reason = pipeline.run(&mut sink, &CancellationToken::new());

    assert!(matches!(reason, StopReason::DeviceFailure(ref e) if e.contains("unplugged")));
    assert_eq!(seqs(&sink), vec![0]);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn disconnected_sink_stops_the_pipeline() {
    let source = SyntheticSource::frames(10);
    let releases = source.release_counter();
    let mut pipeline = Pipeline::new(
        source,
        ScriptedDetector::empty(),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );

    let mut viewer = LeavingViewer {
        received: Vec::new(),
        leave_after: 3,
    };
    let reason = pipeline.run(&mut viewer, &CancellationToken::new());

    assert_eq!(reason, StopReason::Disconnected);
    assert_eq!(seqs(&viewer.received), vec![0, 1, 2]);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelled_pipeline_captures_nothing() {
    let mut pipeline = Pipeline::new(
        SyntheticSource::frames(3),
        ScriptedDetector::empty(),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut sink: Vec<EncodedChunk> = Vec::new();
    assert_eq!(pipeline.run(&mut sink, &cancel), StopReason::Cancelled);
    assert!(sink.is_empty());

    // A stopped pipeline stays stopped
    assert!(pipeline.next().is_none());
    assert_eq!(pipeline.run(&mut sink, &cancel), StopReason::Cancelled);
}

#[test]
fn releasing_twice_is_harmless() {
    let mut source = SyntheticSource::frames(3);
    let releases = source.release_counter();

    source.release();
    source.release();
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    // Error-path cleanup after a normal stop
    let mut pipeline = Pipeline::new(
        source,
        ScriptedDetector::empty(),
        JpegFrameEncoder::default(),
        Thresholds::default(),
    );
    assert!(pipeline.next().is_none());
    pipeline.stop(StopReason::DeviceFailure("late error".into()));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.state(),
        &PipelineState::Stopped(StopReason::EndOfStream)
    );
}

#[test]
fn at_most_one_chunk_per_captured_frame() {
    for frame_count in [0, 1, 7] {
        let mut pipeline = Pipeline::new(
            SyntheticSource::frames(frame_count),
            ScriptedDetector::with_confidences(&[0.05, 0.3, 0.9]),
            FlakyEncoder::failing_on(vec![1, 4]),
            Thresholds {
                confidence: 0.25,
                ..Default::default()
            },
        );

        let mut sink: Vec<EncodedChunk> = Vec::new();
        pipeline.run(&mut sink, &CancellationToken::new());

        assert!(sink.len() <= frame_count);
        let order = seqs(&sink);
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
