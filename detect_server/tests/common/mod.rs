//! Synthetic stand-ins for the camera, the model and the encoder.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use cam_source::{CaptureError, CaptureSource, Frame};
use detect_server::{
    detection::{select_detections, BBox, Detect, Detection, Thresholds},
    encoder::{EncodedChunk, FrameEncoder, JpegFrameEncoder},
    error::EncodeError,
};
use image::{Rgb, RgbImage};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// What the synthetic camera does on a given capture call.
#[derive(Debug, Clone)]
pub enum Shot {
    Frame,
    Resized(u32, u32),
    Corrupt,
    Broken,
}

/// Camera yielding a scripted sequence, then end of stream.
pub struct SyntheticSource {
    script: Vec<Shot>,
    cursor: usize,
    seq: u64,
    releases: Arc<AtomicUsize>,
    released: bool,
    frame_interval: Option<Duration>,
}

impl SyntheticSource {
    pub fn frames(count: usize) -> Self {
        Self::scripted(vec![Shot::Frame; count])
    }

    pub fn scripted(script: Vec<Shot>) -> Self {
        Self {
            script,
            cursor: 0,
            seq: 0,
            releases: Arc::new(AtomicUsize::new(0)),
            released: false,
            frame_interval: None,
        }
    }

    /// Deliver frames no faster than a camera running at `1 / interval`.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Counter of actual device releases, duplicate calls are not counted.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl CaptureSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Ok(None);
        }
        let Some(shot) = self.script.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let (width, height) = match shot {
            Shot::Frame => (WIDTH, HEIGHT),
            Shot::Resized(width, height) => (width, height),
            Shot::Corrupt => return Err(CaptureError::Corrupt("bad marker".into())),
            Shot::Broken => {
                return Err(CaptureError::Device(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                )))
            }
        };

        // Encode the sequence number in the pixel values to tell frames apart
        let shade = (self.seq * 20 % 256) as u8;
        let frame = Frame::new(self.seq, RgbImage::from_pixel(width, height, Rgb([shade; 3])));
        self.seq += 1;

        Ok(Some(frame))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn describe(&self) -> String {
        "synthetic camera".into()
    }
}

/// Model returning the same raw candidates for every frame.
pub struct ScriptedDetector {
    pub candidates: Vec<Detection>,
}

impl ScriptedDetector {
    pub fn with_confidences(confidences: &[f32]) -> Self {
        let candidates = confidences
            .iter()
            .enumerate()
            .map(|(idx, confidence)| {
                let x = 2.0 + idx as f32 * 20.0;
                Detection::new(BBox::new(x, 20.0, x + 16.0, 40.0), *confidence, 0)
            })
            .collect();
        Self { candidates }
    }

    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }
}

impl Detect for ScriptedDetector {
    fn detect(&self, _frame: &Frame, thresholds: &Thresholds) -> Result<Vec<Detection>> {
        Ok(select_detections(self.candidates.clone(), thresholds))
    }
}

/// JPEG encoder that fails for the frames with the given sequence numbers.
pub struct FlakyEncoder {
    pub fail_on: Vec<u64>,
    inner: JpegFrameEncoder,
}

impl FlakyEncoder {
    pub fn failing_on(fail_on: Vec<u64>) -> Self {
        Self {
            fail_on,
            inner: JpegFrameEncoder::default(),
        }
    }
}

impl FrameEncoder for FlakyEncoder {
    fn encode(&self, seq: u64, frame: &RgbImage) -> Result<EncodedChunk, EncodeError> {
        if self.fail_on.contains(&seq) {
            return Err(EncodeError::NoData);
        }
        self.inner.encode(seq, frame)
    }
}
