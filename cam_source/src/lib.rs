//! Frame sources for the detection stream.
//!
//! A [`CaptureSource`] owns one device (or a replayed recording) and yields
//! [`Frame`]s on demand. Only one camera handle may be alive per process, see
//! [`claim::DeviceClaim`].
pub mod claim;
pub mod error;
pub mod replay;
#[cfg(feature = "v4l")]
pub mod sensors;

use image::RgbImage;

pub use error::CaptureError;

/// One raw image sample, already converted to RGB.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    image: RgbImage,
}

impl Frame {
    /// Create a new frame.
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self { seq, image }
    }

    /// Position of this frame in the capture session, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A blocking producer of frames.
pub trait CaptureSource {
    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` once the source has no more data. Every call advances the source, a
    /// frame is never handed out twice.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying device. Calling this more than once is a no-op.
    fn release(&mut self);

    /// Short human readable description for logs.
    fn describe(&self) -> String;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
