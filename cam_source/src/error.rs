//! Error types for frame capture.

use thiserror::Error;

/// Errors raised while opening or reading a frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source could not be opened at all.
    #[error("failed to open {source_name}: {reason}")]
    Open {
        /// Device path or directory.
        source_name: String,
        /// What went wrong.
        reason: String,
    },

    /// Another handle already holds the camera in this process.
    #[error("camera already claimed by {0}")]
    Busy(String),

    /// The device stopped delivering frames.
    #[error("device failure: {0}")]
    Device(#[from] std::io::Error),

    /// A single frame could not be decoded, the device itself is still fine.
    #[error("corrupt frame: {0}")]
    Corrupt(String),
}

impl CaptureError {
    /// Whether the source may still deliver further frames after this error.
    pub fn is_frame_level(&self) -> bool {
        matches!(self, CaptureError::Corrupt(_))
    }
}
