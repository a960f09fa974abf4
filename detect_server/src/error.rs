//! Error types of the detection stream.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the detection model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The weights file does not exist or is not a regular file.
    #[error("model file {0} not found")]
    Missing(PathBuf),

    /// The weights are not stored in a format we accept.
    #[error("refusing to load {path}: {reason}")]
    Untrusted {
        /// Path of the rejected file.
        path: PathBuf,
        /// Why the file was rejected.
        reason: String,
    },

    /// The file content does not match the expected digest.
    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Path of the rejected file.
        path: PathBuf,
        /// Expected SHA-256 as hex.
        expected: String,
        /// Actual SHA-256 as hex.
        actual: String,
    },

    /// The labels file could not be read.
    #[error("failed to read labels: {0}")]
    Labels(#[source] std::io::Error),

    /// Reading the file failed.
    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),

    /// The ONNX graph could not be turned into a runnable plan.
    #[error("failed to build model: {0}")]
    Graph(String),
}

/// Errors raised while compressing an annotated frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The frame has no pixels.
    #[error("cannot encode an empty {width}x{height} frame")]
    EmptyFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },

    /// The frame exceeds what the format can represent.
    #[error("frame of {width}x{height} exceeds the encoder limit")]
    TooLarge {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },

    /// The codec reported an error.
    #[error("codec error: {0}")]
    Codec(#[from] image::ImageError),

    /// The codec succeeded but produced nothing.
    #[error("encoder produced no data")]
    NoData,
}

/// The viewer of a stream has gone away.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Errors a chunk sink reports back to the pipeline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Nobody will ever consume further chunks.
    #[error("sink disconnected")]
    Disconnected,
}

impl From<ConnectionClosed> for SinkError {
    fn from(_: ConnectionClosed) -> Self {
        SinkError::Disconnected
    }
}
