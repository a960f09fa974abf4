//! Compress annotated frames for transmission.
//!
use std::io::Cursor;

use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, ColorType, RgbImage};

use crate::error::EncodeError;

/// Largest side length a baseline JPEG can describe.
const JPEG_MAX_DIMENSION: u32 = u16::MAX as u32;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Compressed image bytes of one frame, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    seq: u64,
    content_type: &'static str,
    data: Bytes,
}

impl EncodedChunk {
    /// Wrap encoded bytes, refusing empty buffers.
    pub fn new(seq: u64, content_type: &'static str, data: Bytes) -> Result<Self, EncodeError> {
        if data.is_empty() {
            return Err(EncodeError::NoData);
        }
        Ok(Self {
            seq,
            content_type,
            data,
        })
    }

    /// Sequence number of the frame this chunk was made from.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

pub trait FrameEncoder {
    fn encode(&self, seq: u64, frame: &RgbImage) -> Result<EncodedChunk, EncodeError>;
}

/// Lossy JPEG compression with a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    /// Create an encoder, `quality` is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, seq: u64, frame: &RgbImage) -> Result<EncodedChunk, EncodeError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame { width, height });
        }
        if width > JPEG_MAX_DIMENSION || height > JPEG_MAX_DIMENSION {
            return Err(EncodeError::TooLarge { width, height });
        }

        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, self.quality).encode(
            frame,
            width,
            height,
            ColorType::Rgb8,
        )?;

        EncodedChunk::new(seq, JPEG_CONTENT_TYPE, Bytes::from(buf.into_inner()))
    }
}
