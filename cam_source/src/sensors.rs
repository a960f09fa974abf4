//! V4L2 webcam source.
//!
use image::{ImageFormat, RgbImage};
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::{claim::DeviceClaim, CaptureError, CaptureSource, Frame};

type Error = Box<dyn std::error::Error>;

/// Pixel formats we know how to turn into RGB frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mjpg,
    Rgb3,
}

impl PixelFormat {
    pub fn parse(format: &str) -> Option<Self> {
        match format {
            "MJPG" => Some(PixelFormat::Mjpg),
            "RGB3" => Some(PixelFormat::Rgb3),
            _ => None,
        }
    }

    fn fourcc(&self) -> &'static [u8] {
        match self {
            PixelFormat::Mjpg => b"MJPG",
            PixelFormat::Rgb3 => b"RGB3",
        }
    }
}

/// An opened and streaming camera on a Linux machine.
pub struct V4lCamera {
    device: String,
    format: PixelFormat,
    resolution: (u32, u32),
    camera: Option<Camera>,
    claim: Option<DeviceClaim>,
    seq: u64,
}

impl V4lCamera {
    /// Open `device` and start streaming.
    ///
    /// Without an explicit resolution or frame rate, the highest values the device supports for
    /// `format` are used.
    pub fn open(
        device: &str,
        format: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Self, CaptureError> {
        let open_err = |reason: String| CaptureError::Open {
            source_name: device.to_owned(),
            reason,
        };

        let pixel_format = PixelFormat::parse(format)
            .ok_or_else(|| open_err(format!("unsupported pixel format {format}")))?;

        let claim = DeviceClaim::acquire(device)?;

        let mut cam = Camera::new(device).map_err(|e| open_err(e.to_string()))?;
        log_supported_formats(&cam, format);
        let fourcc = pixel_format.fourcc();

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, fourcc))
            .map_err(|e| open_err(e.to_string()))?;

        let frame_rate = frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, fourcc, resolution))
            .map_err(|e| open_err(e.to_string()))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format: fourcc,
            ..Default::default()
        })
        .map_err(|e| open_err(e.to_string()))?;

        log::info!(
            "Using camera {} with {}x{} {} at {}/{} s",
            device,
            resolution.0,
            resolution.1,
            format,
            frame_rate.0,
            frame_rate.1
        );

        Ok(Self {
            device: device.to_owned(),
            format: pixel_format,
            resolution,
            camera: Some(cam),
            claim: Some(claim),
            seq: 0,
        })
    }

    fn decode(&self, data: &[u8]) -> Result<RgbImage, CaptureError> {
        match self.format {
            PixelFormat::Mjpg => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map(|image| image.to_rgb8())
                .map_err(|e| CaptureError::Corrupt(e.to_string())),
            PixelFormat::Rgb3 => {
                let (width, height) = self.resolution;
                RgbImage::from_raw(width, height, data.to_vec()).ok_or_else(|| {
                    CaptureError::Corrupt(format!(
                        "expected {} bytes, got {}",
                        width as usize * height as usize * 3,
                        data.len()
                    ))
                })
            }
        }
    }
}

impl CaptureSource for V4lCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let raw = match self.camera.as_ref() {
            None => return Ok(None),
            Some(cam) => cam.capture()?,
        };

        let image = self.decode(&raw[..])?;
        let frame = Frame::new(self.seq, image);
        self.seq += 1;

        Ok(Some(frame))
    }

    fn release(&mut self) {
        if let Some(mut cam) = self.camera.take() {
            if let Err(e) = cam.stop() {
                log::warn!("Error stopping camera {}: {}", &self.device, e);
            }
            log::info!("Released camera {}", &self.device);
        }
        self.claim.take();
    }

    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .max_by_key(|(width, height)| width * height)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Intervals are `(numerator, denominator)` seconds per frame, so the highest rate is the
/// smallest interval.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(_, denominator)| *denominator > 0)
            .max_by(|a, b| {
                let rate_a = a.1 as f64 / a.0.max(1) as f64;
                let rate_b = b.1 as f64 / b.0.max(1) as f64;
                rate_a.total_cmp(&rate_b)
            })
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
