//! Replay a directory of still images as if they came from a camera.
//!
//! Useful on machines without a webcam and for demos with known content.
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, RgbImage};

use crate::{CaptureError, CaptureSource, Frame};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Frame source reading the images of a directory in lexical order.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    seq: u64,
    dimensions: Option<(u32, u32)>,
    /// Whether the current pass over the files decoded at least one image.
    decoded_in_pass: bool,
    released: bool,
}

impl ImageDirSource {
    /// Open `dir` for replay. With `looping`, the files are replayed forever.
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self, CaptureError> {
        let dir = dir.as_ref().to_path_buf();
        let open_err = |reason: String| CaptureError::Open {
            source_name: dir.display().to_string(),
            reason,
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| open_err(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(open_err("no image files found".into()));
        }

        log::info!(
            "Replaying {} images from {}{}",
            files.len(),
            dir.display(),
            if looping { " in a loop" } else { "" }
        );

        Ok(Self {
            dir,
            files,
            cursor: 0,
            looping,
            seq: 0,
            dimensions: None,
            decoded_in_pass: false,
            released: false,
        })
    }

    fn load(&mut self, path: &Path) -> Result<RgbImage, CaptureError> {
        let image = image::open(path)
            .map_err(|e| CaptureError::Corrupt(format!("{}: {e}", path.display())))?
            .to_rgb8();

        // Keep the session resolution fixed to the first image
        match self.dimensions {
            None => {
                self.dimensions = Some(image.dimensions());
                Ok(image)
            }
            Some((width, height)) if image.dimensions() != (width, height) => {
                log::debug!("Resizing {} to {}x{}", path.display(), width, height);
                Ok(image::imageops::resize(
                    &image,
                    width,
                    height,
                    FilterType::Triangle,
                ))
            }
            Some(_) => Ok(image),
        }
    }
}

impl CaptureSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Ok(None);
        }
        if self.cursor >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            // Looping over files that never decode would skip frames forever
            if !self.decoded_in_pass {
                return Err(CaptureError::Device(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("no image in {} could be decoded", self.dir.display()),
                )));
            }
            self.cursor = 0;
            self.decoded_in_pass = false;
        }

        let path = self.files[self.cursor].clone();
        self.cursor += 1;

        let image = self.load(&path)?;
        self.decoded_in_pass = true;
        let frame = Frame::new(self.seq, image);
        self.seq += 1;

        Ok(Some(frame))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!("Stopped replaying {}", self.dir.display());
        }
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.dir.display())
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_image_files_are_replayed() {
        assert!(has_image_extension(Path::new("a/frame-0.jpg")));
        assert!(has_image_extension(Path::new("frame-1.PNG")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("no_extension")));
    }
}
