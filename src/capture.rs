//! Photo persistence for macro steps.
//!
//! Photos are JPEG files named `tello_photo_<unix seconds>.jpg`. A second
//! photo within the same second gets a `_<n>` suffix instead of overwriting.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{GrayImage, ImageFormat, RgbImage};

use crate::frame::{Frame, PixelFormat};
use crate::PilotError;

#[derive(Clone, Debug)]
pub struct PhotoWriter {
    dir: PathBuf,
}

impl PhotoWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode `frame` as JPEG and write it under the photo directory.
    pub fn save(&self, frame: &Frame) -> Result<PathBuf, PilotError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.next_path(unix_seconds());
        let pixels = frame.pixels().to_vec();
        let invalid = || {
            PilotError::Decode(format!(
                "frame {} does not match {}x{} {:?}",
                frame.sequence, frame.width, frame.height, frame.format
            ))
        };

        match frame.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(frame.width, frame.height, pixels)
                .ok_or_else(invalid)?
                .save_with_format(&path, ImageFormat::Jpeg)?,
            PixelFormat::Gray8 => GrayImage::from_raw(frame.width, frame.height, pixels)
                .ok_or_else(invalid)?
                .save_with_format(&path, ImageFormat::Jpeg)?,
        }
        log::info!("PhotoWriter: saved {}", path.display());
        Ok(path)
    }

    fn next_path(&self, timestamp: u64) -> PathBuf {
        let first = self.dir.join(format!("tello_photo_{}.jpg", timestamp));
        if !first.exists() {
            return first;
        }
        let mut n = 1u32;
        loop {
            let candidate = self.dir.join(format!("tello_photo_{}_{}.jpg", timestamp, n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
