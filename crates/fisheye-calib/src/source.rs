//! Frame suppliers and scoped ownership of the capture device.

use crate::core::CalibError;
use image::{DynamicImage, ImageReader};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

/// A blocking supplier of raw frames, such as a camera.
///
/// Use it through a [`CaptureGuard`] so the device is released on every
/// exit path.
pub trait FrameSource {
    /// Acquire the device and begin streaming.
    fn start(&mut self) -> Result<(), CalibError>;

    /// Block until the next frame is available. `Ok(None)` means the source
    /// has no more frames.
    fn capture(&mut self) -> Result<Option<DynamicImage>, CalibError>;

    /// Release the device.
    fn stop(&mut self);
}

/// Exclusive, started access to a [`FrameSource`]; stops it on drop.
pub struct CaptureGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> CaptureGuard<'a, S> {
    pub fn acquire(source: &'a mut S) -> Result<Self, CalibError> {
        source.start()?;
        log::debug!("frame source started");
        Ok(Self { source })
    }

    pub fn capture(&mut self) -> Result<Option<DynamicImage>, CalibError> {
        self.source.capture()
    }
}

impl<S: FrameSource + ?Sized> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        self.source.stop();
        log::debug!("frame source released");
    }
}

/// Plays back the image files of a directory in file-name order.
#[derive(Clone, Debug)]
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    running: bool,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CalibError> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();
        log::info!("found {} frames in {}", files.len(), dir.display());
        Ok(Self {
            dir,
            files,
            cursor: 0,
            running: false,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl FrameSource for ImageDirSource {
    fn start(&mut self) -> Result<(), CalibError> {
        if self.files.is_empty() {
            return Err(CalibError::Capture(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }
        self.cursor = 0;
        self.running = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<Option<DynamicImage>, CalibError> {
        if !self.running {
            return Err(CalibError::Capture("capture on a stopped source".to_string()));
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let frame = ImageReader::open(path)?
            .decode()
            .map_err(|e| CalibError::Capture(format!("{}: {e}", path.display())))?;
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.running = false;
    }
}
