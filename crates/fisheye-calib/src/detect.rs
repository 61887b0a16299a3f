use crate::chessboard::CornerDetector;
use crate::core::{self, CalibError, CalibrationSample, CalibrationTarget};
use image::DynamicImage;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Convert an `image::GrayImage` into the lightweight core view type.
pub fn gray_view(img: &image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Copy a core grayscale frame into an `image::GrayImage`.
pub fn to_image_gray(img: &core::GrayImage) -> Option<image::GrayImage> {
    image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
}

/// Apply the mounting rotation to a raw frame.
pub fn orient_frame(frame: DynamicImage, rotate_180: bool) -> DynamicImage {
    if rotate_180 {
        frame.rotate180()
    } else {
        frame
    }
}

/// Oriented grayscale version of a raw frame, ready for detection.
pub fn prepare_gray(frame: &DynamicImage, rotate_180: bool) -> image::GrayImage {
    let gray = frame.to_luma8();
    if rotate_180 {
        image::imageops::rotate180(&gray)
    } else {
        gray
    }
}

/// Run the corner detector on an `image::GrayImage`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, detector, target), fields(width = img.width(), height = img.height()))
)]
pub fn detect_chessboard(
    img: &image::GrayImage,
    detector: &CornerDetector,
    target: &CalibrationTarget,
) -> Result<CalibrationSample, CalibError> {
    detector.detect_sample(&gray_view(img), target)
}
