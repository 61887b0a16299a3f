//! Rectification of fisheye frames.
//!
//! [`UndistortionMapBuilder`] turns a calibrated camera `(K, D)` and an
//! output size into an [`UndistortionMap`]; [`remap`] resamples any 8-bit
//! [`image::ImageBuffer`] through it. Maps depend only on their inputs, so
//! [`UndistortCache`] and [`Rectifier`] keep one around for as long as the
//! camera and frame size stay the same.
//!
//! ```
//! use fisheye_calib_core::{CalibrationArtifact, FisheyeDistortion, FisheyeIntrinsics, Resolution};
//! use fisheye_calib_undistort::Rectifier;
//!
//! let artifact = CalibrationArtifact::new(
//!     Resolution::new(64, 48),
//!     FisheyeIntrinsics { fx: 30.0, fy: 30.0, cx: 31.5, cy: 23.5 },
//!     FisheyeDistortion::new(0.02, 0.0, 0.0, 0.0),
//!     0.2,
//! )?;
//! let mut rectifier = Rectifier::new(artifact);
//! let frame = image::GrayImage::new(64, 48);
//! let rectified = rectifier.rectify(&frame)?;
//! assert_eq!(rectified.dimensions(), (64, 48));
//! # Ok::<(), fisheye_calib_core::CalibError>(())
//! ```

mod cache;
mod map;
mod remap;

pub use cache::{Rectifier, UndistortCache};
pub use map::{UndistortionMap, UndistortionMapBuilder};
pub use remap::{remap, remap_into};
