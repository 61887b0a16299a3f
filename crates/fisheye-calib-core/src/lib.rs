//! Core types for fisheye camera calibration.
//!
//! This crate is purely geometric: camera model, target geometry, samples,
//! the persisted artifact and a few image helpers. It does not depend on any
//! concrete corner detector, solver or image crate.

mod artifact;
mod camera;
mod error;
mod homography;
mod image;
mod logger;
pub mod synthetic;
mod target;

pub use artifact::CalibrationArtifact;
pub use camera::{FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics, Resolution};
pub use error::CalibError;
pub use homography::{estimate_homography, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use target::{CalibrationSample, CalibrationTarget};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
