//! Per-pixel undistortion lookup.
//!
//! Every destination pixel `(u, v)` of the rectified image is a ray through
//! an ideal pinhole camera `P`. The ray is pushed through the fisheye model
//! `(K, D)` to find where it lands in the distorted source frame:
//!
//! ```text
//! x = (u - cx') / fx', y = (v - cy') / fy', r = sqrt(x² + y²)
//! θ = atan(r), θd = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)
//! src = (fx · (θd / r) · x + cx, fy · (θd / r) · y + cy)
//! ```
//!
//! Rectification is the identity rotation.

use fisheye_calib_core::{
    CalibError, CalibrationArtifact, FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics, Resolution,
};
use nalgebra::Matrix3;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

const AXIS_EPS: f64 = 1e-12;

/// Source-sampling coordinates for each destination pixel, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortionMap {
    resolution: Resolution,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl UndistortionMap {
    /// Wrap precomputed lookup arrays. The resolution must not be empty.
    pub fn from_parts(resolution: Resolution, map_x: Vec<f32>, map_y: Vec<f32>) -> Result<Self, CalibError> {
        if resolution.is_empty() {
            return Err(empty_size_error());
        }
        let expected = resolution.pixel_count();
        for (what, len) in [("undistortion map_x", map_x.len()), ("undistortion map_y", map_y.len())] {
            if len != expected {
                return Err(CalibError::ShapeMismatch {
                    what,
                    expected,
                    got: len,
                });
            }
        }
        Ok(Self {
            resolution,
            map_x,
            map_y,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn map_x(&self) -> &[f32] {
        &self.map_x
    }

    pub fn map_y(&self) -> &[f32] {
        &self.map_y
    }

    /// Source coordinate sampled for destination pixel `(x, y)`.
    pub fn source_of(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let idx = y as usize * self.resolution.width as usize + x as usize;
        Some((self.map_x[idx], self.map_y[idx]))
    }
}

/// Builds an [`UndistortionMap`] from `(K, D, size)` and an optional new
/// camera matrix for the rectified output.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortionMapBuilder {
    camera: FisheyeCamera,
    projection: Option<FisheyeIntrinsics>,
    size: Resolution,
}

impl UndistortionMapBuilder {
    pub fn new(camera: FisheyeCamera, size: Resolution) -> Self {
        Self {
            camera,
            projection: None,
            size,
        }
    }

    /// Builder for an artifact at its own resolution.
    pub fn from_artifact(artifact: &CalibrationArtifact) -> Self {
        Self::new(artifact.camera(), artifact.resolution())
    }

    /// Builder from a raw camera matrix and coefficient slice.
    ///
    /// `K` must be a zero-skew camera matrix and `d` must hold exactly four
    /// coefficients.
    pub fn from_raw(k: &Matrix3<f64>, d: &[f64], size: Resolution) -> Result<Self, CalibError> {
        let intrinsics = FisheyeIntrinsics::from_matrix(k)?;
        let distortion = FisheyeDistortion::from_slice(d)?;
        Ok(Self::new(FisheyeCamera::new(intrinsics, distortion), size))
    }

    /// Camera matrix of the rectified output. Defaults to `K`.
    pub fn with_projection(mut self, projection: FisheyeIntrinsics) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn camera(&self) -> &FisheyeCamera {
        &self.camera
    }

    pub fn projection(&self) -> FisheyeIntrinsics {
        self.projection.unwrap_or(self.camera.intrinsics)
    }

    pub fn size(&self) -> Resolution {
        self.size
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip(self), fields(size = %self.size))
    )]
    pub fn build(&self) -> Result<UndistortionMap, CalibError> {
        if self.size.is_empty() {
            return Err(empty_size_error());
        }
        let p = self.projection();
        let k = self.camera.intrinsics;
        if p.fx <= 0.0 || p.fy <= 0.0 || k.fx <= 0.0 || k.fy <= 0.0 {
            return Err(CalibError::ArtifactFormat(
                "undistortion requires positive focal lengths".to_string(),
            ));
        }
        if !self.camera.is_finite() || !p.is_finite() {
            return Err(CalibError::ArtifactFormat(
                "undistortion requires finite K, D and P".to_string(),
            ));
        }

        let width = self.size.width as usize;
        let n = self.size.pixel_count();
        let mut map_x = vec![0.0f32; n];
        let mut map_y = vec![0.0f32; n];
        let dist = &self.camera.distortion;

        let fill_row = |v: usize, row_x: &mut [f32], row_y: &mut [f32]| {
            let y = (v as f64 - p.cy) / p.fy;
            for (u, (mx, my)) in row_x.iter_mut().zip(row_y.iter_mut()).enumerate() {
                let x = (u as f64 - p.cx) / p.fx;
                let r = (x * x + y * y).sqrt();
                let scale = if r < AXIS_EPS {
                    1.0
                } else {
                    dist.theta_d(r.atan()) / r
                };
                *mx = (k.fx * scale * x + k.cx) as f32;
                *my = (k.fy * scale * y + k.cy) as f32;
            }
        };

        #[cfg(feature = "rayon")]
        map_x
            .par_chunks_mut(width)
            .zip(map_y.par_chunks_mut(width))
            .enumerate()
            .for_each(|(v, (row_x, row_y))| fill_row(v, row_x, row_y));

        #[cfg(not(feature = "rayon"))]
        map_x
            .chunks_mut(width)
            .zip(map_y.chunks_mut(width))
            .enumerate()
            .for_each(|(v, (row_x, row_y))| fill_row(v, row_x, row_y));

        log::debug!("built undistortion map {}", self.size);
        Ok(UndistortionMap {
            resolution: self.size,
            map_x,
            map_y,
        })
    }
}

fn empty_size_error() -> CalibError {
    CalibError::ShapeMismatch {
        what: "undistortion map pixels",
        expected: 1,
        got: 0,
    }
}
