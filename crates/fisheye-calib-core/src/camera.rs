//! Equidistant fisheye camera model.
//!
//! A camera-frame point `(X, Y, Z)` with `Z > 0` maps to pixels as
//!
//! ```text
//! a = X/Z, b = Y/Z, r = sqrt(a² + b²), θ = atan(r)
//! θd = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)
//! u = fx · (θd / r) · a + cx
//! v = fy · (θd / r) · b + cy
//! ```
//!
//! Skew is fixed at zero.

use crate::CalibError;
use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Radii below this are treated as the optical axis.
const AXIS_EPS: f64 = 1e-8;

/// Image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Focal lengths and principal point, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FisheyeIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl FisheyeIntrinsics {
    /// 3×3 camera matrix with zero skew.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read intrinsics back from a camera matrix, rejecting skew or a
    /// non-canonical last row.
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, CalibError> {
        if !k.iter().all(|v| v.is_finite()) {
            return Err(CalibError::ArtifactFormat(
                "K contains non-finite entries".to_string(),
            ));
        }
        let tol = 1e-9;
        if k[(0, 1)].abs() > tol || k[(1, 0)].abs() > tol {
            return Err(CalibError::ArtifactFormat(format!(
                "K must have zero skew, got K[0][1]={} K[1][0]={}",
                k[(0, 1)],
                k[(1, 0)]
            )));
        }
        if k[(2, 0)].abs() > tol || k[(2, 1)].abs() > tol || (k[(2, 2)] - 1.0).abs() > tol {
            return Err(CalibError::ArtifactFormat(
                "K last row must be [0, 0, 1]".to_string(),
            ));
        }
        if k[(0, 0)] <= 0.0 || k[(1, 1)] <= 0.0 {
            return Err(CalibError::ArtifactFormat(format!(
                "K focal lengths must be positive, got fx={} fy={}",
                k[(0, 0)],
                k[(1, 1)]
            )));
        }
        Ok(Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        })
    }

    /// Scale focal lengths and principal point independently per axis.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.cx.is_finite() && self.cy.is_finite()
    }
}

/// The four fisheye distortion coefficients `k1..k4`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct FisheyeDistortion {
    pub k: Vector4<f64>,
}

impl FisheyeDistortion {
    pub fn new(k1: f64, k2: f64, k3: f64, k4: f64) -> Self {
        Self {
            k: Vector4::new(k1, k2, k3, k4),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from a slice that must hold exactly four coefficients.
    pub fn from_slice(values: &[f64]) -> Result<Self, CalibError> {
        if values.len() != 4 {
            return Err(CalibError::ShapeMismatch {
                what: "distortion coefficients",
                expected: 4,
                got: values.len(),
            });
        }
        Ok(Self {
            k: Vector4::from_column_slice(values),
        })
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.k[0], self.k[1], self.k[2], self.k[3]]
    }

    /// `θd(θ)`.
    #[inline]
    pub fn theta_d(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        let t4 = t2 * t2;
        let t6 = t4 * t2;
        let t8 = t4 * t4;
        theta * (1.0 + self.k[0] * t2 + self.k[1] * t4 + self.k[2] * t6 + self.k[3] * t8)
    }

    /// `dθd/dθ`.
    #[inline]
    pub fn theta_d_derivative(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        let t4 = t2 * t2;
        let t6 = t4 * t2;
        let t8 = t4 * t4;
        1.0 + 3.0 * self.k[0] * t2 + 5.0 * self.k[1] * t4 + 7.0 * self.k[2] * t6 + 9.0 * self.k[3] * t8
    }

    /// Invert `θd(θ)` with Newton iterations. `None` if the solution leaves
    /// the forward hemisphere or the iteration stalls.
    pub fn undistort_theta(&self, theta_d: f64) -> Option<f64> {
        if theta_d.abs() < AXIS_EPS {
            return Some(theta_d);
        }
        let mut theta = theta_d;
        for _ in 0..20 {
            let step = (self.theta_d(theta) - theta_d) / self.theta_d_derivative(theta);
            if !step.is_finite() {
                return None;
            }
            theta -= step;
            if step.abs() < 1e-12 {
                break;
            }
        }
        let converged = (self.theta_d(theta) - theta_d).abs() < 1e-8;
        if !converged || !(0.0..std::f64::consts::FRAC_PI_2).contains(&theta.abs()) {
            return None;
        }
        // A solution with flipped sign means θd is not monotonic here.
        if theta.signum() != theta_d.signum() {
            return None;
        }
        Some(theta)
    }

    pub fn is_finite(&self) -> bool {
        self.k.iter().all(|v| v.is_finite())
    }
}

/// Intrinsics plus distortion: everything needed to project and unproject.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FisheyeCamera {
    pub intrinsics: FisheyeIntrinsics,
    pub distortion: FisheyeDistortion,
}

impl FisheyeCamera {
    pub fn new(intrinsics: FisheyeIntrinsics, distortion: FisheyeDistortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Apply the fisheye distortion to an ideal pinhole point `(a, b)`.
    #[inline]
    pub fn distort_normalized(&self, n: Vector2<f64>) -> Vector2<f64> {
        let r = n.norm();
        if r < AXIS_EPS {
            return n;
        }
        let theta = r.atan();
        n * (self.distortion.theta_d(theta) / r)
    }

    /// Inverse of [`Self::distort_normalized`].
    pub fn undistort_normalized(&self, nd: Vector2<f64>) -> Option<Vector2<f64>> {
        let theta_d = nd.norm();
        if theta_d < AXIS_EPS {
            return Some(nd);
        }
        let theta = self.distortion.undistort_theta(theta_d)?;
        Some(nd * (theta.tan() / theta_d))
    }

    /// Project a camera-frame point to pixels; `None` behind the camera.
    #[inline]
    pub fn project(&self, pc: &Point3<f64>) -> Option<Point2<f64>> {
        if pc.z <= AXIS_EPS {
            return None;
        }
        let d = self.distort_normalized(Vector2::new(pc.x / pc.z, pc.y / pc.z));
        let k = &self.intrinsics;
        Some(Point2::new(k.fx * d.x + k.cx, k.fy * d.y + k.cy))
    }

    /// Map a pixel to the ideal pinhole plane `Z = 1`.
    pub fn unproject(&self, px: &Point2<f64>) -> Option<Vector2<f64>> {
        let k = &self.intrinsics;
        let nd = Vector2::new((px.x - k.cx) / k.fx, (px.y - k.cy) / k.fy);
        self.undistort_normalized(nd)
    }

    pub fn is_finite(&self) -> bool {
        self.intrinsics.is_finite() && self.distortion.is_finite()
    }
}
