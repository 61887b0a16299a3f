//! Deterministic synthetic data: board poses, projected samples and rendered
//! checkerboard frames seen through a fisheye camera.
//!
//! Nothing here depends on a random number generator's internals, so the
//! generated datasets are stable across platforms and versions.

use crate::{CalibrationSample, CalibrationTarget, FisheyeCamera, GrayImage, Resolution};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector2, Vector3};

/// Deterministic uniform pixel noise in `[-max_abs_px, +max_abs_px]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UniformPixelNoise {
    pub seed: u64,
    pub max_abs_px: f64,
}

impl UniformPixelNoise {
    /// Noise vector for a given `(view, point)` key.
    pub fn sample(&self, view_idx: usize, point_idx: usize) -> Vector2<f64> {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vector2::zeros();
        }
        let key = mix_key(self.seed, view_idx, point_idx);
        let u = unit_f64(splitmix64(key));
        let v = unit_f64(splitmix64(key ^ 0x94D0_49BB_1331_11EB));
        Vector2::new((u - 0.5) * 2.0 * max_abs, (v - 0.5) * 2.0 * max_abs)
    }
}

#[inline]
fn mix_key(seed: u64, a: usize, b: usize) -> u64 {
    seed ^ (a as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (b as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits mapped to `[0, 1)`.
#[inline]
fn unit_f64(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Deterministic value in `[lo, hi)` for a `(seed, view, slot)` key.
fn uniform(seed: u64, view: usize, slot: usize, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * unit_f64(splitmix64(mix_key(seed, view, slot)))
}

/// Pose mapping board coordinates into the camera frame.
///
/// The board is rotated by the Euler angles `(roll, pitch, yaw)` about its own
/// centre, and that centre lands at `center_cam`.
pub fn board_pose(
    target: &CalibrationTarget,
    roll: f64,
    pitch: f64,
    yaw: f64,
    center_cam: Vector3<f64>,
) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
    let center = Vector3::new(
        (target.cols as f64 - 1.0) * 0.5,
        (target.rows as f64 - 1.0) * 0.5,
        0.0,
    );
    let t = center_cam - rotation * center;
    Isometry3::from_parts(Translation3::from(t), rotation)
}

/// `n` varied poses with the board 8..14 board units in front of the camera.
pub fn varied_board_poses(target: &CalibrationTarget, n: usize, seed: u64) -> Vec<Isometry3<f64>> {
    (0..n)
        .map(|i| {
            let z = uniform(seed, i, 0, 8.0, 14.0);
            let center = Vector3::new(
                uniform(seed, i, 1, -0.45, 0.45) * z,
                uniform(seed, i, 2, -0.3, 0.3) * z,
                z,
            );
            board_pose(
                target,
                uniform(seed, i, 3, -0.6, 0.6),
                uniform(seed, i, 4, -0.6, 0.6),
                uniform(seed, i, 5, -0.4, 0.4),
                center,
            )
        })
        .collect()
}

/// Project the board into the camera and wrap it as a sample.
///
/// Returns `None` unless every corner lands at least `margin` pixels inside
/// the image.
pub fn project_sample(
    camera: &FisheyeCamera,
    cam_from_board: &Isometry3<f64>,
    target: &CalibrationTarget,
    resolution: Resolution,
    margin: f64,
    noise: &UniformPixelNoise,
    view_idx: usize,
) -> Option<CalibrationSample> {
    let (w, h) = (resolution.width as f64, resolution.height as f64);
    let mut pixels = Vec::with_capacity(target.corner_count());
    for (idx, pw) in target.object_points().iter().enumerate() {
        let uv = camera.project(&cam_from_board.transform_point(pw))?;
        if uv.x < margin || uv.y < margin || uv.x > w - 1.0 - margin || uv.y > h - 1.0 - margin {
            return None;
        }
        let n = noise.sample(view_idx, idx);
        pixels.push(Point2::new(uv.x + n.x, uv.y + n.y));
    }
    CalibrationSample::new(target, pixels).ok()
}

/// Appearance of a rendered checkerboard frame.
#[derive(Clone, Copy, Debug)]
pub struct RenderParams {
    pub dark: u8,
    pub light: u8,
    pub background: u8,
    /// Light border around the outermost squares, in squares.
    pub margin_squares: f64,
    /// Sub-samples per pixel side for anti-aliasing.
    pub supersample: usize,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            dark: 25,
            light: 230,
            background: 120,
            margin_squares: 0.8,
            supersample: 2,
        }
    }
}

/// Shade of the board at board-plane coordinates `(x, y)`.
///
/// Interior corners sit at integer `(c, r)`; squares span `[-1, cols] × [-1, rows]`.
fn board_shade(target: &CalibrationTarget, params: &RenderParams, x: f64, y: f64) -> f64 {
    let (cols, rows) = (target.cols as f64, target.rows as f64);
    let inside_squares = x >= -1.0 && y >= -1.0 && x < cols && y < rows;
    if inside_squares {
        let parity = (x.floor() as i64 + y.floor() as i64).rem_euclid(2);
        return if parity == 0 {
            params.dark as f64
        } else {
            params.light as f64
        };
    }
    let m = params.margin_squares;
    let inside_margin = x >= -1.0 - m && y >= -1.0 - m && x < cols + m && y < rows + m;
    if inside_margin {
        params.light as f64
    } else {
        params.background as f64
    }
}

/// Ray-trace a checkerboard through the fisheye camera.
pub fn render_checkerboard(
    camera: &FisheyeCamera,
    cam_from_board: &Isometry3<f64>,
    target: &CalibrationTarget,
    resolution: Resolution,
    params: &RenderParams,
) -> GrayImage {
    let (w, h) = (resolution.width as usize, resolution.height as usize);
    let mut img = GrayImage::new(w, h);
    let board_from_cam = cam_from_board.inverse();
    let origin = board_from_cam.transform_point(&Point3::origin());
    let ss = params.supersample.max(1);
    let step = 1.0 / ss as f64;

    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for sy in 0..ss {
                for sx in 0..ss {
                    let px = Point2::new(
                        x as f64 - 0.5 + (sx as f64 + 0.5) * step,
                        y as f64 - 0.5 + (sy as f64 + 0.5) * step,
                    );
                    acc += match camera.unproject(&px) {
                        Some(n) => {
                            let dir = board_from_cam.transform_vector(&Vector3::new(n.x, n.y, 1.0));
                            if dir.z.abs() < 1e-12 {
                                params.background as f64
                            } else {
                                let lambda = -origin.z / dir.z;
                                if lambda <= 0.0 {
                                    params.background as f64
                                } else {
                                    let hit = origin + dir * lambda;
                                    board_shade(target, params, hit.x, hit.y)
                                }
                            }
                        }
                        None => params.background as f64,
                    };
                }
            }
            img.data[y * w + x] = (acc / (ss * ss) as f64).round().clamp(0.0, 255.0) as u8;
        }
    }
    img
}
