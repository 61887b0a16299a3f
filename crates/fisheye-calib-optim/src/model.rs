//! Fisheye projection with analytic Jacobians.
//!
//! Intrinsic parameters are packed as `[fx, fy, cx, cy, k1, k2, k3, k4]`;
//! skew is not a parameter.

use fisheye_calib_core::{FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics};
use nalgebra::{Matrix2x3, Point2, Point3, SMatrix, SVector};

pub const N_INTRINSICS: usize = 8;

pub type IntrinsicVector = SVector<f64, N_INTRINSICS>;
pub type IntrinsicJacobian = SMatrix<f64, 2, N_INTRINSICS>;

const AXIS_EPS: f64 = 1e-10;

pub fn pack(camera: &FisheyeCamera) -> IntrinsicVector {
    let k = &camera.intrinsics;
    let d = &camera.distortion.k;
    IntrinsicVector::from_column_slice(&[k.fx, k.fy, k.cx, k.cy, d[0], d[1], d[2], d[3]])
}

pub fn unpack(p: &IntrinsicVector) -> FisheyeCamera {
    FisheyeCamera::new(
        FisheyeIntrinsics {
            fx: p[0],
            fy: p[1],
            cx: p[2],
            cy: p[3],
        },
        FisheyeDistortion::new(p[4], p[5], p[6], p[7]),
    )
}

/// Pixel projection of a camera-frame point plus its Jacobians with respect
/// to the intrinsics and to the point itself. `None` behind the camera.
pub fn project_with_jacobians(
    camera: &FisheyeCamera,
    pc: &Point3<f64>,
) -> Option<(Point2<f64>, IntrinsicJacobian, Matrix2x3<f64>)> {
    if pc.z <= AXIS_EPS {
        return None;
    }
    let (fx, fy) = (camera.intrinsics.fx, camera.intrinsics.fy);
    let dist = &camera.distortion;
    let inv_z = 1.0 / pc.z;
    let a = pc.x * inv_z;
    let b = pc.y * inv_z;
    let r2 = a * a + b * b;
    let r = r2.sqrt();

    // g(r) = θd / r and its derivative; both have finite limits on the axis.
    let (theta, g, dg_dr) = if r < AXIS_EPS {
        (r, 1.0, 0.0)
    } else {
        let theta = r.atan();
        let theta_d = dist.theta_d(theta);
        let dtheta_dr = 1.0 / (1.0 + r2);
        let g = theta_d / r;
        let dg_dr = (dist.theta_d_derivative(theta) * dtheta_dr * r - theta_d) / r2;
        (theta, g, dg_dr)
    };

    let xd = g * a;
    let yd = g * b;
    let uv = Point2::new(fx * xd + camera.intrinsics.cx, fy * yd + camera.intrinsics.cy);

    let mut j_int = IntrinsicJacobian::zeros();
    j_int[(0, 0)] = xd;
    j_int[(0, 2)] = 1.0;
    j_int[(1, 1)] = yd;
    j_int[(1, 3)] = 1.0;
    if r >= AXIS_EPS {
        let (ca, cb) = (a / r, b / r);
        let t2 = theta * theta;
        let mut tp = theta * t2; // θ³, θ⁵, θ⁷, θ⁹
        for i in 0..4 {
            j_int[(0, 4 + i)] = fx * ca * tp;
            j_int[(1, 4 + i)] = fy * cb * tp;
            tp *= t2;
        }
    }

    // d(xd, yd)/d(a, b)
    let (dxa, dxb, dya, dyb) = if r < AXIS_EPS {
        (g, 0.0, 0.0, g)
    } else {
        let s = dg_dr / r;
        (g + a * a * s, a * b * s, a * b * s, g + b * b * s)
    };
    // d(a, b)/d(X, Y, Z)
    let dab = Matrix2x3::new(
        inv_z, 0.0, -a * inv_z, //
        0.0, inv_z, -b * inv_z,
    );
    let ddist = nalgebra::Matrix2::new(fx * dxa, fx * dxb, fy * dya, fy * dyb);
    let j_pt = ddist * dab;

    Some((uv, j_int, j_pt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> FisheyeCamera {
        FisheyeCamera::new(
            FisheyeIntrinsics {
                fx: 262.0,
                fy: 258.0,
                cx: 322.0,
                cy: 236.0,
            },
            FisheyeDistortion::new(0.05, -0.02, 0.01, -0.002),
        )
    }

    #[test]
    fn projection_matches_camera_model() {
        let cam = camera();
        let p = Point3::new(0.7, -0.4, 1.3);
        let (uv, _, _) = project_with_jacobians(&cam, &p).unwrap();
        let expected = cam.project(&p).unwrap();
        assert_relative_eq!(uv.x, expected.x, epsilon = 1e-12);
        assert_relative_eq!(uv.y, expected.y, epsilon = 1e-12);
    }

    #[test]
    fn intrinsic_jacobian_matches_finite_differences() {
        let cam = camera();
        let p = Point3::new(0.7, -0.4, 1.3);
        let (_, j_int, _) = project_with_jacobians(&cam, &p).unwrap();
        let base = pack(&cam);
        for k in 0..N_INTRINSICS {
            let h = 1e-6 * base[k].abs().max(1e-3);
            let mut plus = base;
            plus[k] += h;
            let mut minus = base;
            minus[k] -= h;
            let up = unpack(&plus).project(&p).unwrap();
            let um = unpack(&minus).project(&p).unwrap();
            assert_relative_eq!(j_int[(0, k)], (up.x - um.x) / (2.0 * h), epsilon = 1e-4, max_relative = 1e-5);
            assert_relative_eq!(j_int[(1, k)], (up.y - um.y) / (2.0 * h), epsilon = 1e-4, max_relative = 1e-5);
        }
    }

    #[test]
    fn point_jacobian_matches_finite_differences() {
        let cam = camera();
        let p = Point3::new(-0.9, 0.5, 1.1);
        let (_, _, j_pt) = project_with_jacobians(&cam, &p).unwrap();
        let h = 1e-7;
        for k in 0..3 {
            let mut plus = p;
            plus[k] += h;
            let mut minus = p;
            minus[k] -= h;
            let up = cam.project(&plus).unwrap();
            let um = cam.project(&minus).unwrap();
            assert_relative_eq!(j_pt[(0, k)], (up.x - um.x) / (2.0 * h), epsilon = 1e-3);
            assert_relative_eq!(j_pt[(1, k)], (up.y - um.y) / (2.0 * h), epsilon = 1e-3);
        }
    }

    #[test]
    fn on_axis_point_has_finite_jacobians() {
        let (uv, j_int, j_pt) = project_with_jacobians(&camera(), &Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(uv.x, 322.0);
        assert!(j_int.iter().all(|v| v.is_finite()));
        assert_relative_eq!(j_pt[(0, 0)], 262.0 / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let cam = camera();
        assert_eq!(unpack(&pack(&cam)), cam);
    }
}
