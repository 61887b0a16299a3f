//! Per-view extrinsics for fixed intrinsics.
//!
//! A view is initialised by undistorting its corners to the ideal pinhole
//! plane, fitting a board-to-plane homography and decomposing it, then
//! refined with Gauss-Newton on the pixel reprojection error.

use crate::model::project_with_jacobians;
use fisheye_calib_core::{estimate_homography, CalibError, CalibrationSample, FisheyeCamera, Homography};
use nalgebra::{
    Isometry3, Matrix3, Matrix6, Point2, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6,
};

/// Normalised points further out than this (about 84°) are left out of the
/// homography fit; they are still used during refinement.
const MAX_NORMALIZED_RADIUS: f64 = 10.0;

/// Board-to-camera pose of one calibration view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewPose {
    pub cam_from_board: Isometry3<f64>,
}

impl ViewPose {
    /// Rotation as an axis-angle vector.
    pub fn rvec(&self) -> Vector3<f64> {
        self.cam_from_board.rotation.scaled_axis()
    }

    pub fn tvec(&self) -> Vector3<f64> {
        self.cam_from_board.translation.vector
    }

    /// `R ← exp(δω)·R`, `t ← t + δt`, with `delta = [δω, δt]`.
    fn perturbed(&self, delta: &Vector6<f64>) -> Self {
        let dw = Vector3::new(delta[0], delta[1], delta[2]);
        let dt = Vector3::new(delta[3], delta[4], delta[5]);
        let rotation = UnitQuaternion::from_scaled_axis(dw) * self.cam_from_board.rotation;
        let translation = Translation3::from(self.cam_from_board.translation.vector + dt);
        Self {
            cam_from_board: Isometry3::from_parts(translation, rotation),
        }
    }
}

/// Decompose a board-plane → normalised-image homography into a pose.
///
/// The board lies on `Z = 0`; the result is projected onto SO(3) and placed
/// in front of the camera.
pub fn pose_from_homography(h: &Homography) -> Option<ViewPose> {
    let h1 = h.h.column(0).into_owned();
    let h2 = h.h.column(1).into_owned();
    let h3 = h.h.column(2).into_owned();

    let denom = 0.5 * (h1.norm() + h2.norm());
    if denom <= 1e-12 {
        return None;
    }
    let lambda = 1.0 / denom;
    let mut r1 = h1 * lambda;
    let mut r2 = h2 * lambda;
    let mut t = h3 * lambda;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }
    if !r_orth.iter().all(|v| v.is_finite()) || !t.iter().all(|v| v.is_finite()) {
        return None;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(ViewPose {
        cam_from_board: Isometry3::from_parts(Translation3::from(t), rotation),
    })
}

/// Linear pose estimate of one view under the given camera.
pub fn init_view_pose(camera: &FisheyeCamera, sample: &CalibrationSample) -> Result<ViewPose, CalibError> {
    let mut board = Vec::with_capacity(sample.len());
    let mut normalized = Vec::with_capacity(sample.len());
    for (obj, img) in sample.object_points().iter().zip(sample.image_points()) {
        let Some(n) = camera.unproject(img) else {
            continue;
        };
        if n.norm() > MAX_NORMALIZED_RADIUS {
            continue;
        }
        board.push(Point2::new(obj.x, obj.y));
        normalized.push(Point2::new(n.x, n.y));
    }
    if board.len() < 4 {
        return Err(CalibError::divergence(format!(
            "only {} of {} corners could be undistorted for pose initialisation",
            board.len(),
            sample.len()
        )));
    }
    let h = estimate_homography(&board, &normalized)
        .ok_or_else(|| CalibError::divergence("degenerate view homography"))?;
    pose_from_homography(&h).ok_or_else(|| CalibError::divergence("homography does not decompose into a pose"))
}

/// Sum of squared pixel residuals of one view.
pub fn view_cost(camera: &FisheyeCamera, sample: &CalibrationSample, pose: &ViewPose) -> Option<f64> {
    let mut cost = 0.0;
    for (obj, img) in sample.object_points().iter().zip(sample.image_points()) {
        let uv = camera.project(&pose.cam_from_board.transform_point(obj))?;
        cost += (uv - img).norm_squared();
    }
    Some(cost)
}

/// Gauss-Newton refinement of a view pose with the intrinsics held fixed.
///
/// Steps that do not lower the cost are retried with increasing damping.
pub fn refine_view_pose(
    camera: &FisheyeCamera,
    sample: &CalibrationSample,
    initial: ViewPose,
    max_iters: usize,
) -> ViewPose {
    let mut pose = initial;
    let Some(mut cost) = view_cost(camera, sample, &pose) else {
        return pose;
    };
    let mut lambda = 1e-6;

    for _ in 0..max_iters {
        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        for (obj, img) in sample.object_points().iter().zip(sample.image_points()) {
            let rx = pose.cam_from_board.rotation * obj.coords;
            let pc = pose.cam_from_board.transform_point(obj);
            let Some((uv, _, j_pt)) = project_with_jacobians(camera, &pc) else {
                return pose;
            };
            let jp = pose_jacobian(&j_pt, &rx);
            let r = uv - img;
            jtj += jp.transpose() * jp;
            jtr += jp.transpose() * r;
        }

        let mut improved = false;
        for _ in 0..8 {
            let mut damped = jtj;
            for k in 0..6 {
                damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let Some(delta) = damped.cholesky().map(|c| c.solve(&(-jtr))) else {
                lambda *= 10.0;
                continue;
            };
            let candidate = pose.perturbed(&delta);
            match view_cost(camera, sample, &candidate) {
                Some(c) if c <= cost => {
                    let done = delta.norm() < 1e-12 || cost - c <= 1e-14 * cost.max(1e-300);
                    pose = candidate;
                    cost = c;
                    lambda = (lambda * 0.1).max(1e-12);
                    improved = !done;
                    break;
                }
                _ => lambda *= 10.0,
            }
        }
        if !improved {
            break;
        }
    }
    pose
}

/// `∂uv/∂[δω, δt]` for the left perturbation, given `R·X`.
pub(crate) fn pose_jacobian(
    j_pt: &nalgebra::Matrix2x3<f64>,
    rx: &Vector3<f64>,
) -> nalgebra::Matrix2x6<f64> {
    // ∂Xc/∂δω = -[R X]×, ∂Xc/∂δt = I
    let neg_skew = Matrix3::new(
        0.0, rx.z, -rx.y, //
        -rx.z, 0.0, rx.x, //
        rx.y, -rx.x, 0.0,
    );
    let jw = j_pt * neg_skew;
    let mut out = nalgebra::Matrix2x6::zeros();
    out.fixed_view_mut::<2, 3>(0, 0).copy_from(&jw);
    out.fixed_view_mut::<2, 3>(0, 3).copy_from(j_pt);
    out
}

/// Linear initialisation followed by refinement.
pub fn estimate_view_pose(
    camera: &FisheyeCamera,
    sample: &CalibrationSample,
    refine_iters: usize,
) -> Result<ViewPose, CalibError> {
    let init = init_view_pose(camera, sample)?;
    Ok(refine_view_pose(camera, sample, init, refine_iters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_calib_core::synthetic::{board_pose, project_sample, UniformPixelNoise};
    use fisheye_calib_core::{CalibrationTarget, FisheyeDistortion, FisheyeIntrinsics, Resolution};

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

    fn sample_for(pose: &Isometry3<f64>) -> CalibrationSample {
        project_sample(
            &camera(),
            pose,
            &CalibrationTarget::default(),
            Resolution::new(640, 480),
            0.0,
            &UniformPixelNoise::default(),
            0,
        )
        .unwrap()
    }

    #[test]
    fn homography_decomposition_recovers_exact_pose() {
        let target = CalibrationTarget::default();
        let gt = board_pose(&target, 0.3, -0.2, 0.4, Vector3::new(0.5, -0.3, 9.0));
        let sample = sample_for(&gt);
        let pose = init_view_pose(&camera(), &sample).unwrap();
        assert!((pose.tvec() - gt.translation.vector).norm() < 1e-6);
        assert!(pose.cam_from_board.rotation.angle_to(&gt.rotation) < 1e-6);
    }

    #[test]
    fn refinement_recovers_pose_under_wrong_intrinsics_start() {
        let target = CalibrationTarget::default();
        let gt = board_pose(&target, -0.2, 0.35, -0.1, Vector3::new(-1.0, 0.6, 10.0));
        let sample = sample_for(&gt);
        // Perturbed start.
        let start = ViewPose { cam_from_board: gt }.perturbed(&Vector6::new(0.05, -0.03, 0.02, 0.3, -0.2, 0.5));
        let refined = refine_view_pose(&camera(), &sample, start, 20);
        assert!((refined.tvec() - gt.translation.vector).norm() < 1e-6);
        assert!(view_cost(&camera(), &sample, &refined).unwrap() < 1e-10);
    }

    #[test]
    fn pose_jacobian_matches_finite_differences() {
        let cam = camera();
        let target = CalibrationTarget::default();
        let pose = ViewPose {
            cam_from_board: board_pose(&target, 0.2, 0.1, -0.3, Vector3::new(0.4, 0.2, 8.0)),
        };
        let obj = nalgebra::Point3::new(7.0, 4.0, 0.0);
        let rx = pose.cam_from_board.rotation * obj.coords;
        let pc = pose.cam_from_board.transform_point(&obj);
        let (_, _, j_pt) = project_with_jacobians(&cam, &pc).unwrap();
        let analytic = pose_jacobian(&j_pt, &rx);
        let h = 1e-7;
        for k in 0..6 {
            let mut d = Vector6::zeros();
            d[k] = h;
            let up = cam.project(&pose.perturbed(&d).cam_from_board.transform_point(&obj)).unwrap();
            let um = cam.project(&pose.perturbed(&(-d)).cam_from_board.transform_point(&obj)).unwrap();
            let fd = (up - um) / (2.0 * h);
            assert!((analytic[(0, k)] - fd.x).abs() < 1e-3 * fd.x.abs().max(1.0), "col {k}");
            assert!((analytic[(1, k)] - fd.y).abs() < 1e-3 * fd.y.abs().max(1.0), "col {k}");
        }
    }

    #[test]
    fn collapsed_points_fail_initialisation() {
        let target = CalibrationTarget::default();
        let sample = CalibrationSample::new(&target, vec![Point2::new(320.0, 240.0); 54]).unwrap();
        assert!(matches!(
            init_view_pose(&camera(), &sample),
            Err(CalibError::SolverDivergence { .. })
        ));
    }
}
