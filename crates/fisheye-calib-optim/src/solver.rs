use crate::model::{pack, project_with_jacobians, unpack, IntrinsicVector, N_INTRINSICS};
use crate::params::SolverParams;
use crate::pose::{estimate_view_pose, pose_jacobian, view_cost, ViewPose};
use fisheye_calib_core::{
    CalibError, CalibrationArtifact, CalibrationSample, FisheyeCamera, FisheyeDistortion,
    FisheyeIntrinsics, Resolution,
};
use log::{debug, info};
use nalgebra::{Matrix6, SMatrix, Vector2, Vector6};

type IntrinsicMatrix = SMatrix<f64, N_INTRINSICS, N_INTRINSICS>;

/// Reciprocal condition (of the diagonally scaled reduced normal matrix)
/// below which the problem is treated as rank deficient. Well-posed sets sit
/// around 1e-5; parallel board planes fall below 1e-12.
const MIN_RCOND: f64 = 1e-10;
/// Views whose corners differ by less than this (rms, pixels) are one pose.
pub const MIN_VIEW_SEPARATION_PX: f64 = 1.0;
/// A single board pose cannot pin down the intrinsics, however often it
/// is repeated.
pub const MIN_DISTINCT_VIEWS: usize = 2;
const MAX_DAMPING_TRIES: usize = 10;

/// Outcome of the intrinsic iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub initial_rms: f64,
    pub final_cost: f64,
    /// `false` when the iteration cap was reached first.
    pub converged: bool,
}

/// A solved calibration: the artifact plus the per-view extrinsics that
/// are not persisted.
#[derive(Clone, Debug)]
pub struct FisheyeCalibration {
    pub artifact: CalibrationArtifact,
    pub views: Vec<ViewPose>,
    pub report: SolveReport,
}

/// Starting point: equidistant lens covering the larger image side with
/// a half-turn, principal point at the image centre, no distortion.
pub fn initial_camera(resolution: Resolution) -> FisheyeCamera {
    let (w, h) = (resolution.width as f64, resolution.height as f64);
    let f = w.max(h) / std::f64::consts::PI;
    FisheyeCamera::new(
        FisheyeIntrinsics {
            fx: f,
            fy: f,
            cx: (w - 1.0) * 0.5,
            cy: (h - 1.0) * 0.5,
        },
        FisheyeDistortion::zero(),
    )
}

/// Levenberg-Marquardt over `fx, fy, cx, cy, k1..k4` (skew fixed at zero).
///
/// Every view's pose is re-estimated from scratch for each candidate set of
/// intrinsics; the intrinsic step itself comes from the normal equations
/// with the pose blocks eliminated (Schur complement).
#[derive(Clone, Debug, Default)]
pub struct FisheyeCalibrationSolver {
    pub params: SolverParams,
}

impl FisheyeCalibrationSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip(self, samples), fields(views = samples.len()))
    )]
    pub fn solve(
        &self,
        samples: &[CalibrationSample],
        resolution: Resolution,
    ) -> Result<FisheyeCalibration, CalibError> {
        if samples.is_empty() {
            return Err(CalibError::InsufficientSamples {
                required: 1,
                got: 0,
            });
        }
        if resolution.is_empty() {
            return Err(CalibError::divergence(format!(
                "cannot calibrate at empty resolution {resolution}"
            )));
        }
        let n_points: usize = samples.iter().map(CalibrationSample::len).sum();
        if n_points == 0 {
            return Err(CalibError::divergence("samples contain no points"));
        }
        let distinct = distinct_view_count(samples);
        if distinct < MIN_DISTINCT_VIEWS {
            return Err(CalibError::divergence(format!(
                "{} samples show only {distinct} distinct board pose(s), need {MIN_DISTINCT_VIEWS}",
                samples.len()
            )));
        }

        let mut params = pack(&initial_camera(resolution));
        let mut camera = unpack(&params);
        let mut poses = self.recompute_extrinsics(&camera, samples)?;
        let mut cost = total_cost(&camera, samples, &poses)?;
        let initial_rms = (cost / n_points as f64).sqrt();
        info!(
            "fisheye calibration: {} views, {} points at {}, initial rms {:.4} px",
            samples.len(),
            n_points,
            resolution,
            initial_rms
        );

        let mut lambda = self.params.initial_lambda;
        let mut converged = false;
        let mut iterations = 0;
        for iter in 0..self.params.max_iters {
            iterations = iter + 1;
            let (s, rhs) = reduced_normal_equations(&camera, samples, &poses)?;
            check_conditioning(&s)?;

            let mut accepted = None;
            for _ in 0..MAX_DAMPING_TRIES {
                let mut damped = s;
                for k in 0..N_INTRINSICS {
                    damped[(k, k)] += lambda * s[(k, k)];
                }
                let Some(delta) = damped.cholesky().map(|c| c.solve(&(-rhs))) else {
                    lambda *= 10.0;
                    continue;
                };
                let candidate = params + delta;
                let finite = candidate.iter().all(|v| v.is_finite());
                if !finite || candidate[0] <= 0.0 || candidate[1] <= 0.0 {
                    lambda *= 10.0;
                    continue;
                }
                let cand_camera = unpack(&candidate);
                let evaluated = self
                    .recompute_extrinsics(&cand_camera, samples)
                    .and_then(|p| total_cost(&cand_camera, samples, &p).map(|c| (p, c)));
                match evaluated {
                    Ok((cand_poses, cand_cost)) if cand_cost < cost => {
                        lambda = (lambda * 0.1).max(1e-12);
                        accepted = Some((candidate, cand_poses, cand_cost, delta));
                        break;
                    }
                    _ => lambda *= 10.0,
                }
            }

            let Some((candidate, cand_poses, cand_cost, delta)) = accepted else {
                debug!("iteration {iterations}: no cost-reducing step, stopping");
                converged = true;
                break;
            };
            let rel_step = delta.norm() / candidate.norm().max(f64::MIN_POSITIVE);
            let rel_cost = (cost - cand_cost) / cost.max(f64::MIN_POSITIVE);
            params = candidate;
            camera = unpack(&params);
            poses = cand_poses;
            cost = cand_cost;
            debug!(
                "iteration {iterations}: rms {:.5} px, rel step {rel_step:.2e}, rel cost {rel_cost:.2e}, lambda {lambda:.1e}",
                (cost / n_points as f64).sqrt()
            );
            if rel_step < self.params.epsilon || rel_cost < self.params.epsilon {
                converged = true;
                break;
            }
        }

        if !camera.is_finite() {
            return Err(CalibError::divergence("non-finite intrinsics"));
        }
        let rms = (cost / n_points as f64).sqrt();
        if !rms.is_finite() {
            return Err(CalibError::divergence("non-finite reprojection error"));
        }
        let artifact = CalibrationArtifact::new(resolution, camera.intrinsics, camera.distortion, rms)
            .map_err(|e| CalibError::divergence(e.to_string()))?;
        info!(
            "fisheye calibration finished after {iterations} iterations (converged: {converged}): rms {rms:.4} px"
        );
        Ok(FisheyeCalibration {
            artifact,
            views: poses,
            report: SolveReport {
                iterations,
                initial_rms,
                final_cost: cost,
                converged,
            },
        })
    }

    fn recompute_extrinsics(
        &self,
        camera: &FisheyeCamera,
        samples: &[CalibrationSample],
    ) -> Result<Vec<ViewPose>, CalibError> {
        samples
            .iter()
            .map(|s| estimate_view_pose(camera, s, self.params.pose_iters))
            .collect()
    }
}

/// Rms distance between corresponding corners of two views; infinite when
/// they do not observe the same board points.
pub fn view_separation(a: &CalibrationSample, b: &CalibrationSample) -> f64 {
    if a.len() != b.len() || a.is_empty() || a.object_points() != b.object_points() {
        return f64::INFINITY;
    }
    let sq: f64 = a
        .image_points()
        .iter()
        .zip(b.image_points())
        .map(|(p, q)| (p - q).norm_squared())
        .sum();
    (sq / a.len() as f64).sqrt()
}

/// Number of views left after merging those closer than
/// [`MIN_VIEW_SEPARATION_PX`] to an earlier one.
pub fn distinct_view_count(samples: &[CalibrationSample]) -> usize {
    let mut kept: Vec<&CalibrationSample> = Vec::new();
    for sample in samples {
        if kept
            .iter()
            .all(|k| view_separation(k, sample) >= MIN_VIEW_SEPARATION_PX)
        {
            kept.push(sample);
        }
    }
    kept.len()
}

fn total_cost(
    camera: &FisheyeCamera,
    samples: &[CalibrationSample],
    poses: &[ViewPose],
) -> Result<f64, CalibError> {
    let mut cost = 0.0;
    for (sample, pose) in samples.iter().zip(poses) {
        cost += view_cost(camera, sample, pose)
            .ok_or_else(|| CalibError::divergence("board point projects behind the camera"))?;
    }
    if !cost.is_finite() {
        return Err(CalibError::divergence("non-finite reprojection cost"));
    }
    Ok(cost)
}

/// Normal equations of the intrinsics with every view's pose block
/// eliminated: `S = A - Σ Bᵥ Cᵥ⁻¹ Bᵥᵀ`, `g = gₐ - Σ Bᵥ Cᵥ⁻¹ gᵥ`.
fn reduced_normal_equations(
    camera: &FisheyeCamera,
    samples: &[CalibrationSample],
    poses: &[ViewPose],
) -> Result<(IntrinsicMatrix, IntrinsicVector), CalibError> {
    let mut a = IntrinsicMatrix::zeros();
    let mut ga = IntrinsicVector::zeros();
    let mut schur = IntrinsicMatrix::zeros();
    let mut gs = IntrinsicVector::zeros();

    for (sample, pose) in samples.iter().zip(poses) {
        let mut b = SMatrix::<f64, N_INTRINSICS, 6>::zeros();
        let mut c = Matrix6::<f64>::zeros();
        let mut gv = Vector6::<f64>::zeros();
        for (obj, img) in sample.object_points().iter().zip(sample.image_points()) {
            let rx = pose.cam_from_board.rotation * obj.coords;
            let pc = pose.cam_from_board.transform_point(obj);
            let (uv, j_int, j_pt) = project_with_jacobians(camera, &pc)
                .ok_or_else(|| CalibError::divergence("board point projects behind the camera"))?;
            let j_pose = pose_jacobian(&j_pt, &rx);
            let r: Vector2<f64> = uv - img;

            a += j_int.transpose() * j_int;
            ga += j_int.transpose() * r;
            b += j_int.transpose() * j_pose;
            c += j_pose.transpose() * j_pose;
            gv += j_pose.transpose() * r;
        }
        let c_inv = c
            .try_inverse()
            .ok_or_else(|| CalibError::divergence("singular pose block in normal equations"))?;
        let bc = b * c_inv;
        schur += bc * b.transpose();
        gs += bc * gv;
    }

    let s = a - schur;
    let rhs = ga - gs;
    if !s.iter().chain(rhs.iter()).all(|v| v.is_finite()) {
        return Err(CalibError::divergence("non-finite normal equations"));
    }
    Ok((s, rhs))
}

/// Reject rank-deficient problems, e.g. views that carry no independent
/// information about the intrinsics.
fn check_conditioning(s: &IntrinsicMatrix) -> Result<(), CalibError> {
    let diag = s.diagonal();
    if diag.iter().any(|&d| !d.is_finite() || d <= 0.0) {
        return Err(CalibError::divergence("normal equations are rank deficient"));
    }
    let inv_sqrt = diag.map(|d| 1.0 / d.sqrt());
    let scaled = IntrinsicMatrix::from_fn(|i, j| s[(i, j)] * inv_sqrt[i] * inv_sqrt[j]);
    let eig = scaled.symmetric_eigenvalues();
    let max = eig.iter().fold(0.0f64, |m, &v| m.max(v));
    let min = eig.iter().fold(f64::INFINITY, |m, &v| m.min(v));
    if max <= 0.0 || min / max < MIN_RCOND {
        return Err(CalibError::divergence(format!(
            "normal equations are rank deficient (rcond {:.1e})",
            min / max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fisheye_calib_core::CalibrationTarget;
    use nalgebra::Point2;

    #[test]
    fn initial_guess_follows_image_size() {
        let cam = initial_camera(Resolution::new(640, 480));
        assert_relative_eq!(cam.intrinsics.fx, 640.0 / std::f64::consts::PI);
        assert_relative_eq!(cam.intrinsics.cx, 319.5);
        assert_relative_eq!(cam.intrinsics.cy, 239.5);
        assert_eq!(cam.distortion, FisheyeDistortion::zero());
    }

    #[test]
    fn singular_normal_matrix_is_rejected() {
        let mut s = IntrinsicMatrix::identity();
        s[(7, 7)] = 0.0;
        assert!(check_conditioning(&s).is_err());

        // Two identical columns.
        let mut s = IntrinsicMatrix::identity();
        s[(0, 1)] = 1.0;
        s[(1, 0)] = 1.0;
        assert!(check_conditioning(&s).is_err());

        assert!(check_conditioning(&IntrinsicMatrix::identity()).is_ok());
    }

    #[test]
    fn no_samples_is_insufficient() {
        let err = FisheyeCalibrationSolver::default()
            .solve(&[], Resolution::new(640, 480))
            .unwrap_err();
        assert!(matches!(
            err,
            CalibError::InsufficientSamples { required: 1, got: 0 }
        ));
    }

    #[test]
    fn collapsed_views_diverge() {
        let target = CalibrationTarget::default();
        let sample = CalibrationSample::new(&target, vec![Point2::new(300.0, 200.0); 54]).unwrap();
        let err = FisheyeCalibrationSolver::default()
            .solve(&vec![sample; 5], Resolution::new(640, 480))
            .unwrap_err();
        assert!(matches!(err, CalibError::SolverDivergence { .. }), "{err}");
    }
}
