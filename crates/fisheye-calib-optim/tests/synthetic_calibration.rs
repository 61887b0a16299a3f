use fisheye_calib_core::synthetic::{board_pose, project_sample, varied_board_poses, UniformPixelNoise};
use fisheye_calib_core::{
    CalibError, CalibrationSample, CalibrationTarget, FisheyeCamera, FisheyeDistortion,
    FisheyeIntrinsics, Resolution,
};
use fisheye_calib_optim::{distinct_view_count, FisheyeCalibrationSolver, SolverParams};
use nalgebra::{Isometry3, Vector3};

const RES: Resolution = Resolution::new(640, 480);

fn ground_truth() -> FisheyeCamera {
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

fn make_samples(count: usize, noise: UniformPixelNoise, seed: u64) -> Vec<CalibrationSample> {
    let target = CalibrationTarget::default();
    let camera = ground_truth();
    let samples: Vec<_> = varied_board_poses(&target, count * 4, seed)
        .iter()
        .enumerate()
        .filter_map(|(i, pose)| project_sample(&camera, pose, &target, RES, 8.0, &noise, i))
        .take(count)
        .collect();
    assert_eq!(samples.len(), count, "not enough visible synthetic views");
    samples
}

#[test]
fn hundred_noisy_views_recover_intrinsics() {
    let noise = UniformPixelNoise {
        seed: 42,
        max_abs_px: 0.2,
    };
    let samples = make_samples(100, noise, 7);

    let calib = FisheyeCalibrationSolver::default()
        .solve(&samples, RES)
        .expect("calibration should succeed");
    let artifact = &calib.artifact;
    let k = artifact.k();
    let gt = ground_truth();

    assert_eq!(artifact.resolution(), RES);
    assert_eq!(calib.views.len(), samples.len());
    assert!(artifact.rms() >= 0.0 && artifact.rms() < 1.0, "rms {}", artifact.rms());
    // Uniform ±0.2 px noise has a per-point rms of about 0.16 px.
    assert!(artifact.rms() < 0.3, "rms {}", artifact.rms());
    assert!(calib.report.initial_rms > artifact.rms());

    // Square-ish pixels.
    assert!(((k[(0, 0)] - k[(1, 1)]) / k[(1, 1)]).abs() < 0.05);
    assert!((k[(0, 0)] - gt.intrinsics.fx).abs() / gt.intrinsics.fx < 0.01);
    assert!((k[(1, 1)] - gt.intrinsics.fy).abs() / gt.intrinsics.fy < 0.01);
    assert!((k[(0, 2)] - gt.intrinsics.cx).abs() < 2.0);
    assert!((k[(1, 2)] - gt.intrinsics.cy).abs() < 2.0);
    assert_eq!(k[(0, 1)], 0.0);
    assert!((artifact.d()[0] - gt.distortion.k[0]).abs() < 0.02);
    assert!(k.iter().chain(artifact.d().iter()).all(|v| v.is_finite()));
}

#[test]
fn noise_free_views_are_fit_exactly() {
    let samples = make_samples(12, UniformPixelNoise::default(), 3);
    let calib = FisheyeCalibrationSolver::default()
        .solve(&samples, RES)
        .expect("calibration should succeed");
    let intr = calib.artifact.intrinsics();
    let gt = ground_truth().intrinsics;
    assert!(calib.artifact.rms() < 1e-3, "rms {}", calib.artifact.rms());
    assert!((intr.fx - gt.fx).abs() < 0.05);
    assert!((intr.fy - gt.fy).abs() < 0.05);
    assert!((intr.cx - gt.cx).abs() < 0.05);
    assert!((intr.cy - gt.cy).abs() < 0.05);
    assert!(calib.report.converged);
}

#[test]
fn iteration_cap_is_not_a_failure() {
    let samples = make_samples(10, UniformPixelNoise::default(), 5);
    let solver = FisheyeCalibrationSolver::new(SolverParams {
        max_iters: 1,
        ..SolverParams::default()
    });
    let calib = solver.solve(&samples, RES).expect("one iteration still yields a result");
    assert_eq!(calib.report.iterations, 1);
    assert!(calib.artifact.rms().is_finite());
}

#[test]
fn zero_samples_are_rejected_before_solving() {
    assert!(matches!(
        FisheyeCalibrationSolver::default().solve(&[], RES),
        Err(CalibError::InsufficientSamples { got: 0, .. })
    ));
}

fn view_at(pose: &Isometry3<f64>, noise: UniformPixelNoise, view_idx: usize) -> CalibrationSample {
    project_sample(
        &ground_truth(),
        pose,
        &CalibrationTarget::default(),
        RES,
        8.0,
        &noise,
        view_idx,
    )
    .expect("board fully visible")
}

fn assert_diverges(samples: &[CalibrationSample]) {
    let err = FisheyeCalibrationSolver::default().solve(samples, RES).unwrap_err();
    assert!(matches!(err, CalibError::SolverDivergence { .. }), "{err}");
}

#[test]
fn repeated_single_view_is_rejected() {
    let target = CalibrationTarget::default();
    let fronto = board_pose(&target, 0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 10.0));
    let tilted = board_pose(&target, 0.3, -0.25, 0.1, Vector3::new(0.5, 0.3, 10.0));
    for pose in [fronto, tilted] {
        let view = view_at(&pose, UniformPixelNoise::default(), 0);
        assert_diverges(&vec![view; 20]);
    }
}

#[test]
fn jittered_copies_of_one_view_are_rejected() {
    let target = CalibrationTarget::default();
    let pose = board_pose(&target, 0.3, -0.25, 0.1, Vector3::new(0.5, 0.3, 10.0));
    let noise = UniformPixelNoise {
        seed: 9,
        max_abs_px: 0.2,
    };
    let samples: Vec<_> = (0..20).map(|i| view_at(&pose, noise, i)).collect();
    assert_eq!(distinct_view_count(&samples), 1);
    assert_diverges(&samples);
}

#[test]
fn parallel_board_planes_are_rejected() {
    let target = CalibrationTarget::default();
    let samples: Vec<_> = [
        (0.0, 0.0, 10.0),
        (2.0, 1.0, 9.0),
        (-2.0, -1.0, 12.0),
        (1.0, -1.5, 11.0),
        (-1.5, 1.0, 8.0),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(x, y, z))| {
        let pose = board_pose(&target, 0.0, 0.0, 0.0, Vector3::new(x, y, z));
        view_at(&pose, UniformPixelNoise::default(), i)
    })
    .collect();
    assert_eq!(distinct_view_count(&samples), samples.len());
    assert_diverges(&samples);
}

#[test]
fn varied_views_count_as_distinct() {
    let samples = make_samples(12, UniformPixelNoise::default(), 3);
    assert_eq!(distinct_view_count(&samples), 12);
}
