//! Fisheye intrinsic calibration from planar checkerboard samples.
//!
//! The solver estimates `K` (zero skew) and the four equidistant distortion
//! coefficients by minimising pixel reprojection error over all samples.
//! Each view's pose is recomputed from the current intrinsics on every
//! iteration rather than carried along as a free parameter.
//!
//! Sample sets that show fewer than [`MIN_DISTINCT_VIEWS`] board poses, or
//! whose reduced normal equations are numerically rank deficient (e.g. all
//! boards parallel to the image plane), fail with `SolverDivergence`.
//!
//! ```no_run
//! use fisheye_calib_core::{CalibrationSample, Resolution};
//! use fisheye_calib_optim::FisheyeCalibrationSolver;
//!
//! # fn samples() -> Vec<CalibrationSample> { Vec::new() }
//! let solver = FisheyeCalibrationSolver::default();
//! match solver.solve(&samples(), Resolution::new(640, 480)) {
//!     Ok(calib) => println!("rms {:.3} px", calib.artifact.rms()),
//!     Err(e) => eprintln!("calibration failed: {e}"),
//! }
//! ```

mod model;
mod params;
mod pose;
mod solver;

pub use model::{pack, project_with_jacobians, unpack, IntrinsicJacobian, IntrinsicVector, N_INTRINSICS};
pub use params::SolverParams;
pub use pose::{estimate_view_pose, init_view_pose, pose_from_homography, refine_view_pose, view_cost, ViewPose};
pub use solver::{
    distinct_view_count, initial_camera, view_separation, FisheyeCalibration, FisheyeCalibrationSolver, SolveReport,
    MIN_DISTINCT_VIEWS, MIN_VIEW_SEPARATION_PX,
};
