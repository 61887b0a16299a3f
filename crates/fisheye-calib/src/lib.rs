//! High-level facade crate for the `fisheye-calib-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the camera model, detector, solver and undistortion
//!   crates
//! - `image` adapters and a [`FrameSource`] abstraction with scoped device
//!   ownership
//! - the [`CalibrationSession`] that turns a stream of frames into a persisted
//!   [`CalibrationArtifact`](core::CalibrationArtifact)
//! - the `fisheye-calib` command line tool (feature `cli`)
//!
//! ## Quickstart
//!
//! ```no_run
//! use fisheye_calib::{CalibrationSession, ImageDirSource};
//! use fisheye_calib::core::CalibrationTarget;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut frames = ImageDirSource::open("captures")?;
//! let mut session = CalibrationSession::new(CalibrationTarget::default(), "calibration_data.json")
//!     .with_rotate_180(true);
//! let report = session.run(&mut frames)?;
//! println!("rms {:.3} px", report.calibration.artifact.rms());
//! # Ok(())
//! # }
//! ```
//!
//! Rectifying frames later only needs the artifact:
//!
//! ```no_run
//! use fisheye_calib::core::CalibrationArtifact;
//! use fisheye_calib::undistort::Rectifier;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let artifact = CalibrationArtifact::load_json("calibration_data.json")?;
//! let mut rectifier = Rectifier::new(artifact);
//! let frame = image::open("frame.png")?.to_rgb8();
//! rectifier.rectify(&frame)?.save("rectified.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fisheye_calib::core`: camera model, target geometry, artifact, errors.
//! - `fisheye_calib::chessboard`: checkerboard corner detection.
//! - `fisheye_calib::optim`: fisheye intrinsic calibration.
//! - `fisheye_calib::undistort`: undistortion maps, remapping and caching.
//! - `fisheye_calib::detect`: helpers from `image` buffers.

pub use fisheye_calib_chessboard as chessboard;
pub use fisheye_calib_core as core;
pub use fisheye_calib_optim as optim;
pub use fisheye_calib_undistort as undistort;

pub use fisheye_calib_chessboard::{ChessboardParams, CornerDetector};
pub use fisheye_calib_core::{CalibError, CalibrationArtifact, CalibrationTarget, Resolution};
pub use fisheye_calib_optim::{FisheyeCalibrationSolver, SolverParams};

pub mod config;
pub mod detect;
pub mod session;
pub mod source;

pub use config::CalibrateConfig;
pub use session::{
    AccumulatorParams, CalibrationSession, CancelHandle, SampleAccumulator, SessionError, SessionReport,
    SessionState,
};
pub use source::{CaptureGuard, FrameSource, ImageDirSource};
