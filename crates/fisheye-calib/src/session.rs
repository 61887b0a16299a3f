//! Capture → detect → accumulate → solve → persist.
//!
//! A [`CalibrationSession`] moves through
//! `Idle → Accumulating → Solving → Ready | Failed`. The frame source is held
//! through accumulation and solving and released on every exit path; the
//! artifact is written only after a successful solve.
//!
//! Samples are separated by the capture interval alone. Nothing checks that
//! consecutive views actually show different board poses, so a board held
//! still produces near-duplicate samples; the solver only refuses a set that
//! shows fewer than two distinct poses.
//!
//! When the frame source runs dry before the target count is reached, the
//! session solves with what it has (at least one sample) instead of failing.

use crate::chessboard::{ChessboardParams, CornerDetector};
use crate::core::{CalibError, CalibrationSample, CalibrationTarget, Resolution};
use crate::detect::{detect_chessboard, prepare_gray};
use crate::optim::{FisheyeCalibration, FisheyeCalibrationSolver, SolverParams};
use crate::source::{CaptureGuard, FrameSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How many samples to collect and how far apart to take them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorParams {
    pub target_samples: usize,
    /// Delay between capture attempts, in milliseconds. The first capture
    /// happens immediately; the delay precedes every later one.
    pub capture_interval_ms: u64,
}

impl Default for AccumulatorParams {
    fn default() -> Self {
        Self {
            target_samples: 100,
            capture_interval_ms: 2000,
        }
    }
}

impl AccumulatorParams {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}

/// Collects detected samples until the target count is reached.
///
/// Frames without a full board are counted as attempts and otherwise
/// ignored. All frames must share the resolution of the first one offered.
#[derive(Clone, Debug)]
pub struct SampleAccumulator {
    target: CalibrationTarget,
    detector: CornerDetector,
    target_samples: usize,
    samples: Vec<CalibrationSample>,
    resolution: Option<Resolution>,
    attempts: usize,
}

impl SampleAccumulator {
    pub fn new(target: CalibrationTarget, detector: CornerDetector, target_samples: usize) -> Self {
        Self {
            target,
            detector,
            target_samples,
            samples: Vec::with_capacity(target_samples),
            resolution: None,
            attempts: 0,
        }
    }

    /// Detect the board in `gray`. Returns whether a sample was added.
    pub fn offer(&mut self, gray: &image::GrayImage) -> Result<bool, CalibError> {
        let size = Resolution::new(gray.width(), gray.height());
        match self.resolution {
            Some(expected) if expected != size => {
                return Err(CalibError::ResolutionMismatch {
                    expected,
                    got: size,
                });
            }
            Some(_) => {}
            None => self.resolution = Some(size),
        }
        self.attempts += 1;

        match detect_chessboard(gray, &self.detector, &self.target) {
            Ok(sample) => {
                self.samples.push(sample);
                log::info!("progress: {}/{} samples", self.samples.len(), self.target_samples);
                Ok(true)
            }
            Err(err) if err.is_recoverable() => {
                log::debug!("attempt {}: {err}", self.attempts);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.target_samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<CalibrationSample> {
        self.samples
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Accumulating { collected: usize },
    Solving,
    Ready,
    Failed,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Calib(#[from] CalibError),
    #[error("calibration cancelled after {collected} samples")]
    Cancelled { collected: usize },
}

/// Requests a running session to stop before its next capture.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a successful session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub calibration: FisheyeCalibration,
    pub output_path: PathBuf,
    /// Frames examined, including the ones without a board.
    pub attempts: usize,
}

/// One calibration run from first capture to persisted artifact.
#[derive(Debug)]
pub struct CalibrationSession {
    target: CalibrationTarget,
    detector: CornerDetector,
    solver: FisheyeCalibrationSolver,
    accumulator: AccumulatorParams,
    rotate_180: bool,
    output_path: PathBuf,
    state: SessionState,
    cancel: CancelHandle,
}

impl CalibrationSession {
    pub fn new(target: CalibrationTarget, output_path: impl Into<PathBuf>) -> Self {
        Self {
            target,
            detector: CornerDetector::default(),
            solver: FisheyeCalibrationSolver::default(),
            accumulator: AccumulatorParams::default(),
            rotate_180: false,
            output_path: output_path.into(),
            state: SessionState::Idle,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_detector_params(mut self, params: ChessboardParams) -> Self {
        self.detector = CornerDetector::new(params);
        self
    }

    pub fn with_solver_params(mut self, params: SolverParams) -> Self {
        self.solver = FisheyeCalibrationSolver::new(params);
        self
    }

    pub fn with_accumulator(mut self, params: AccumulatorParams) -> Self {
        self.accumulator = params;
        self
    }

    /// Rotate every frame by 180° before use (sensor mounted upside down).
    pub fn with_rotate_180(mut self, rotate_180: bool) -> Self {
        self.rotate_180 = rotate_180;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &CalibrationTarget {
        &self.target
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the whole session against `source`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip_all, fields(rows = self.target.rows, cols = self.target.cols))
    )]
    pub fn run<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Result<SessionReport, SessionError> {
        self.state = SessionState::Idle;
        let result = self.run_inner(source);
        self.state = match &result {
            Ok(_) => SessionState::Ready,
            Err(err) => {
                log::error!("calibration failed: {err}");
                SessionState::Failed
            }
        };
        result
    }

    fn run_inner<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Result<SessionReport, SessionError> {
        let mut guard = CaptureGuard::acquire(source)?;
        self.state = SessionState::Accumulating { collected: 0 };

        let mut acc = SampleAccumulator::new(self.target, self.detector.clone(), self.accumulator.target_samples);
        let interval = self.accumulator.capture_interval();
        log::info!(
            "collecting {} samples of a {}x{} board",
            self.accumulator.target_samples,
            self.target.rows,
            self.target.cols
        );
        while !acc.is_complete() {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled { collected: acc.len() });
            }
            if acc.attempts() > 0 && !interval.is_zero() {
                std::thread::sleep(interval);
            }
            let Some(frame) = guard.capture()? else {
                log::warn!(
                    "frame source exhausted with {}/{} samples",
                    acc.len(),
                    self.accumulator.target_samples
                );
                break;
            };
            acc.offer(&prepare_gray(&frame, self.rotate_180))?;
            self.state = SessionState::Accumulating { collected: acc.len() };
        }

        self.state = SessionState::Solving;
        let attempts = acc.attempts();
        let resolution = acc.resolution();
        let calibration = self.solve_and_persist(&acc.into_samples(), resolution)?;
        drop(guard);

        Ok(SessionReport {
            calibration,
            output_path: self.output_path.clone(),
            attempts,
        })
    }

    /// Solve and write the artifact; nothing is written on failure.
    fn solve_and_persist(
        &self,
        samples: &[CalibrationSample],
        resolution: Option<Resolution>,
    ) -> Result<FisheyeCalibration, CalibError> {
        let Some(resolution) = resolution.filter(|_| !samples.is_empty()) else {
            return Err(CalibError::InsufficientSamples {
                required: 1,
                got: 0,
            });
        };
        let calibration = self.solver.solve(samples, resolution)?;
        let artifact = &calibration.artifact;
        log::info!(
            "calibrated {} from {} views, rms {:.4} px",
            resolution,
            samples.len(),
            artifact.rms()
        );
        artifact.write_json(&self.output_path)?;
        log::info!("wrote {}", self.output_path.display());
        Ok(calibration)
    }
}
