//! JSON configuration of a calibration run.

use crate::chessboard::ChessboardParams;
use crate::core::{CalibError, CalibrationTarget};
use crate::optim::SolverParams;
use crate::session::{AccumulatorParams, CalibrationSession};
use crate::source::ImageDirSource;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_OUTPUT_PATH: &str = "calibration_data.json";

fn default_rotate_180() -> bool {
    true
}

/// Configuration for `fisheye-calib calibrate`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrateConfig {
    /// Directory of frames to play back.
    #[serde(default)]
    pub frames_dir: Option<String>,
    #[serde(default)]
    pub target: CalibrationTarget,
    #[serde(default)]
    pub accumulator: AccumulatorParams,
    #[serde(default)]
    pub detector: ChessboardParams,
    #[serde(default)]
    pub solver: SolverParams,
    #[serde(default)]
    pub output_path: Option<String>,
    /// Frames come from a sensor mounted upside down.
    #[serde(default = "default_rotate_180")]
    pub rotate_180: bool,
}

impl Default for CalibrateConfig {
    fn default() -> Self {
        Self {
            frames_dir: None,
            target: CalibrationTarget::default(),
            accumulator: AccumulatorParams::default(),
            detector: ChessboardParams::default(),
            solver: SolverParams::default(),
            output_path: None,
            rotate_180: default_rotate_180(),
        }
    }
}

impl CalibrateConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the artifact path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH))
    }

    /// Build a session, validating the target geometry.
    pub fn build_session(&self) -> Result<CalibrationSession, CalibError> {
        let target = CalibrationTarget::new(self.target.rows, self.target.cols)?;
        Ok(CalibrationSession::new(target, self.output_path())
            .with_detector_params(self.detector.clone())
            .with_solver_params(self.solver.clone())
            .with_accumulator(self.accumulator.clone())
            .with_rotate_180(self.rotate_180))
    }

    /// Open the configured frames directory.
    pub fn frame_source(&self) -> Result<ImageDirSource, CalibError> {
        let dir = self
            .frames_dir
            .as_deref()
            .ok_or_else(|| CalibError::Capture("no frames directory configured".to_string()))?;
        ImageDirSource::open(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_rig_defaults() {
        let cfg: CalibrateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, CalibrateConfig::default());
        assert_eq!(cfg.target, CalibrationTarget { rows: 6, cols: 9 });
        assert!(cfg.rotate_180);
        assert_eq!(cfg.output_path(), PathBuf::from("calibration_data.json"));
        assert_eq!(cfg.accumulator.target_samples, 100);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg: CalibrateConfig = serde_json::from_str(
            r#"{
                "frames_dir": "frames",
                "target": {"rows": 7, "cols": 10},
                "accumulator": {"target_samples": 20},
                "rotate_180": false
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.accumulator.target_samples, 20);
        assert_eq!(cfg.accumulator.capture_interval_ms, 2000);
        assert_eq!(cfg.solver, SolverParams::default());
        let session = cfg.build_session().unwrap();
        assert_eq!(*session.target(), CalibrationTarget { rows: 7, cols: 10 });
    }

    #[test]
    fn degenerate_target_is_rejected() {
        let cfg = CalibrateConfig {
            target: CalibrationTarget { rows: 1, cols: 9 },
            ..CalibrateConfig::default()
        };
        assert!(matches!(cfg.build_session(), Err(CalibError::ShapeMismatch { .. })));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibrate.json");
        let cfg = CalibrateConfig {
            frames_dir: Some("captures".to_string()),
            output_path: Some("out/calib.json".to_string()),
            ..CalibrateConfig::default()
        };
        cfg.write_json(&path).unwrap();
        assert_eq!(CalibrateConfig::load_json(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_frames_dir_is_a_capture_error() {
        assert!(matches!(
            CalibrateConfig::default().frame_source(),
            Err(CalibError::Capture(_))
        ));
    }
}
