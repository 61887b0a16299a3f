//! The persisted calibration result and its JSON record.
//!
//! Record layout (field names are shared with existing consumers):
//!
//! ```json
//! {
//!   "DIM": [640, 480],
//!   "K": [[fx, 0, cx], [0, fy, cy], [0, 0, 1]],
//!   "D": [k1, k2, k3, k4],
//!   "rms": 0.21
//! }
//! ```
//!
//! `D` is also accepted as a nested 4×1 list (`[[k1], [k2], [k3], [k4]]`).

use crate::{CalibError, FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics, Resolution};
use nalgebra::{Matrix3, Vector4};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Calibrated camera at a fixed resolution. Never mutated; scaling produces a copy.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationArtifact {
    resolution: Resolution,
    k: Matrix3<f64>,
    d: Vector4<f64>,
    rms: f64,
}

impl CalibrationArtifact {
    pub fn new(
        resolution: Resolution,
        intrinsics: FisheyeIntrinsics,
        distortion: FisheyeDistortion,
        rms: f64,
    ) -> Result<Self, CalibError> {
        if resolution.is_empty() {
            return Err(CalibError::ArtifactFormat(format!(
                "resolution must be non-empty, got {resolution}"
            )));
        }
        // Round-trip through the checked matrix constructor.
        let intrinsics = FisheyeIntrinsics::from_matrix(&intrinsics.matrix())?;
        if !distortion.is_finite() || !rms.is_finite() || rms < 0.0 {
            return Err(CalibError::ArtifactFormat(
                "distortion and rms must be finite (rms >= 0)".to_string(),
            ));
        }
        Ok(Self {
            resolution,
            k: intrinsics.matrix(),
            d: distortion.k,
            rms,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn k(&self) -> &Matrix3<f64> {
        &self.k
    }

    pub fn d(&self) -> &Vector4<f64> {
        &self.d
    }

    /// Reprojection RMS (pixels) of the run that produced this artifact.
    pub fn rms(&self) -> f64 {
        self.rms
    }

    pub fn intrinsics(&self) -> FisheyeIntrinsics {
        FisheyeIntrinsics {
            fx: self.k[(0, 0)],
            fy: self.k[(1, 1)],
            cx: self.k[(0, 2)],
            cy: self.k[(1, 2)],
        }
    }

    pub fn distortion(&self) -> FisheyeDistortion {
        FisheyeDistortion { k: self.d }
    }

    pub fn camera(&self) -> FisheyeCamera {
        FisheyeCamera::new(self.intrinsics(), self.distortion())
    }

    /// Adapt the artifact to another operating resolution.
    ///
    /// Focal lengths and principal point scale per axis; `D` is kept as is.
    /// This is exact only when the aspect ratio is preserved. Otherwise the
    /// distortion coefficients would need refitting, which is not modelled.
    pub fn scaled_to(&self, target: Resolution) -> Result<Self, CalibError> {
        if target.is_empty() {
            return Err(CalibError::ResolutionMismatch {
                expected: self.resolution,
                got: target,
            });
        }
        if target == self.resolution {
            return Ok(self.clone());
        }
        let src = self.resolution;
        let sx = target.width as f64 / src.width as f64;
        let sy = target.height as f64 / src.height as f64;
        if (src.aspect_ratio() - target.aspect_ratio()).abs() > 1e-6 {
            log::warn!(
                "scaling intrinsics {} -> {} changes aspect ratio; distortion is not refit",
                src,
                target
            );
        }
        let intrinsics = self.intrinsics().scaled(sx, sy);
        Ok(Self {
            resolution: target,
            k: intrinsics.matrix(),
            d: self.d,
            rms: self.rms,
        })
    }

    pub fn to_json(&self) -> Result<String, CalibError> {
        serde_json::to_string_pretty(&ArtifactRecord::from(self))
            .map_err(|e| CalibError::ArtifactFormat(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CalibError> {
        let record: ArtifactRecord =
            serde_json::from_str(raw).map_err(|e| CalibError::ArtifactFormat(e.to_string()))?;
        Self::try_from(record)
    }

    /// Load an artifact record from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write this artifact to disk as pretty JSON.
    ///
    /// The record goes to a sibling temp file first and is renamed into
    /// place, so readers never observe a half-written artifact.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let written = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, path));
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DistortionRecord {
    Flat(Vec<f64>),
    Column(Vec<[f64; 1]>),
}

impl DistortionRecord {
    fn into_values(self) -> Vec<f64> {
        match self {
            Self::Flat(v) => v,
            Self::Column(v) => v.into_iter().map(|[x]| x).collect(),
        }
    }
}

/// On-disk shape of [`CalibrationArtifact`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactRecord {
    #[serde(rename = "DIM")]
    dim: [u32; 2],
    #[serde(rename = "K")]
    k: [[f64; 3]; 3],
    #[serde(rename = "D")]
    d: DistortionRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rms: Option<f64>,
}

impl From<&CalibrationArtifact> for ArtifactRecord {
    fn from(a: &CalibrationArtifact) -> Self {
        let k = a.k;
        Self {
            dim: [a.resolution.width, a.resolution.height],
            k: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            d: DistortionRecord::Flat(a.d.iter().copied().collect()),
            rms: Some(a.rms),
        }
    }
}

impl TryFrom<ArtifactRecord> for CalibrationArtifact {
    type Error = CalibError;

    fn try_from(r: ArtifactRecord) -> Result<Self, Self::Error> {
        let k = Matrix3::from_row_slice(&[
            r.k[0][0], r.k[0][1], r.k[0][2], //
            r.k[1][0], r.k[1][1], r.k[1][2], //
            r.k[2][0], r.k[2][1], r.k[2][2],
        ]);
        let intrinsics = FisheyeIntrinsics::from_matrix(&k)?;
        let values = r.d.into_values();
        let distortion = FisheyeDistortion::from_slice(&values).map_err(|_| {
            CalibError::ArtifactFormat(format!("D must have exactly 4 entries, got {}", values.len()))
        })?;
        Self::new(
            Resolution::new(r.dim[0], r.dim[1]),
            intrinsics,
            distortion,
            r.rms.unwrap_or(0.0),
        )
    }
}
