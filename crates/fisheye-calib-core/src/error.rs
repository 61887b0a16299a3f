use crate::Resolution;

/// Errors shared by every stage of the calibration and rectification pipeline.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    /// The checkerboard was not (fully) found in a frame. Recoverable.
    #[error("chessboard corners not found")]
    NoCornersFound,

    #[error("insufficient calibration samples (need >= {required}, got {got})")]
    InsufficientSamples { required: usize, got: usize },

    #[error("fisheye solver diverged: {reason}")]
    SolverDivergence { reason: String },

    #[error("malformed calibration artifact: {0}")]
    ArtifactFormat(String),

    #[error("resolution mismatch (expected {expected}, got {got})")]
    ResolutionMismatch { expected: Resolution, got: Resolution },

    #[error("shape mismatch for {what} (expected {expected}, got {got})")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CalibError {
    pub fn divergence(reason: impl Into<String>) -> Self {
        Self::SolverDivergence {
            reason: reason.into(),
        }
    }

    /// Whether the accumulation loop may skip this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoCornersFound)
    }
}
