//! Checkerboard corner detector for fisheye calibration.
//!
//! ## Quickstart
//!
//! ```
//! use fisheye_calib_chessboard::CornerDetector;
//! use fisheye_calib_core::{CalibError, CalibrationTarget, GrayImage};
//!
//! let img = GrayImage::new(64, 48);
//! let detector = CornerDetector::default();
//! let result = detector.detect(&img.view(), &CalibrationTarget::default());
//! assert!(matches!(result, Err(CalibError::NoCornersFound)));
//! ```
//!
//! Pipeline:
//! 1. Stretch the frame's contrast; reject frames without any.
//! 2. Dense 16-sample ring response, NMS, and an X-junction test against the
//!    local adaptive threshold.
//! 3. Link candidates whose light diagonals are swapped and whose connecting
//!    edge runs at ~45° to both (kd-tree neighbour search).
//! 4. BFS each component, carrying local grid axes so labelling survives lens
//!    distortion; keep a component that matches the target exactly.
//! 5. Pick the canonical labelling and refine every corner to sub-pixel.

mod detector;
mod gridgraph;
mod params;
mod response;
mod subpix;

pub use detector::CornerDetector;
pub use gridgraph::{assign_grid_coordinates, connected_components, GridGraph, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams, SubPixParams};
pub use response::{find_candidates, normalize_contrast, Corner, ResponseMap};
pub use subpix::refine_corner;
