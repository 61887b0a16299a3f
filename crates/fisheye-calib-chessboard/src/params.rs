use serde::{Deserialize, Serialize};

/// Neighbour search between candidate corners.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    /// Tolerance on corner orientations (orthogonality, 45° edge relation).
    pub orientation_tolerance_deg: f32,
    /// Tolerance between an edge and the local grid axis it is assigned to.
    pub axis_tolerance_deg: f32,
    /// Maximum length ratio between consecutive steps along the same axis.
    pub max_step_ratio: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 6.0,
            max_spacing_pix: 200.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
            axis_tolerance_deg: 30.0,
            max_step_ratio: 1.8,
        }
    }
}

/// Iterative sub-pixel refinement around each coarse corner.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half-size of the search window; the window is `2 * half_window + 1` wide.
    pub half_window: u32,
    pub max_iters: u32,
    /// Stop once a refinement step moves the corner less than this (pixels).
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 3,
            max_iters: 30,
            epsilon: 0.1,
        }
    }
}

/// Parameters of the checkerboard corner detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Radius of the 16-sample ring used for the corner response.
    pub ring_radius: u32,
    /// Relative response threshold as a fraction of the frame maximum.
    pub threshold_rel: f32,
    /// Non-maximum suppression radius (in pixels).
    pub nms_radius: u32,
    /// Minimum count of positive-response neighbours in the NMS window.
    pub min_cluster_size: u32,
    /// Frames whose robust intensity range is below this are rejected early.
    pub min_contrast: u8,
    /// Half-size of the box used for the local (adaptive) threshold.
    pub adaptive_block_radius: u32,
    /// Subtracted from the local mean before binarising the ring.
    pub adaptive_offset: f32,
    pub graph: GridGraphParams,
    pub subpix: SubPixParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            ring_radius: 5,
            threshold_rel: 0.05,
            nms_radius: 3,
            min_cluster_size: 2,
            min_contrast: 20,
            adaptive_block_radius: 7,
            adaptive_offset: 0.0,
            graph: GridGraphParams::default(),
            subpix: SubPixParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let params: ChessboardParams =
            serde_json::from_str(r#"{ "nms_radius": 4, "subpix": { "max_iters": 10 } }"#).unwrap();
        assert_eq!(params.nms_radius, 4);
        assert_eq!(params.subpix.max_iters, 10);
        assert_eq!(params.subpix.half_window, 3);
        assert_eq!(params.ring_radius, 5);
    }
}
