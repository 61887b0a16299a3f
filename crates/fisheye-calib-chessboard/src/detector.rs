use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;
use crate::response::{find_candidates, normalize_contrast, Corner};
use crate::subpix::refine_corner;
use fisheye_calib_core::{CalibError, CalibrationSample, CalibrationTarget, GrayImageView};
use log::debug;
use nalgebra::Point2;
use std::collections::HashMap;

/// Checkerboard corner detector.
///
/// Output is either the full, canonically ordered list of interior corners
/// or [`CalibError::NoCornersFound`]; partial boards are never returned.
#[derive(Clone, Debug, Default)]
pub struct CornerDetector {
    pub params: ChessboardParams,
}

impl CornerDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Sub-pixel interior corners in row-major target order.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "info",
            skip(self, img),
            fields(width = img.width, height = img.height, rows = target.rows, cols = target.cols)
        )
    )]
    pub fn detect(
        &self,
        img: &GrayImageView<'_>,
        target: &CalibrationTarget,
    ) -> Result<Vec<Point2<f64>>, CalibError> {
        let Some(normalized) = normalize_contrast(img, self.params.min_contrast) else {
            debug!("frame has no usable contrast");
            return Err(CalibError::NoCornersFound);
        };
        let candidates = find_candidates(&normalized.view(), &self.params);
        let expected = target.corner_count();
        debug!("{} X-junction candidates (need {})", candidates.len(), expected);
        if candidates.len() < expected {
            return Err(CalibError::NoCornersFound);
        }

        let graph = GridGraph::new(&candidates, &self.params.graph);
        let mut components = connected_components(&graph);
        components.retain(|c| c.len() == expected);

        for component in &components {
            let Some(coords) =
                assign_grid_coordinates(&candidates, &graph, component, &self.params.graph)
            else {
                continue;
            };
            let Some(order) = canonical_order(&candidates, &coords, target) else {
                debug!(
                    "component of {} corners does not match {}x{}",
                    component.len(),
                    target.rows,
                    target.cols
                );
                continue;
            };
            let corners = order
                .into_iter()
                .map(|k| {
                    let p = refine_corner(img, candidates[k].position, &self.params.subpix);
                    Point2::new(p.x as f64, p.y as f64)
                })
                .collect();
            return Ok(corners);
        }
        Err(CalibError::NoCornersFound)
    }

    /// Detect and pair the corners with the target's object points.
    pub fn detect_sample(
        &self,
        img: &GrayImageView<'_>,
        target: &CalibrationTarget,
    ) -> Result<CalibrationSample, CalibError> {
        let corners = self.detect(img, target)?;
        CalibrationSample::new(target, corners)
    }
}

/// Order grid-labelled corners as `rows × cols`, row-major.
///
/// Among the four rotations of the right-handed labelling that fit the target
/// shape, the one whose first corner is closest to the image origin wins.
fn canonical_order(
    corners: &[Corner],
    coords: &[(usize, i32, i32)],
    target: &CalibrationTarget,
) -> Option<Vec<usize>> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let cells: HashMap<(i32, i32), usize> = coords
        .iter()
        .map(|&(k, i, j)| ((i - min_i, j - min_j), k))
        .collect();
    if cells.len() != target.corner_count() {
        return None;
    }
    let ext_i = cells.keys().map(|c| c.0).max()?;
    let ext_j = cells.keys().map(|c| c.1).max()?;
    let (cols, rows) = (target.cols as i32, target.rows as i32);

    // Each map takes a target cell (c, r) back to the labelled cell.
    type CellMap = fn(i32, i32, i32, i32) -> (i32, i32);
    let rotations: [(CellMap, bool); 4] = [
        (|c, r, _ei, _ej| (c, r), false),
        (|c, r, ei, _ej| (ei - r, c), true),
        (|c, r, ei, ej| (ei - c, ej - r), false),
        (|c, r, _ei, ej| (r, ej - c), true),
    ];

    let mut best: Option<(f32, Vec<usize>)> = None;
    for (map, transposed) in rotations {
        let (w, h) = if transposed {
            (ext_j + 1, ext_i + 1)
        } else {
            (ext_i + 1, ext_j + 1)
        };
        if (w, h) != (cols, rows) {
            continue;
        }
        let mut order = Vec::with_capacity(target.corner_count());
        for r in 0..rows {
            for c in 0..cols {
                order.push(*cells.get(&map(c, r, ext_i, ext_j))?);
            }
        }
        let first = corners[order[0]].position.coords.norm();
        if best.as_ref().is_none_or(|(d, _)| first < *d) {
            best = Some((first, order));
        }
    }
    best.map(|(_, order)| order)
}
