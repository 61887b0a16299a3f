use crate::CalibError;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Interior-corner layout of the physical checkerboard.
///
/// Corner `k` of a detection sits at grid cell `(k % cols, k / cols)`; the
/// matching object point is that cell on the plane `z = 0` with unit spacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationTarget {
    pub rows: usize,
    pub cols: usize,
}

impl Default for CalibrationTarget {
    fn default() -> Self {
        Self { rows: 6, cols: 9 }
    }
}

impl CalibrationTarget {
    pub fn new(rows: usize, cols: usize) -> Result<Self, CalibError> {
        if rows < 2 || cols < 2 {
            return Err(CalibError::ShapeMismatch {
                what: "target interior corners per side (min 2)",
                expected: 2,
                got: rows.min(cols),
            });
        }
        Ok(Self { rows, cols })
    }

    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Canonical object points in row-major scan order.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let mut pts = Vec::with_capacity(self.corner_count());
        for r in 0..self.rows {
            for c in 0..self.cols {
                pts.push(Point3::new(c as f64, r as f64, 0.0));
            }
        }
        pts
    }
}

/// One successful detection paired with the canonical board.
///
/// Either every corner is present or the sample does not exist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    object_points: Vec<Point3<f64>>,
    image_points: Vec<Point2<f64>>,
}

impl CalibrationSample {
    pub fn new(target: &CalibrationTarget, image_points: Vec<Point2<f64>>) -> Result<Self, CalibError> {
        if image_points.len() != target.corner_count() {
            return Err(CalibError::ShapeMismatch {
                what: "sample image points",
                expected: target.corner_count(),
                got: image_points.len(),
            });
        }
        Ok(Self {
            object_points: target.object_points(),
            image_points,
        })
    }

    pub fn object_points(&self) -> &[Point3<f64>] {
        &self.object_points
    }

    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.image_points
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}
