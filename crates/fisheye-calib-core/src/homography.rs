use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector2, Vector3};

type Matrix9 = SMatrix<f64, 9, 9>;
type Vector9 = SVector<f64, 9>;

/// Plane-to-plane projective map, `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity that moves the centroid to the origin and makes the mean
/// distance from it `sqrt(2)`. `None` when all points coincide.
fn conditioning(pts: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = pts.len() as f64;
    let centroid = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let spread = pts.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n;
    if spread <= 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / spread;
    Some(Matrix3::new(
        s, 0.0, -s * centroid.x, //
        0.0, s, -s * centroid.y, //
        0.0, 0.0, 1.0,
    ))
}

fn condition(t: &Matrix3<f64>, p: &Point2<f64>) -> (f64, f64) {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    (v.x, v.y)
}

/// Estimate `H` such that `dst ~ H * src` with the normalized DLT.
///
/// Needs at least 4 correspondences; returns `None` for degenerate input.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let ts = conditioning(src)?;
    let td = conditioning(dst)?;

    // Each correspondence contributes two rows of A; only AᵀA (9×9) is kept.
    let mut ata = Matrix9::zeros();
    for (ps, pd) in src.iter().zip(dst) {
        let (x, y) = condition(&ts, ps);
        let (u, v) = condition(&td, pd);
        let rows = [
            Vector9::from_column_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]),
            Vector9::from_column_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]),
        ];
        for r in &rows {
            ata += r * r.transpose();
        }
    }

    // The solution is the eigenvector of the smallest eigenvalue.
    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.total_cmp(r.1))?;
    let h = eig.eigenvectors.column(min_idx);
    let hn = Matrix3::from_fn(|r, c| h[3 * r + c]);

    let full = td.try_inverse()? * hn * ts;
    let scale = full[(2, 2)];
    if scale.abs() < 1e-12 || !full.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Homography::new(full / scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.2, 0.1, 5.0, //
            -0.05, 0.9, 3.0, //
            0.001, 0.0005, 1.0,
        ));
        let inv = h.inverse().expect("invertible");

        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(50.0, -20.0),
            Point2::new(320.0, 200.0),
        ] {
            assert_close(inv.apply(h.apply(p)), p, 1e-9);
        }
    }

    #[test]
    fn dlt_recovers_overdetermined_homography() {
        let ground_truth = Homography::new(Matrix3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ));

        let src: Vec<Point2<f64>> = (0..4)
            .flat_map(|y| (0..5).map(move |x| Point2::new(x as f64 * 40.0, y as f64 * 50.0)))
            .collect();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| ground_truth.apply(p)).collect();

        let estimated = estimate_homography(&src, &dst).expect("estimate");
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(80.0, 90.0),
        ] {
            assert_close(estimated.apply(p), ground_truth.apply(p), 1e-6);
        }
    }

    #[test]
    fn mismatched_or_collapsed_input_fails() {
        let src = [Point2::new(0.0, 0.0); 4];
        let dst = [Point2::new(1.0, 1.0); 3];
        assert!(estimate_homography(&src, &dst).is_none());

        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst = [Point2::new(5.0, 5.0); 4];
        assert!(estimate_homography(&src, &dst).is_none());
    }
}
