//! Iterative sub-pixel corner refinement.
//!
//! At a true saddle point every image gradient `g(p)` in the neighbourhood is
//! orthogonal to `p - q`. Each iteration solves the weighted least-squares
//! problem `Σ w g gᵀ (p - q) = 0` for `q` over a square window.

use crate::params::SubPixParams;
use fisheye_calib_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;

/// Refine a coarse corner. Falls back to the input when the iteration
/// degenerates or wanders outside the search window.
pub fn refine_corner(img: &GrayImageView<'_>, initial: Point2<f32>, params: &SubPixParams) -> Point2<f32> {
    let hw = params.half_window as i32;
    if hw == 0 {
        return initial;
    }
    let inv_sigma2 = 1.0 / (hw * hw) as f32;
    let eps2 = params.epsilon * params.epsilon;
    let mut q = initial;

    for _ in 0..params.max_iters {
        let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
        let (mut bb1, mut bb2) = (0.0f32, 0.0f32);

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = q.x + dx as f32;
                let py = q.y + dy as f32;
                let gx = 0.5 * (sample_bilinear(img, px + 1.0, py) - sample_bilinear(img, px - 1.0, py));
                let gy = 0.5 * (sample_bilinear(img, px, py + 1.0) - sample_bilinear(img, px, py - 1.0));
                let w = (-((dx * dx + dy * dy) as f32) * inv_sigma2).exp();

                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f32::EPSILON * (a * c).abs().max(1.0) {
            break;
        }
        let next = Point2::new((c * bb1 - b * bb2) / det, (a * bb2 - b * bb1) / det);
        if !next.x.is_finite() || !next.y.is_finite() {
            break;
        }
        let shift2 = (next - q).norm_squared();
        q = next;
        if shift2 <= eps2 {
            break;
        }
    }

    let moved = q - initial;
    if moved.x.abs() > hw as f32 || moved.y.abs() > hw as f32 {
        return initial;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_calib_core::GrayImage;

    /// Anti-aliased X-junction centred at a fractional position.
    fn x_junction(w: usize, h: usize, cx: f32, cy: f32) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        let ss = 8;
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f32;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = x as f32 - 0.5 + (sx as f32 + 0.5) / ss as f32;
                        let py = y as f32 - 0.5 + (sy as f32 + 0.5) / ss as f32;
                        let light = (px < cx) == (py < cy);
                        acc += if light { 220.0 } else { 30.0 };
                    }
                }
                img.data[y * w + x] = (acc / (ss * ss) as f32).round() as u8;
            }
        }
        img
    }

    #[test]
    fn converges_to_fractional_corner() {
        let img = x_junction(40, 40, 20.3, 19.6);
        let refined = refine_corner(&img.view(), Point2::new(21.0, 19.0), &SubPixParams::default());
        assert!((refined.x - 20.3).abs() < 0.1, "x = {}", refined.x);
        assert!((refined.y - 19.6).abs() < 0.1, "y = {}", refined.y);
    }

    #[test]
    fn flat_patch_keeps_initial_guess() {
        let img = GrayImage {
            width: 20,
            height: 20,
            data: vec![90; 400],
        };
        let p = Point2::new(10.0, 10.0);
        assert_eq!(refine_corner(&img.view(), p, &SubPixParams::default()), p);
    }
}
