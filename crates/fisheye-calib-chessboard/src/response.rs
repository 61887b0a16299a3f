//! Coarse corner localisation.
//!
//! Frames are contrast-normalised first, then a dense ChESS-style response is
//! computed on a 16-sample ring. Peaks that survive non-maximum suppression
//! are kept only if the ring, binarised against the local adaptive
//! threshold, looks like an X-junction.

use crate::params::ChessboardParams;
use fisheye_calib_core::{GrayImage, GrayImageView};
use nalgebra::Point2;

/// Candidate X-junction in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub position: Point2<f32>,
    /// Direction (mod π) of the diagonal through the light squares.
    pub orientation: f32,
    pub strength: f32,
}

/// 16 integer offsets on a circle, ordered by angle.
#[derive(Clone, Debug)]
pub(crate) struct Ring {
    pub radius: i32,
    offsets: [(i32, i32); 16],
    cos2: [f32; 16],
    sin2: [f32; 16],
}

impl Ring {
    pub fn from_radius(radius: u32) -> Self {
        let r = radius.max(1) as f32;
        let mut offsets = [(0i32, 0i32); 16];
        let mut cos2 = [0f32; 16];
        let mut sin2 = [0f32; 16];
        for k in 0..16 {
            let phi = k as f32 * std::f32::consts::PI / 8.0;
            let dx = (r * phi.cos()).round() as i32;
            let dy = (r * phi.sin()).round() as i32;
            offsets[k] = (dx, dy);
            let actual = (dy as f32).atan2(dx as f32);
            cos2[k] = (2.0 * actual).cos();
            sin2[k] = (2.0 * actual).sin();
        }
        Self {
            radius: radius.max(1) as i32,
            offsets,
            cos2,
            sin2,
        }
    }

    /// Ring samples around `(x, y)`; the caller keeps the ring inside the image.
    #[inline]
    fn samples(&self, img: &GrayImageView<'_>, x: usize, y: usize) -> [f32; 16] {
        let mut s = [0f32; 16];
        for (k, &(dx, dy)) in self.offsets.iter().enumerate() {
            let xx = (x as i32 + dx) as usize;
            let yy = (y as i32 + dy) as usize;
            s[k] = img.at(xx, yy) as f32;
        }
        s
    }

    /// Dominant light diagonal from the second angular harmonic of the ring.
    fn orientation(&self, samples: &[f32; 16]) -> f32 {
        let mean = samples.iter().sum::<f32>() / 16.0;
        let mut c = 0.0f32;
        let mut s = 0.0f32;
        for k in 0..16 {
            let v = samples[k] - mean;
            c += v * self.cos2[k];
            s += v * self.sin2[k];
        }
        0.5 * s.atan2(c)
    }
}

/// Linearly stretch the 1st..99th intensity percentiles to the full range.
///
/// Returns `None` for frames without usable contrast (blank, saturated).
pub fn normalize_contrast(img: &GrayImageView<'_>, min_contrast: u8) -> Option<GrayImage> {
    let total = img.data.len();
    if total == 0 {
        return None;
    }
    let mut hist = [0usize; 256];
    for &v in img.data {
        hist[v as usize] += 1;
    }
    let lo_count = total / 100;
    let hi_count = total - total / 100;
    let mut acc = 0usize;
    let mut lo = 0usize;
    let mut hi = 255usize;
    let mut lo_found = false;
    for (v, &n) in hist.iter().enumerate() {
        acc += n;
        if !lo_found && acc > lo_count {
            lo = v;
            lo_found = true;
        }
        if acc >= hi_count {
            hi = v;
            break;
        }
    }
    if hi <= lo || hi - lo < min_contrast as usize {
        return None;
    }

    let scale = 255.0 / (hi - lo) as f32;
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        *out = ((v as f32 - lo as f32) * scale).round().clamp(0.0, 255.0) as u8;
    }
    Some(GrayImage {
        width: img.width,
        height: img.height,
        data: img.data.iter().map(|&v| lut[v as usize]).collect(),
    })
}

/// Summed-area table for box means.
pub(crate) struct IntegralImage {
    w: usize,
    h: usize,
    sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImageView<'_>) -> Self {
        let (w, h) = (img.width, img.height);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += img.at(x, y) as u64;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            }
        }
        Self { w, h, sum }
    }

    /// Mean over the box `[x - r, x + r] × [y - r, y + r]`, clamped to the image.
    pub fn box_mean(&self, x: usize, y: usize, r: usize) -> f32 {
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r + 1).min(self.w);
        let y1 = (y + r + 1).min(self.h);
        let stride = self.w + 1;
        let area = ((x1 - x0) * (y1 - y0)) as f32;
        if area == 0.0 {
            return 0.0;
        }
        let s = self.sum[y1 * stride + x1] + self.sum[y0 * stride + x0]
            - self.sum[y0 * stride + x1]
            - self.sum[y1 * stride + x0];
        s as f32 / area
    }
}

/// Dense response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }
}

/// ChESS response `SR - DR - 16·|ring mean - local mean|`; zero near borders.
pub(crate) fn chess_response(img: &GrayImageView<'_>, ring: &Ring) -> ResponseMap {
    let (w, h) = (img.width, img.height);
    let mut data = vec![0f32; w * h];
    let border = ring.radius as usize + 1;
    if w > 2 * border && h > 2 * border {
        for y in border..h - border {
            for x in border..w - border {
                let s = ring.samples(img, x, y);
                let mut sr = 0.0f32;
                for n in 0..4 {
                    sr += ((s[n] + s[n + 8]) - (s[n + 4] + s[n + 12])).abs();
                }
                let mut dr = 0.0f32;
                for n in 0..8 {
                    dr += (s[n] - s[n + 8]).abs();
                }
                let ring_mean = s.iter().sum::<f32>() / 16.0;
                let local_mean = (img.at(x, y) as f32
                    + img.at(x - 1, y) as f32
                    + img.at(x + 1, y) as f32
                    + img.at(x, y - 1) as f32
                    + img.at(x, y + 1) as f32)
                    / 5.0;
                data[y * w + x] = sr - dr - 16.0 * (ring_mean - local_mean).abs();
            }
        }
    }
    ResponseMap { w, h, data }
}

/// Binarised ring must switch colour exactly four times, with opposite
/// samples mostly agreeing.
fn is_x_junction(samples: &[f32; 16], threshold: f32) -> bool {
    let bits: [bool; 16] = std::array::from_fn(|k| samples[k] > threshold);
    let transitions = (0..16).filter(|&k| bits[k] != bits[(k + 1) % 16]).count();
    if transitions != 4 {
        return false;
    }
    let agree = (0..8).filter(|&k| bits[k] == bits[k + 8]).count();
    agree >= 6
}

/// 3×3 centre of mass of the positive response around an integer peak.
fn refine_peak(resp: &ResponseMap, x: usize, y: usize) -> Point2<f32> {
    let mut sw = 0.0f32;
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    for yy in y.saturating_sub(1)..=(y + 1).min(resp.h - 1) {
        for xx in x.saturating_sub(1)..=(x + 1).min(resp.w - 1) {
            let v = resp.at(xx, yy).max(0.0);
            sw += v;
            sx += v * xx as f32;
            sy += v * yy as f32;
        }
    }
    if sw > 0.0 {
        Point2::new(sx / sw, sy / sw)
    } else {
        Point2::new(x as f32, y as f32)
    }
}

/// Coarse X-junction candidates of a (contrast-normalised) frame.
pub fn find_candidates(img: &GrayImageView<'_>, params: &ChessboardParams) -> Vec<Corner> {
    let ring = Ring::from_radius(params.ring_radius);
    let resp = chess_response(img, &ring);
    let max_r = resp.data.iter().fold(0.0f32, |m, &v| m.max(v));
    if max_r <= 0.0 {
        return Vec::new();
    }
    let thr = params.threshold_rel * max_r;
    let integral = IntegralImage::new(img);
    let nms = params.nms_radius as i32;
    let block = params.adaptive_block_radius as usize;

    let mut out = Vec::new();
    for y in 0..resp.h {
        for x in 0..resp.w {
            let v = resp.at(x, y);
            if v <= thr {
                continue;
            }

            let mut is_max = true;
            let mut cluster = 0u32;
            'nms: for dy in -nms..=nms {
                for dx in -nms..=nms {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let xx = x as i32 + dx;
                    let yy = y as i32 + dy;
                    if xx < 0 || yy < 0 || xx >= resp.w as i32 || yy >= resp.h as i32 {
                        continue;
                    }
                    let n = resp.at(xx as usize, yy as usize);
                    // Ties go to the first pixel in scan order.
                    if n > v || (n == v && (yy, xx) < (y as i32, x as i32)) {
                        is_max = false;
                        break 'nms;
                    }
                    if n > 0.0 {
                        cluster += 1;
                    }
                }
            }
            if !is_max || cluster < params.min_cluster_size {
                continue;
            }

            let samples = ring.samples(img, x, y);
            let threshold = integral.box_mean(x, y, block) - params.adaptive_offset;
            if !is_x_junction(&samples, threshold) {
                continue;
            }

            out.push(Corner {
                position: refine_peak(&resp, x, y),
                orientation: ring.orientation(&samples),
                strength: v,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Axis-aligned X-junction at `(cx, cy)` (integer), light top-left.
    fn x_junction(w: usize, h: usize, cx: usize, cy: usize) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let light = (x < cx) == (y < cy);
                img.data[y * w + x] = if light { 220 } else { 30 };
            }
        }
        img
    }

    #[test]
    fn ring_offsets_lie_on_the_circle() {
        let ring = Ring::from_radius(5);
        assert_eq!(ring.offsets[0], (5, 0));
        assert_eq!(ring.offsets[4], (0, 5));
        assert_eq!(ring.offsets[8], (-5, 0));
        for &(dx, dy) in &ring.offsets {
            let r = ((dx * dx + dy * dy) as f32).sqrt();
            assert!((4.5..=5.7).contains(&r));
        }
    }

    #[test]
    fn blank_frame_has_no_contrast() {
        let img = GrayImage {
            width: 32,
            height: 32,
            data: vec![128; 32 * 32],
        };
        assert!(normalize_contrast(&img.view(), 20).is_none());
    }

    #[test]
    fn contrast_is_stretched_to_full_range() {
        let mut data = vec![100u8; 400];
        data[..200].fill(150);
        let img = GrayImage {
            width: 20,
            height: 20,
            data,
        };
        let out = normalize_contrast(&img.view(), 20).unwrap();
        assert_eq!(*out.data.iter().min().unwrap(), 0);
        assert_eq!(*out.data.iter().max().unwrap(), 255);
    }

    #[test]
    fn box_mean_matches_direct_sum() {
        let img = x_junction(20, 20, 10, 10);
        let integral = IntegralImage::new(&img.view());
        let mean = integral.box_mean(10, 10, 3);
        let mut direct = 0.0f32;
        for y in 7..=13 {
            for x in 7..=13 {
                direct += img.data[y * 20 + x] as f32;
            }
        }
        assert!((mean - direct / 49.0).abs() < 1e-3);
    }

    #[test]
    fn single_x_junction_is_found_with_diagonal_orientation() {
        let img = x_junction(40, 40, 20, 20);
        let corners = find_candidates(&img.view(), &ChessboardParams::default());
        assert_eq!(corners.len(), 1, "{corners:?}");
        let c = corners[0];
        assert!((c.position.x - 19.5).abs() <= 1.0 && (c.position.y - 19.5).abs() <= 1.0);
        // Light squares are top-left and bottom-right: the 45° diagonal (mod π).
        let o = c.orientation.rem_euclid(std::f32::consts::PI);
        assert!((o - std::f32::consts::FRAC_PI_4).abs() < 0.2, "orientation {o}");
    }

    #[test]
    fn straight_edge_gives_no_candidates() {
        let mut img = GrayImage::new(40, 40);
        for y in 0..40 {
            for x in 0..40 {
                img.data[y * 40 + x] = if x < 20 { 30 } else { 220 };
            }
        }
        assert!(find_candidates(&img.view(), &ChessboardParams::default()).is_empty());
    }
}
