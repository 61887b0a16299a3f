//! Bilinear resampling of 8-bit frames through an [`UndistortionMap`].

use crate::UndistortionMap;
use fisheye_calib_core::{CalibError, Resolution};
use image::{ImageBuffer, Pixel};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Value written where the lookup falls outside the source frame.
const BORDER: f32 = 0.0;

/// Rectify `src` into a new buffer of the same size.
pub fn remap<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    map: &UndistortionMap,
) -> Result<ImageBuffer<P, Vec<u8>>, CalibError>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    let res = map.resolution();
    let mut dst = ImageBuffer::new(res.width, res.height);
    remap_into(src, map, &mut dst)?;
    Ok(dst)
}

/// Rectify `src` into an existing buffer, reusing its allocation.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(size = %map.resolution()))
)]
pub fn remap_into<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    map: &UndistortionMap,
    dst: &mut ImageBuffer<P, Vec<u8>>,
) -> Result<(), CalibError>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    let res = map.resolution();
    for got in [src.dimensions(), dst.dimensions()] {
        let got = Resolution::new(got.0, got.1);
        if got != res {
            return Err(CalibError::ResolutionMismatch { expected: res, got });
        }
    }

    let channels = P::CHANNEL_COUNT as usize;
    let width = res.width as usize;
    let row_len = width * channels;
    let source = Source {
        data: src.as_raw(),
        width,
        height: res.height as usize,
        channels,
    };
    let (map_x, map_y) = (map.map_x(), map.map_y());

    let fill_row = |v: usize, row: &mut [u8]| {
        let offset = v * width;
        for (u, px) in row.chunks_exact_mut(channels).enumerate() {
            source.sample_into(map_x[offset + u], map_y[offset + u], px);
        }
    };

    let out: &mut [u8] = dst;
    #[cfg(feature = "rayon")]
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(v, row)| fill_row(v, row));
    #[cfg(not(feature = "rayon"))]
    out.chunks_mut(row_len)
        .enumerate()
        .for_each(|(v, row)| fill_row(v, row));

    Ok(())
}

struct Source<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    channels: usize,
}

impl Source<'_> {
    /// Bilinear sample at `(x, y)`; taps outside the frame read as [`BORDER`].
    fn sample_into(&self, x: f32, y: f32, out: &mut [u8]) {
        if !x.is_finite() || !y.is_finite() {
            out.fill(BORDER as u8);
            return;
        }
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let taps = [
            (x0, y0, (1.0 - tx) * (1.0 - ty)),
            (x0 + 1, y0, tx * (1.0 - ty)),
            (x0, y0 + 1, (1.0 - tx) * ty),
            (x0 + 1, y0 + 1, tx * ty),
        ];
        for (c, o) in out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for &(ix, iy, w) in &taps {
                acc += w * self.get(ix, iy, c);
            }
            *o = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    #[inline]
    fn get(&self, x: i64, y: i64, c: usize) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return BORDER;
        }
        self.data[(y as usize * self.width + x as usize) * self.channels + c] as f32
    }
}
