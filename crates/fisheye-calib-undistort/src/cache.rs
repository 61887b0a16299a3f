//! Map reuse across frames.
//!
//! Building a map costs one model evaluation per destination pixel, while a
//! remap is a handful of loads per pixel. [`UndistortCache`] keeps the last
//! map and rebuilds only when `(K, D, P, size)` changes; [`Rectifier`] adds
//! per-frame resolution adaptation on top.

use crate::{remap, UndistortionMap, UndistortionMapBuilder};
use fisheye_calib_core::{CalibError, CalibrationArtifact, FisheyeIntrinsics, Resolution};
use image::{ImageBuffer, Pixel};
use std::sync::Arc;

/// Exact identity of a map's inputs. Floats compare by bit pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MapKey {
    k: [u64; 4],
    d: [u64; 4],
    p: [u64; 4],
    size: Resolution,
}

impl MapKey {
    fn of(builder: &UndistortionMapBuilder) -> Self {
        let bits = |i: &FisheyeIntrinsics| [i.fx.to_bits(), i.fy.to_bits(), i.cx.to_bits(), i.cy.to_bits()];
        let d = builder.camera().distortion.to_array();
        Self {
            k: bits(&builder.camera().intrinsics),
            d: d.map(f64::to_bits),
            p: bits(&builder.projection()),
            size: builder.size(),
        }
    }
}

/// Single-entry cache of the most recently built map.
///
/// The map is shared behind an [`Arc`] so several frames can be remapped
/// against it concurrently.
#[derive(Debug, Default)]
pub struct UndistortCache {
    entry: Option<(MapKey, Arc<UndistortionMap>)>,
    builds: usize,
}

impl UndistortCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map for the given inputs, built only if they differ from the cached ones.
    pub fn get_or_build(&mut self, builder: &UndistortionMapBuilder) -> Result<Arc<UndistortionMap>, CalibError> {
        let key = MapKey::of(builder);
        if let Some((cached, map)) = &self.entry {
            if *cached == key {
                return Ok(Arc::clone(map));
            }
            log::debug!("undistortion inputs changed; rebuilding map for {}", key.size);
        }
        let map = Arc::new(builder.build()?);
        self.builds += 1;
        self.entry = Some((key, Arc::clone(&map)));
        Ok(map)
    }

    /// Number of maps built so far.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// Per-frame rectification for one calibrated camera.
///
/// Frames at a resolution other than the artifact's get a scaled copy of the
/// artifact; the map is rebuilt only when the frame size changes.
#[derive(Debug)]
pub struct Rectifier {
    artifact: CalibrationArtifact,
    scaled: Option<CalibrationArtifact>,
    projection_scale: f64,
    cache: UndistortCache,
}

impl Rectifier {
    pub fn new(artifact: CalibrationArtifact) -> Self {
        Self {
            artifact,
            scaled: None,
            projection_scale: 1.0,
            cache: UndistortCache::new(),
        }
    }

    /// Scale the output focal lengths relative to `K`; values below one
    /// keep more of the field of view.
    pub fn with_projection_scale(mut self, scale: f64) -> Self {
        self.projection_scale = scale;
        self
    }

    pub fn artifact(&self) -> &CalibrationArtifact {
        &self.artifact
    }

    pub fn cache(&self) -> &UndistortCache {
        &self.cache
    }

    /// Cached map for frames of the given size.
    pub fn map_for(&mut self, size: Resolution) -> Result<Arc<UndistortionMap>, CalibError> {
        let builder = self.builder_for(size)?;
        self.cache.get_or_build(&builder)
    }

    pub fn rectify<P>(&mut self, frame: &ImageBuffer<P, Vec<u8>>) -> Result<ImageBuffer<P, Vec<u8>>, CalibError>
    where
        P: Pixel<Subpixel = u8> + Send + Sync,
    {
        let map = self.map_for(Resolution::new(frame.width(), frame.height()))?;
        remap(frame, &map)
    }

    fn builder_for(&mut self, size: Resolution) -> Result<UndistortionMapBuilder, CalibError> {
        let artifact = if size == self.artifact.resolution() {
            &self.artifact
        } else {
            let stale = self.scaled.as_ref().is_none_or(|s| s.resolution() != size);
            if stale {
                self.scaled = Some(self.artifact.scaled_to(size)?);
            }
            match &self.scaled {
                Some(scaled) => scaled,
                None => &self.artifact,
            }
        };
        let k = artifact.intrinsics();
        let p = FisheyeIntrinsics {
            fx: k.fx * self.projection_scale,
            fy: k.fy * self.projection_scale,
            ..k
        };
        Ok(UndistortionMapBuilder::from_artifact(artifact).with_projection(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_calib_core::FisheyeDistortion;
    use image::{GrayImage, Luma};

    fn artifact() -> CalibrationArtifact {
        CalibrationArtifact::new(
            Resolution::new(64, 48),
            FisheyeIntrinsics {
                fx: 30.0,
                fy: 30.0,
                cx: 31.5,
                cy: 23.5,
            },
            FisheyeDistortion::new(0.02, 0.0, 0.0, 0.0),
            0.1,
        )
        .unwrap()
    }

    #[test]
    fn unchanged_inputs_reuse_the_map() {
        let builder = UndistortionMapBuilder::from_artifact(&artifact());
        let mut cache = UndistortCache::new();
        let a = cache.get_or_build(&builder).unwrap();
        let b = cache.get_or_build(&builder.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.builds(), 1);
    }

    #[test]
    fn changed_distortion_or_size_rebuilds() {
        let art = artifact();
        let mut cache = UndistortCache::new();
        cache.get_or_build(&UndistortionMapBuilder::from_artifact(&art)).unwrap();

        let mut cam = art.camera();
        cam.distortion = FisheyeDistortion::new(0.03, 0.0, 0.0, 0.0);
        cache.get_or_build(&UndistortionMapBuilder::new(cam, art.resolution())).unwrap();
        assert_eq!(cache.builds(), 2);

        cache.get_or_build(&UndistortionMapBuilder::new(cam, Resolution::new(32, 24))).unwrap();
        assert_eq!(cache.builds(), 3);

        cache.clear();
        cache.get_or_build(&UndistortionMapBuilder::new(cam, Resolution::new(32, 24))).unwrap();
        assert_eq!(cache.builds(), 4);
    }

    #[test]
    fn failed_build_keeps_previous_entry() {
        let art = artifact();
        let builder = UndistortionMapBuilder::from_artifact(&art);
        let mut cache = UndistortCache::new();
        let first = cache.get_or_build(&builder).unwrap();
        assert!(cache
            .get_or_build(&UndistortionMapBuilder::new(art.camera(), Resolution::new(0, 0)))
            .is_err());
        let again = cache.get_or_build(&builder).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn rectifier_builds_once_per_frame_size() {
        let mut rectifier = Rectifier::new(artifact());
        let small = GrayImage::from_pixel(64, 48, Luma([90]));
        let large = GrayImage::from_pixel(128, 96, Luma([90]));
        for _ in 0..3 {
            rectifier.rectify(&small).unwrap();
        }
        assert_eq!(rectifier.cache().builds(), 1);
        let out = rectifier.rectify(&large).unwrap();
        assert_eq!(out.dimensions(), (128, 96));
        rectifier.rectify(&large).unwrap();
        assert_eq!(rectifier.cache().builds(), 2);
        // Centre pixel samples the flat interior.
        assert_eq!(out.get_pixel(64, 48)[0], 90);
    }

    #[test]
    fn rectifier_scales_artifact_to_frame_size() {
        let mut rectifier = Rectifier::new(artifact());
        let map = rectifier.map_for(Resolution::new(128, 96)).unwrap();
        assert_eq!(map.resolution(), Resolution::new(128, 96));
        // Scaled principal point is (63, 47); it maps onto itself.
        let (sx, sy) = map.source_of(63, 47).unwrap();
        assert!((sx - 63.0).abs() < 1e-4 && (sy - 47.0).abs() < 1e-4);
        assert_eq!(rectifier.artifact().resolution(), Resolution::new(64, 48));
    }
}
