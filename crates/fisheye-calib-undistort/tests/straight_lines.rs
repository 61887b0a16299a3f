use fisheye_calib_core::{CalibrationArtifact, FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics, Resolution};
use fisheye_calib_undistort::{remap, UndistortionMapBuilder};
use image::{GrayImage, Luma};
use nalgebra::{Point2, Point3};

const CALIBRATED: Resolution = Resolution::new(640, 480);
const OPERATING: Resolution = Resolution::new(2592, 1944);

/// Line `y = A + B·x` on the ideal pinhole plane `Z = 1`.
const A: f64 = 0.3;
const B: f64 = 0.1;
/// Half-width of the rendered line profile, in rectified pixels.
const HALF_WIDTH: f64 = 3.0;

fn calibrated_artifact() -> CalibrationArtifact {
    CalibrationArtifact::new(
        CALIBRATED,
        FisheyeIntrinsics {
            fx: 262.0,
            fy: 258.0,
            cx: 322.0,
            cy: 236.0,
        },
        FisheyeDistortion::new(0.05, -0.02, 0.01, -0.002),
        0.18,
    )
    .unwrap()
}

/// Distorted frame of a straight 3D line as seen by `camera`.
fn render_line(camera: &FisheyeCamera, res: Resolution) -> GrayImage {
    let fy = camera.intrinsics.fy;
    GrayImage::from_fn(res.width, res.height, |u, v| {
        let Some(n) = camera.unproject(&Point2::new(u as f64, v as f64)) else {
            return Luma([0]);
        };
        let d_px = (n.y - A - B * n.x).abs() * fy;
        let value = (1.0 - d_px / HALF_WIDTH).clamp(0.0, 1.0) * 255.0;
        Luma([value.round() as u8])
    })
}

/// Intensity-weighted row centroid of column `u` within `±radius` of `around`.
fn column_centroid(img: &GrayImage, u: u32, around: f64, radius: i64) -> Option<f64> {
    let (mut sum, mut weighted) = (0.0, 0.0);
    let centre = around.round() as i64;
    for v in (centre - radius)..=(centre + radius) {
        if v < 0 || v >= img.height() as i64 {
            continue;
        }
        let w = img.get_pixel(u, v as u32)[0] as f64;
        sum += w;
        weighted += w * v as f64;
    }
    (sum > 0.0).then(|| weighted / sum)
}

/// Largest distance of the points from their least-squares line.
fn max_line_deviation(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let sxx: f64 = points.iter().map(|p| (p.0 - mx) * (p.0 - mx)).sum();
    let slope = sxy / sxx;
    points
        .iter()
        .map(|p| (p.1 - my - slope * (p.0 - mx)).abs() / (1.0 + slope * slope).sqrt())
        .fold(0.0, f64::max)
}

#[test]
fn scaled_calibration_straightens_a_line() {
    let scaled = calibrated_artifact().scaled_to(OPERATING).unwrap();
    let camera = scaled.camera();
    let k = camera.intrinsics;

    // Under the fisheye the line is visibly bent.
    let track: Vec<(f64, f64)> = (-12..=12)
        .map(|i| {
            let x = i as f64 * 0.05;
            let px = camera.project(&Point3::new(x, A + B * x, 1.0)).unwrap();
            (px.x, px.y)
        })
        .collect();
    assert!(max_line_deviation(&track) > 8.0);

    let distorted = render_line(&camera, OPERATING);
    let map = UndistortionMapBuilder::from_artifact(&scaled).build().unwrap();
    assert_eq!(map.resolution(), OPERATING);
    let rectified = remap(&distorted, &map).unwrap();
    assert_eq!(rectified.dimensions(), (OPERATING.width, OPERATING.height));

    let mut samples = Vec::new();
    let first = (k.cx - 600.0).round() as u32;
    let last = (k.cx + 600.0).round() as u32;
    for u in (first..=last).step_by(25) {
        let expected = k.cy + k.fy * (A + B * (u as f64 - k.cx) / k.fx);
        let v = column_centroid(&rectified, u, expected, 8)
            .unwrap_or_else(|| panic!("line missing in column {u}"));
        assert!((v - expected).abs() < 1.0, "column {u}: {v} vs {expected}");
        samples.push((u as f64, v));
    }
    let deviation = max_line_deviation(&samples);
    assert!(deviation < 0.5, "rectified line deviates by {deviation} px");
}

#[test]
fn map_from_raw_matches_artifact_map() {
    let artifact = calibrated_artifact();
    let d = artifact.d();
    let raw = UndistortionMapBuilder::from_raw(artifact.k(), d.as_slice(), artifact.resolution())
        .unwrap()
        .build()
        .unwrap();
    let typed = UndistortionMapBuilder::from_artifact(&artifact).build().unwrap();
    assert_eq!(raw, typed);
}
