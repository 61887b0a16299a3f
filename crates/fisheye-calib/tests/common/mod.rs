#![allow(dead_code)]

use fisheye_calib::core::synthetic::{board_pose, render_checkerboard, RenderParams};
use fisheye_calib::core::{CalibrationTarget, FisheyeCamera, FisheyeDistortion, FisheyeIntrinsics, Resolution};
use fisheye_calib::detect::to_image_gray;
use nalgebra::Vector3;

pub const RES: Resolution = Resolution::new(640, 480);

pub fn camera() -> FisheyeCamera {
    FisheyeCamera::new(
        FisheyeIntrinsics {
            fx: 240.0,
            fy: 238.0,
            cx: 321.5,
            cy: 239.0,
        },
        FisheyeDistortion::new(0.03, -0.01, 0.002, 0.0),
    )
}

/// Board views with moderate tilt spread over the frame.
pub fn board_frames(target: &CalibrationTarget) -> Vec<image::GrayImage> {
    let views = [
        ((0.0, 0.0, 0.0), (0.0, 0.0, 10.0)),
        ((0.3, -0.25, 0.2), (1.5, 0.8, 11.0)),
        ((-0.3, 0.25, -0.2), (-1.5, -0.8, 11.0)),
        ((0.3, 0.25, 0.1), (-1.2, 0.6, 10.0)),
        ((-0.3, -0.25, -0.1), (1.2, -0.6, 10.0)),
        ((0.2, -0.3, 0.0), (0.0, 1.0, 12.0)),
        ((-0.2, 0.3, 0.15), (0.5, -1.0, 12.0)),
        ((0.35, 0.0, -0.15), (-0.8, 0.0, 9.5)),
        ((0.0, -0.35, 0.1), (0.8, 0.2, 9.5)),
    ];
    views
        .iter()
        .map(|&((roll, pitch, yaw), (x, y, z))| {
            let pose = board_pose(target, roll, pitch, yaw, Vector3::new(x, y, z));
            let frame = render_checkerboard(&camera(), &pose, target, RES, &RenderParams::default());
            to_image_gray(&frame).expect("rendered frame has a consistent size")
        })
        .collect()
}

pub fn blank_frame() -> image::GrayImage {
    image::GrayImage::from_pixel(RES.width, RES.height, image::Luma([120]))
}
