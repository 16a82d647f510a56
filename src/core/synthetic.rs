//! Deterministic synthetic recordings for tests.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::calibration::{
    CalibrationModel, CameraCalibration, Extrinsics, IntrinsicParams, Intrinsics,
    INTRINSIC_PARAMETER_COUNT,
};
use super::frames::{ColorImage, DepthImage, FramePair};

/// Distortion-free camera with the optical axis at the image centre.
pub fn camera(width: u32, height: u32) -> CameraCalibration {
    CameraCalibration {
        intrinsics: Intrinsics {
            model_type: 4,
            parameter_count: INTRINSIC_PARAMETER_COUNT as u32,
            params: IntrinsicParams::pinhole(
                width as f64,
                width as f64,
                (width as f64 - 1.0) / 2.0,
                (height as f64 - 1.0) / 2.0,
            ),
        },
        extrinsics: Extrinsics::identity(),
        resolution_width: width,
        resolution_height: height,
        metric_radius: 1.7,
    }
}

/// Co-located depth and color cameras without distortion.
pub fn calibration(
    depth_width: u32,
    depth_height: u32,
    color_width: u32,
    color_height: u32,
) -> CalibrationModel {
    CalibrationModel {
        depth: camera(depth_width, depth_height),
        color: camera(color_width, color_height),
    }
}

/// Gradient image whose pattern depends on `seed`.
pub fn rgb_pattern(width: u32, height: u32, seed: u64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let s = seed as u32;
        Rgb([
            ((x * 40 + s * 13) % 256) as u8,
            ((y * 40 + s * 7) % 256) as u8,
            ((x + y + s) * 25 % 256) as u8,
        ])
    })
}

/// JPEG bitstream of [`rgb_pattern`].
pub fn jpeg_bytes(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    rgb_pattern(width, height, seed)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
        .unwrap();
    bytes
}

/// Depth image whose samples increase along each row from `base` mm.
pub fn depth_ramp(width: u32, height: u32, device_timestamp_usec: u64, base: u16) -> DepthImage {
    let data = (0..width * height)
        .map(|i| base + (i % width) as u16 * 10 + (i / width) as u16)
        .collect();
    DepthImage::from_samples(width, height, device_timestamp_usec, data).unwrap()
}

/// Frame pair `index`, timestamped as a 30 fps capture.
///
/// Color carries timestamp `index * 33_333`, depth the same plus 100 us.
pub fn frame_pair(
    depth_width: u32,
    depth_height: u32,
    color_width: u32,
    color_height: u32,
    index: u64,
    with_color: bool,
    with_depth: bool,
) -> FramePair {
    let timestamp = index * 33_333;
    let color = with_color.then(|| {
        ColorImage::mjpg(
            color_width,
            color_height,
            timestamp,
            jpeg_bytes(color_width, color_height, index),
        )
    });
    let depth = with_depth
        .then(|| depth_ramp(depth_width, depth_height, timestamp + 100, 500 + index as u16));
    FramePair::new(color, depth)
}

/// `count` complete pairs, except those whose index is in `missing_color`.
pub fn frame_pairs(
    width: u32,
    height: u32,
    count: u64,
    missing_color: &[u64],
) -> Vec<FramePair> {
    (0..count)
        .map(|i| frame_pair(width, height, width, height, i, !missing_color.contains(&i), true))
        .collect()
}
