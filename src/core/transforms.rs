//! Geometric transforms between the depth and color cameras.
//!
//! [`TransformEngine`] is the seam the extraction pipeline works against.
//! [`PinholeTransform`] implements it for the rational Brown-Conrady lens
//! model (`k1..k6`, `p1`, `p2`). All lookup tables are built once at
//! construction (in parallel with Rayon) and are read-only afterwards, so a
//! single engine is shared by reference across all workers.

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::calibration::{CalibrationModel, CameraCalibration, IntrinsicParams, Result};
use super::frames::DepthImage;

/// Iterations of the fixed-point undistortion solve.
const UNDISTORT_ITERATIONS: usize = 20;

/// Widest footprint, in color pixels per axis, a single depth sample may fill.
/// Larger footprints only occur where the lens model folds near the border.
const MAX_FOOTPRINT_SPAN: f64 = 64.0;

/// Errors raised by a transform call. These are per-frame, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("depth image is {actual_width}x{actual_height}, depth camera is {expected_width}x{expected_height}")]
    DepthResolution {
        actual_width: u32,
        actual_height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("target buffer is {actual_width}x{actual_height}, color camera is {expected_width}x{expected_height}")]
    TargetResolution {
        actual_width: u32,
        actual_height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("image is {actual_width}x{actual_height}, color camera is {expected_width}x{expected_height}")]
    ColorResolution {
        actual_width: u32,
        actual_height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("transform rejected frame: {0}")]
    Rejected(String),
}

/// Sampling used when undistorting depth images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Take the nearest source sample; never blends valid depth with "no data".
    #[default]
    Nearest,
    /// Blend the four neighbours when all of them carry data, nearest otherwise.
    Bilinear,
}

/// Reprojection and undistortion service used by the frame processor.
///
/// Implementations must hold no mutable state across calls: one engine is
/// invoked concurrently from every worker on disjoint target buffers.
pub trait TransformEngine: Sync {
    /// Color camera resolution as `(width, height)`; the size of every
    /// reprojection target.
    fn color_resolution(&self) -> (u32, u32);

    /// Reproject `depth` into the color camera's pixel grid.
    ///
    /// Each depth sample fills the color pixels its footprint covers, so a
    /// higher-resolution color camera gets no holes on continuous surfaces.
    /// `target` is reset before use and must already have the color
    /// resolution; it is never reallocated. Target pixels that receive no
    /// depth sample stay 0.
    fn reproject(
        &self,
        depth: &DepthImage,
        target: &mut DepthImage,
    ) -> std::result::Result<(), TransformError>;

    /// Undistort a decoded color image taken by the color camera.
    fn undistort_color(&self, image: &RgbImage) -> std::result::Result<RgbImage, TransformError>;

    /// Undistort a depth image laid out on the color camera's pixel grid.
    fn undistort_depth(&self, depth: &DepthImage)
        -> std::result::Result<DepthImage, TransformError>;
}

/// Rational radial plus tangential lens distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RationalDistortion {
    pub k: [f64; 6],
    pub p1: f64,
    pub p2: f64,
}

impl RationalDistortion {
    pub fn from_params(params: &IntrinsicParams) -> Self {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = params.distortion_coefficients();
        Self {
            k: [k1, k2, k3, k4, k5, k6],
            p1,
            p2,
        }
    }

    /// Map undistorted normalized coordinates to distorted ones.
    #[inline]
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, k3, k4, k5, k6] = self.k;
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xy = x * y;
        let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;

        (x * radial + dx, y * radial + dy)
    }

    /// Invert [`distort`](Self::distort) by fixed-point iteration.
    ///
    /// Returns `None` when the model folds over at this radius.
    pub fn undistort(&self, xd: f64, yd: f64) -> Option<(f64, f64)> {
        let [k1, k2, k3, k4, k5, k6] = self.k;
        let (mut x, mut y) = (xd, yd);

        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let inv_radial =
                (1.0 + k4 * r2 + k5 * r4 + k6 * r6) / (1.0 + k1 * r2 + k2 * r4 + k3 * r6);
            if !inv_radial.is_finite() || inv_radial <= 0.0 {
                return None;
            }
            let xy = x * y;
            let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
            x = (xd - dx) * inv_radial;
            y = (yd - dy) * inv_radial;
        }

        (x.is_finite() && y.is_finite()).then_some((x, y))
    }
}

/// Pinhole projection with rational distortion for one camera.
#[derive(Debug, Clone, Copy)]
struct CameraModel {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
    distortion: RationalDistortion,
}

impl CameraModel {
    fn new(camera: &CameraCalibration) -> Self {
        let p = &camera.intrinsics.params;
        let k = p.camera_matrix();
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            width: camera.resolution_width,
            height: camera.resolution_height,
            distortion: RationalDistortion::from_params(p),
        }
    }

    #[inline]
    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Project a camera-frame point to pixel coordinates.
    #[inline]
    fn project(&self, point: &Vector3<f64>) -> Option<(f64, f64)> {
        if point.z <= 0.0 {
            return None;
        }
        let (xd, yd) = self.distortion.distort(point.x / point.z, point.y / point.z);
        Some((self.fx * xd + self.cx, self.fy * yd + self.cy))
    }

    /// Undistorted normalized ray through a pixel centre.
    #[inline]
    fn unproject(&self, u: f64, v: f64) -> Option<(f64, f64)> {
        self.distortion
            .undistort((u - self.cx) / self.fx, (v - self.cy) / self.fy)
    }

    /// Source pixel in the distorted image for an undistorted output pixel.
    #[inline]
    fn distorted_source(&self, u: f64, v: f64) -> (f32, f32) {
        let (xd, yd) = self
            .distortion
            .distort((u - self.cx) / self.fx, (v - self.cy) / self.fy);
        ((self.fx * xd + self.cx) as f32, (self.fy * yd + self.cy) as f32)
    }
}

/// Reprojection and undistortion for the rational pinhole model.
pub struct PinholeTransform {
    depth: CameraModel,
    color: CameraModel,
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    /// Normalized ray per depth pixel; `None` where the lens model folds.
    depth_rays: Vec<Option<[f64; 2]>>,
    /// Normalized ray per depth pixel corner, `(width + 1) x (height + 1)`.
    corner_rays: Vec<Option<[f64; 2]>>,
    /// Distorted source position per undistorted color pixel.
    color_remap: Vec<(f32, f32)>,
    depth_interpolation: Interpolation,
}

impl PinholeTransform {
    /// Build the engine, validating the calibration and precomputing tables.
    pub fn new(calibration: &CalibrationModel) -> Result<Self> {
        Self::with_interpolation(calibration, Interpolation::default())
    }

    pub fn with_interpolation(
        calibration: &CalibrationModel,
        depth_interpolation: Interpolation,
    ) -> Result<Self> {
        calibration.validate()?;

        let depth = CameraModel::new(&calibration.depth);
        let color = CameraModel::new(&calibration.color);
        let (rotation, translation) = calibration.depth_to_color();

        let depth_rays: Vec<Option<[f64; 2]>> = (0..depth.pixel_count())
            .into_par_iter()
            .map(|i| {
                let u = (i % depth.width as usize) as f64;
                let v = (i / depth.width as usize) as f64;
                depth.unproject(u, v).map(|(x, y)| [x, y])
            })
            .collect();

        let corner_width = depth.width as usize + 1;
        let corner_rays: Vec<Option<[f64; 2]>> = (0..corner_width
            * (depth.height as usize + 1))
            .into_par_iter()
            .map(|i| {
                let u = (i % corner_width) as f64 - 0.5;
                let v = (i / corner_width) as f64 - 0.5;
                depth.unproject(u, v).map(|(x, y)| [x, y])
            })
            .collect();

        let color_remap: Vec<(f32, f32)> = (0..color.pixel_count())
            .into_par_iter()
            .map(|i| {
                let u = (i % color.width as usize) as f64;
                let v = (i / color.width as usize) as f64;
                color.distorted_source(u, v)
            })
            .collect();

        Ok(Self {
            depth,
            color,
            rotation,
            translation,
            depth_rays,
            corner_rays,
            color_remap,
            depth_interpolation,
        })
    }

    /// Point seen along a normalized depth ray at `d` millimetres, in the
    /// color camera frame.
    #[inline]
    fn to_color_frame(&self, [x, y]: [f64; 2], d: f64) -> Vector3<f64> {
        self.rotation * Vector3::new(x * d, y * d, d) + self.translation
    }

    /// Color-pixel bounds `(u_min, v_min, u_max, v_max)` covered by depth
    /// pixel `(u, v)` when its whole area sits at depth `d`.
    fn footprint(&self, u: usize, v: usize, d: f64) -> Option<(f64, f64, f64, f64)> {
        let corner_width = self.depth.width as usize + 1;
        let top = v * corner_width + u;
        let bottom = top + corner_width;

        let mut bounds = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in [top, top + 1, bottom, bottom + 1] {
            let ray = self.corner_rays[corner]?;
            let (cu, cv) = self.color.project(&self.to_color_frame(ray, d))?;
            bounds.0 = bounds.0.min(cu);
            bounds.1 = bounds.1.min(cv);
            bounds.2 = bounds.2.max(cu);
            bounds.3 = bounds.3.max(cv);
        }

        let (u_min, v_min, u_max, v_max) = bounds;
        if u_max - u_min > MAX_FOOTPRINT_SPAN || v_max - v_min > MAX_FOOTPRINT_SPAN {
            return None;
        }
        Some(bounds)
    }

    fn check_color_size(&self, width: u32, height: u32) -> std::result::Result<(), TransformError> {
        if width != self.color.width || height != self.color.height {
            return Err(TransformError::ColorResolution {
                actual_width: width,
                actual_height: height,
                expected_width: self.color.width,
                expected_height: self.color.height,
            });
        }
        Ok(())
    }
}

impl TransformEngine for PinholeTransform {
    fn color_resolution(&self) -> (u32, u32) {
        (self.color.width, self.color.height)
    }

    fn reproject(
        &self,
        depth: &DepthImage,
        target: &mut DepthImage,
    ) -> std::result::Result<(), TransformError> {
        if depth.width != self.depth.width || depth.height != self.depth.height {
            return Err(TransformError::DepthResolution {
                actual_width: depth.width,
                actual_height: depth.height,
                expected_width: self.depth.width,
                expected_height: self.depth.height,
            });
        }
        if target.width != self.color.width || target.height != self.color.height {
            return Err(TransformError::TargetResolution {
                actual_width: target.width,
                actual_height: target.height,
                expected_width: self.color.width,
                expected_height: self.color.height,
            });
        }

        target.reset(depth.device_timestamp_usec);
        let in_width = self.depth.width as usize;
        let out_width = self.color.width as usize;
        let (color_width, color_height) = (self.color.width as f64, self.color.height as f64);

        for (i, (&sample, ray)) in depth.data.iter().zip(self.depth_rays.iter()).enumerate() {
            if sample == 0 {
                continue;
            }
            let Some(ray) = *ray else {
                continue;
            };

            let d = sample as f64;
            let point = self.to_color_frame(ray, d);
            let Some((u, v)) = self.color.project(&point) else {
                continue;
            };
            let z = point.z.round().min(u16::MAX as f64) as u16;
            if z == 0 {
                continue;
            }

            // Fill every color pixel centre inside the sample's projected
            // footprint; fall back to the centre pixel when a corner cannot
            // be projected.
            let (u_min, v_min, u_max, v_max) = self
                .footprint(i % in_width, i / in_width, d)
                .unwrap_or((u - 0.5, v - 0.5, u + 0.5, v + 0.5));
            let x_end = u_max.ceil().min(color_width) as usize;
            let x_start = (u_min.ceil().max(0.0) as usize).min(x_end);
            let y_end = v_max.ceil().min(color_height) as usize;
            let y_start = (v_min.ceil().max(0.0) as usize).min(y_end);

            for row in y_start..y_end {
                let line = &mut target.data[row * out_width..(row + 1) * out_width];
                for pixel in &mut line[x_start..x_end] {
                    // Nearest surface wins when several samples cover one pixel.
                    if *pixel == 0 || z < *pixel {
                        *pixel = z;
                    }
                }
            }
        }

        Ok(())
    }

    fn undistort_color(&self, image: &RgbImage) -> std::result::Result<RgbImage, TransformError> {
        self.check_color_size(image.width(), image.height())?;

        let (width, height) = (image.width(), image.height());
        let mut out = RgbImage::new(width, height);
        for (dst, &(sx, sy)) in out.pixels_mut().zip(self.color_remap.iter()) {
            *dst = sample_rgb_bilinear(image, sx, sy);
        }
        Ok(out)
    }

    fn undistort_depth(
        &self,
        depth: &DepthImage,
    ) -> std::result::Result<DepthImage, TransformError> {
        self.check_color_size(depth.width, depth.height)?;

        let data = self
            .color_remap
            .iter()
            .map(|&(sx, sy)| match self.depth_interpolation {
                Interpolation::Nearest => sample_depth_nearest(depth, sx, sy),
                Interpolation::Bilinear => sample_depth_bilinear(depth, sx, sy),
            })
            .collect();

        Ok(DepthImage {
            width: depth.width,
            height: depth.height,
            device_timestamp_usec: depth.device_timestamp_usec,
            data,
        })
    }
}

/// True when `(sx, sy)` falls inside the area covered by the image's pixels.
#[inline]
fn in_pixel_bounds(sx: f32, sy: f32, width: u32, height: u32) -> bool {
    sx >= -0.5 && sy >= -0.5 && sx < width as f32 - 0.5 && sy < height as f32 - 0.5
}

/// Bilinear color lookup; positions outside the image read as black.
fn sample_rgb_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let (w, h) = (image.width(), image.height());
    if !in_pixel_bounds(sx, sy, w, h) {
        return Rgb([0, 0, 0]);
    }
    let sx = sx.clamp(0.0, (w - 1) as f32);
    let sy = sy.clamp(0.0, (h - 1) as f32);

    let x0 = sx.floor() as u32;
    let y0 = sy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn sample_depth_nearest(depth: &DepthImage, sx: f32, sy: f32) -> u16 {
    let (x, y) = (sx.round(), sy.round());
    if x < 0.0 || y < 0.0 || x >= depth.width as f32 || y >= depth.height as f32 {
        return 0;
    }
    depth.get(x as u32, y as u32)
}

fn sample_depth_bilinear(depth: &DepthImage, sx: f32, sy: f32) -> u16 {
    let (w, h) = (depth.width, depth.height);
    if !in_pixel_bounds(sx, sy, w, h) {
        return 0;
    }
    let sx = sx.clamp(0.0, (w - 1) as f32);
    let sy = sy.clamp(0.0, (h - 1) as f32);

    let x0 = sx.floor() as u32;
    let y0 = sy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let corners = [
        depth.get(x0, y0),
        depth.get(x1, y0),
        depth.get(x0, y1),
        depth.get(x1, y1),
    ];
    if corners.contains(&0) {
        return sample_depth_nearest(depth, sx, sy);
    }

    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;
    let top = corners[0] as f32 * (1.0 - fx) + corners[1] as f32 * fx;
    let bottom = corners[2] as f32 * (1.0 - fx) + corners[3] as f32 * fx;
    (top * (1.0 - fy) + bottom * fy).round() as u16
}
