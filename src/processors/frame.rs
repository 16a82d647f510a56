//! Per-frame unit of work: decode, transform, encode, write.
//!
//! A [`FrameProcessor`] turns one [`FramePair`] into an [`ExtractionResult`].
//! Every failure is contained to the frame it happened on: the processor
//! logs it, classifies it and returns, so one bad frame never aborts a batch.

use image::{ImageFormat, RgbImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::frames::{ColorFormat, ColorImage, DepthImage, FramePair};
use crate::core::transforms::{TransformEngine, TransformError};
use crate::core::writers::{self, OutputLayout, WriteError};

/// Outcome of processing one frame pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionResult {
    /// All outputs written.
    Success,
    /// Color or depth missing; nothing written.
    SkippedIncomplete,
    /// Reprojection or undistortion rejected the frame; nothing written.
    TransformFailed,
    /// Decoding, encoding or writing failed.
    IoFailed,
}

/// What gets written for each complete frame pair. Fixed for a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Color bytes verbatim, depth as 16-bit PNG at depth resolution.
    Raw,
    /// Undistorted JPEG color and undistorted depth reprojected onto the
    /// color camera grid.
    #[default]
    Undistort,
}

#[derive(Error, Debug)]
enum FrameError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to decode color frame: {0}")]
    Decode(String),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Per-frame processing shared by every worker of a run.
#[derive(Clone, Copy)]
pub struct FrameProcessor<'a> {
    engine: &'a dyn TransformEngine,
    layout: &'a OutputLayout,
    mode: ExtractionMode,
    jpeg_quality: u8,
}

impl<'a> FrameProcessor<'a> {
    pub fn new(
        engine: &'a dyn TransformEngine,
        layout: &'a OutputLayout,
        mode: ExtractionMode,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            engine,
            layout,
            mode,
            jpeg_quality,
        }
    }

    /// Process one pair, using `target` as the reprojection buffer.
    ///
    /// The pair is consumed and its buffers are released before returning.
    pub fn process(&self, pair: FramePair, target: &mut DepthImage) -> ExtractionResult {
        let (color, depth) = match (pair.color, pair.depth) {
            (Some(color), Some(depth)) => (color, depth),
            (None, depth) => {
                debug!(
                    "Skipping capture without color (depth ts {:?})",
                    depth.map(|d| d.device_timestamp_usec)
                );
                return ExtractionResult::SkippedIncomplete;
            }
            (Some(color), None) => {
                debug!(
                    "Skipping capture without depth (color ts {})",
                    color.device_timestamp_usec
                );
                return ExtractionResult::SkippedIncomplete;
            }
        };

        let outcome = match self.mode {
            ExtractionMode::Raw => self.write_raw(&color, &depth),
            ExtractionMode::Undistort => self.write_undistorted(&color, &depth, target),
        };

        match outcome {
            Ok(()) => ExtractionResult::Success,
            Err(FrameError::Transform(e)) => {
                warn!(
                    "Frame {}: transform failed: {}",
                    color.device_timestamp_usec, e
                );
                ExtractionResult::TransformFailed
            }
            Err(e) => {
                warn!("Frame {}: {}", color.device_timestamp_usec, e);
                ExtractionResult::IoFailed
            }
        }
    }

    fn write_raw(&self, color: &ColorImage, depth: &DepthImage) -> Result<(), FrameError> {
        let color_path = self
            .layout
            .color_path(color.device_timestamp_usec, color.format.extension());
        writers::write_bytes(&color_path, &color.data)?;

        let depth_path = self.layout.depth_path(depth.device_timestamp_usec);
        writers::write_depth_png(&depth_path, depth)?;
        Ok(())
    }

    fn write_undistorted(
        &self,
        color: &ColorImage,
        depth: &DepthImage,
        target: &mut DepthImage,
    ) -> Result<(), FrameError> {
        self.engine.reproject(depth, target)?;

        let rgb = decode_color(color)?;
        let undistorted_color = self.engine.undistort_color(&rgb)?;
        let undistorted_depth = self.engine.undistort_depth(target)?;

        let color_path = self.layout.color_path(color.device_timestamp_usec, "jpg");
        writers::write_color_jpeg(&color_path, &undistorted_color, self.jpeg_quality)?;

        let depth_path = self.layout.depth_path(depth.device_timestamp_usec);
        writers::write_depth_png(&depth_path, &undistorted_depth)?;
        Ok(())
    }
}

/// Decode a color buffer into packed 8-bit RGB.
fn decode_color(color: &ColorImage) -> Result<RgbImage, FrameError> {
    match color.format {
        ColorFormat::Mjpg => {
            let image = image::load_from_memory_with_format(&color.data, ImageFormat::Jpeg)
                .map_err(|e| FrameError::Decode(e.to_string()))?;
            Ok(image.into_rgb8())
        }
        ColorFormat::Bgra32 => decode_bgra(color),
    }
}

fn decode_bgra(color: &ColorImage) -> Result<RgbImage, FrameError> {
    let width = color.width as usize;
    let height = color.height as usize;
    let stride = color.stride as usize;
    let row_bytes = width * 4;

    if stride < row_bytes {
        return Err(FrameError::Decode(format!(
            "stride {} is shorter than a {}-pixel BGRA row",
            stride, width
        )));
    }
    let required = if height == 0 {
        0
    } else {
        stride * (height - 1) + row_bytes
    };
    if color.data.len() < required {
        return Err(FrameError::Decode(format!(
            "BGRA buffer holds {} bytes, {}x{} with stride {} needs {}",
            color.data.len(),
            width,
            height,
            stride,
            required
        )));
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &color.data[y * stride..y * stride + row_bytes];
        for bgra in row.chunks_exact(4) {
            rgb.extend_from_slice(&[bgra[2], bgra[1], bgra[0]]);
        }
    }

    RgbImage::from_raw(color.width, color.height, rgb)
        .ok_or_else(|| FrameError::Decode("BGRA conversion size mismatch".to_string()))
}
