//! Batched, parallel depth/color frame extraction.
//!
//! This crate provides tools for:
//! - Reading sequential recordings of paired depth/color frames
//! - Reprojecting depth into the color camera and undistorting both images
//! - Extracting frames to per-sensor image files in fixed-size parallel batches
//! - Dumping calibration parameters and exporting device timestamps and IMU samples
//!
//! # Example
//!
//! ```no_run
//! use frame_extractor::{processors::extract_recording, PipelineConfig};
//! use std::path::Path;
//!
//! let config = PipelineConfig::default();
//! let summary = extract_recording(Path::new("recording"), Path::new("out"), &config, |_| {}).unwrap();
//! println!("{} frames written", summary.success);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{ExtractionConfig, PipelineConfig, UndistortConfig};
pub use core::calibration::CalibrationModel;
pub use core::frames::FramePair;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
