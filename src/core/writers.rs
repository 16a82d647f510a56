//! Output writers for extracted frames and exported metadata.
//!
//! This module provides:
//! - [`OutputLayout`]: the `color/` and `depth/` directory layout of an
//!   extraction, with file names keyed by device timestamp
//! - JPEG, 16-bit PNG and verbatim byte writers for frame images
//! - JSON calibration, CSV timestamp and CSV IMU writers

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::RgbImage;
use thiserror::Error;

use super::calibration::CalibrationModel;
use super::frames::{DepthImage, ImuSample};

/// Sub-directory holding color frames.
pub const COLOR_DIR: &str = "color";

/// Sub-directory holding depth frames.
pub const DEPTH_DIR: &str = "depth";

/// Header of every timestamp CSV.
pub const TIMESTAMP_HEADER: &str = "timestamp_us";

/// Header of the IMU CSV: gyro (`o`) then accelerometer (`a`), each as
/// timestamp followed by x, y, z.
pub const IMU_HEADER: [&str; 8] = ["ot", "ox", "oy", "oz", "at", "ax", "ay", "az"];

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create an output directory.
    #[error("failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Image encoder rejected the buffer or failed mid-stream.
    #[error("failed to encode image '{path}': {source}")]
    Encode {
        path: String,
        #[source]
        source: ImageError,
    },

    /// JSON serialization error.
    #[error("failed to serialize '{path}': {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates a directory and its parents if they don't exist.
fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| WriteError::CreateDirectory {
        path: path.display().to_string(),
        source: e,
    })
}

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn flush(mut writer: BufWriter<File>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// File name of a frame: the timestamp zero-padded to 12 digits.
pub fn frame_file_name(device_timestamp_usec: u64, extension: &str) -> String {
    format!("{:012}.{}", device_timestamp_usec, extension)
}

/// Directory layout of one extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn color_dir(&self) -> PathBuf {
        self.root.join(COLOR_DIR)
    }

    pub fn depth_dir(&self) -> PathBuf {
        self.root.join(DEPTH_DIR)
    }

    /// Create the `color/` and `depth/` directories if absent.
    pub fn prepare(&self) -> Result<()> {
        ensure_dir(&self.color_dir())?;
        ensure_dir(&self.depth_dir())
    }

    /// `{root}/color/{timestamp:012}.{extension}`
    pub fn color_path(&self, device_timestamp_usec: u64, extension: &str) -> PathBuf {
        self.color_dir()
            .join(frame_file_name(device_timestamp_usec, extension))
    }

    /// `{root}/depth/{timestamp:012}.png`
    pub fn depth_path(&self, device_timestamp_usec: u64) -> PathBuf {
        self.depth_dir()
            .join(frame_file_name(device_timestamp_usec, "png"))
    }
}

/// Write a buffer to `path` verbatim.
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    writer.write_all(data).map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    flush(writer, path)
}

/// Encode an RGB image as baseline JPEG.
///
/// The parent directory must already exist.
///
/// # Arguments
/// * `path` - Destination file, created or truncated
/// * `image` - Decoded color frame
/// * `quality` - JPEG quality, 1-100
///
/// # Errors
/// Returns [`WriteError::CreateFile`] if the file cannot be created,
/// [`WriteError::Encode`] if the encoder fails and
/// [`WriteError::WriteFile`] if the final flush fails.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use frame_extractor::core::writers::write_color_jpeg;
///
/// let image = image::RgbImage::new(1280, 720);
/// write_color_jpeg(Path::new("out/color/000000033333.jpg"), &image, 96)?;
/// # Ok::<(), frame_extractor::core::WriteError>(())
/// ```
pub fn write_color_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .map_err(|e| WriteError::Encode {
            path: path.display().to_string(),
            source: e,
        })?;
    flush(writer, path)
}

/// Encode a depth image as a single-channel 16-bit PNG.
///
/// # Arguments
/// * `path` - Destination file, created or truncated
/// * `depth` - Depth samples in millimetres
///
/// # Errors
/// Returns [`WriteError::Encode`] if the sample buffer does not match the
/// image dimensions or the encoder fails, and [`WriteError::CreateFile`] /
/// [`WriteError::WriteFile`] on I/O failures.
pub fn write_depth_png(path: &Path, depth: &DepthImage) -> Result<()> {
    let encode_error = |source: ImageError| WriteError::Encode {
        path: path.display().to_string(),
        source,
    };
    let view = depth.as_luma16().ok_or_else(|| {
        encode_error(ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        )))
    })?;

    let mut writer = create_buffered_writer(path)?;
    view.write_with_encoder(PngEncoder::new(&mut writer))
        .map_err(encode_error)?;
    flush(writer, path)
}

/// Write a calibration model as pretty-printed JSON.
pub fn write_calibration_json(path: &Path, model: &CalibrationModel) -> Result<()> {
    ensure_parent_dirs(path)?;
    let json = model.to_json_string().map_err(|e| WriteError::Serialize {
        path: path.display().to_string(),
        source: e,
    })?;
    write_bytes(path, json.as_bytes())
}

/// Streaming single-column CSV of device timestamps.
pub struct TimestampWriter {
    path: String,
    writer: csv::Writer<BufWriter<File>>,
    rows: usize,
}

impl TimestampWriter {
    /// Create the file and write the `timestamp_us` header.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;
        let mut writer = csv::Writer::from_writer(create_buffered_writer(path)?);
        let path = path.display().to_string();

        writer
            .write_record([TIMESTAMP_HEADER])
            .map_err(|e| WriteError::CsvError {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, device_timestamp_usec: u64) -> Result<()> {
        self.writer
            .write_record([device_timestamp_usec.to_string()])
            .map_err(|e| WriteError::CsvError {
                path: self.path.clone(),
                source: e,
            })?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the file, returning the number of data rows.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(|e| WriteError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(self.rows)
    }
}

/// Streaming CSV of IMU samples under [`IMU_HEADER`].
pub struct ImuWriter {
    path: String,
    writer: csv::Writer<BufWriter<File>>,
    rows: usize,
}

impl ImuWriter {
    /// Create the file and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;
        let mut writer = csv::Writer::from_writer(create_buffered_writer(path)?);
        let path = path.display().to_string();

        writer
            .write_record(IMU_HEADER)
            .map_err(|e| WriteError::CsvError {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, sample: &ImuSample) -> Result<()> {
        let [ox, oy, oz] = sample.gyro;
        let [ax, ay, az] = sample.acc;
        self.writer
            .write_record([
                sample.gyro_timestamp_usec.to_string(),
                format!("{:.6}", ox),
                format!("{:.6}", oy),
                format!("{:.6}", oz),
                sample.acc_timestamp_usec.to_string(),
                format!("{:.6}", ax),
                format!("{:.6}", ay),
                format!("{:.6}", az),
            ])
            .map_err(|e| WriteError::CsvError {
                path: self.path.clone(),
                source: e,
            })?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the file, returning the number of data rows.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(|e| WriteError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(self.rows)
    }
}
