//! Sequential recording sources.
//!
//! A recording yields frame pairs strictly in capture order through
//! [`RecordingReader::next_pair`], and inertial samples through the
//! independent [`RecordingReader::next_imu_sample`] stream. Readers are stateful and take `&mut self`,
//! so the pipeline can only advance them from a single owner.
//!
//! Two sources are provided:
//! - [`FrameDirectoryReader`]: a directory holding `calibration.json`, a
//!   `captures.csv` index, the per-frame image files it references and an
//!   optional `imu.csv`
//! - [`MemoryRecording`]: an in-memory sequence, used for synthetic data

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use image::{ColorType, ImageFormat, ImageReader};
use serde::Deserialize;
use thiserror::Error;

use super::calibration::{CalibrationError, CalibrationModel};
use super::frames::{ColorImage, DepthImage, FramePair, ImuSample};

/// File name of the calibration document inside a frame directory.
pub const CALIBRATION_FILE: &str = "calibration.json";

/// File name of the capture index inside a frame directory.
pub const CAPTURE_INDEX_FILE: &str = "captures.csv";

/// File name of the optional IMU stream inside a frame directory.
pub const IMU_FILE: &str = "imu.csv";

/// Errors that can occur while reading a recording.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to open recording '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("failed to load calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("failed to read capture {index} of '{path}': {reason}")]
    Read {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("failed to read IMU sample {index} of '{path}': {reason}")]
    Imu {
        path: PathBuf,
        index: usize,
        reason: String,
    },
}

/// Result type for recording operations.
pub type Result<T> = std::result::Result<T, RecordingError>;

/// Outcome of a successful pull.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Pair(FramePair),
    EndOfStream,
}

/// A sequential, single-owner source of frame pairs.
pub trait RecordingReader {
    /// Geometric model of the recording.
    fn calibration(&self) -> Result<CalibrationModel>;

    /// Pull the next pair. Once `EndOfStream` is returned, every further
    /// call returns `EndOfStream` again.
    fn next_pair(&mut self) -> Result<StreamItem>;

    /// Pull the next inertial sample, independent of the frame stream.
    /// Returns `None` once the stream is exhausted or when the recording
    /// has no IMU data.
    fn next_imu_sample(&mut self) -> Result<Option<ImuSample>> {
        Ok(None)
    }
}

/// One row of `captures.csv`. Empty cells mark a dropped component.
#[derive(Debug, Deserialize)]
struct CaptureRow {
    color_timestamp_usec: Option<u64>,
    color_file: Option<String>,
    depth_timestamp_usec: Option<u64>,
    depth_file: Option<String>,
    #[serde(default)]
    ir_timestamp_usec: Option<u64>,
    #[serde(default)]
    ir_file: Option<String>,
}

/// One row of `imu.csv`.
#[derive(Debug, Deserialize)]
struct ImuRow {
    gyro_timestamp_usec: u64,
    gyro_x: f32,
    gyro_y: f32,
    gyro_z: f32,
    acc_timestamp_usec: u64,
    acc_x: f32,
    acc_y: f32,
    acc_z: f32,
}

impl From<ImuRow> for ImuSample {
    fn from(row: ImuRow) -> Self {
        Self {
            gyro_timestamp_usec: row.gyro_timestamp_usec,
            gyro: [row.gyro_x, row.gyro_y, row.gyro_z],
            acc_timestamp_usec: row.acc_timestamp_usec,
            acc: [row.acc_x, row.acc_y, row.acc_z],
        }
    }
}

/// Recording stored as a directory of image files plus a capture index.
///
/// ```text
/// recording/
///   calibration.json
///   captures.csv        color_timestamp_usec,color_file,depth_timestamp_usec,depth_file[,ir_timestamp_usec,ir_file]
///   imu.csv             gyro_timestamp_usec,gyro_x,gyro_y,gyro_z,acc_timestamp_usec,acc_x,acc_y,acc_z
///   color/000000033000.jpg
///   depth/000000033000.png
///   ir/000000033000.png
/// ```
///
/// Color files are JPEG bitstreams, depth and IR files 16-bit grayscale PNGs.
/// The IR columns and `imu.csv` are optional.
pub struct FrameDirectoryReader {
    root: PathBuf,
    rows: csv::DeserializeRecordsIntoIter<BufReader<File>, CaptureRow>,
    index: usize,
    finished: bool,
    imu: Option<csv::DeserializeRecordsIntoIter<BufReader<File>, ImuRow>>,
    imu_index: usize,
}

impl FrameDirectoryReader {
    /// Open a frame directory.
    ///
    /// Only the capture index (and `imu.csv`, when present) is opened here;
    /// rows and image files are read lazily by
    /// [`next_pair`](RecordingReader::next_pair).
    ///
    /// # Arguments
    /// * `path` - Recording directory holding `captures.csv`
    ///
    /// # Errors
    /// Returns [`RecordingError::Open`] if `path` is not a directory, or if
    /// `captures.csv` or an existing `imu.csv` cannot be opened.
    ///
    /// # Example
    /// ```no_run
    /// use frame_extractor::core::recording::{FrameDirectoryReader, RecordingReader, StreamItem};
    ///
    /// let mut reader = FrameDirectoryReader::open("recording/")?;
    /// while let StreamItem::Pair(pair) = reader.next_pair()? {
    ///     println!("depth present: {}", pair.depth.is_some());
    /// }
    /// # Ok::<(), frame_extractor::core::RecordingError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let open_error = |reason: String| RecordingError::Open {
            path: root.clone(),
            reason,
        };

        if !root.is_dir() {
            return Err(open_error("not a directory".to_string()));
        }

        let index_path = root.join(CAPTURE_INDEX_FILE);
        let file = File::open(&index_path)
            .map_err(|e| open_error(format!("cannot open {}: {}", CAPTURE_INDEX_FILE, e)))?;
        let rows = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file))
            .into_deserialize();

        let imu_path = root.join(IMU_FILE);
        let imu = if imu_path.is_file() {
            let file = File::open(&imu_path)
                .map_err(|e| open_error(format!("cannot open {}: {}", IMU_FILE, e)))?;
            Some(
                ReaderBuilder::new()
                    .has_headers(true)
                    .trim(csv::Trim::All)
                    .from_reader(BufReader::new(file))
                    .into_deserialize(),
            )
        } else {
            None
        };

        Ok(Self {
            root,
            rows,
            index: 0,
            finished: false,
            imu,
            imu_index: 0,
        })
    }

    fn read_error(&self, reason: String) -> RecordingError {
        RecordingError::Read {
            path: self.root.clone(),
            index: self.index,
            reason,
        }
    }

    fn load_color(&self, timestamp: u64, file: &str) -> Result<ColorImage> {
        let path = self.root.join(file);
        let is_jpeg = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if !is_jpeg {
            return Err(self.read_error(format!("unsupported color file '{}'", file)));
        }

        let data = fs::read(&path)
            .map_err(|e| self.read_error(format!("cannot read '{}': {}", path.display(), e)))?;
        let (width, height) = ImageReader::with_format(Cursor::new(&data), ImageFormat::Jpeg)
            .into_dimensions()
            .map_err(|e| self.read_error(format!("invalid JPEG '{}': {}", path.display(), e)))?;

        Ok(ColorImage::mjpg(width, height, timestamp, data))
    }

    /// Load a 16-bit grayscale PNG; `kind` names the stream in errors.
    fn load_gray16(&self, kind: &str, timestamp: u64, file: &str) -> Result<DepthImage> {
        let path = self.root.join(file);
        let image = image::open(&path)
            .map_err(|e| self.read_error(format!("cannot decode '{}': {}", path.display(), e)))?;
        if image.color() != ColorType::L16 {
            return Err(self.read_error(format!(
                "{} file '{}' is {:?}, expected 16-bit grayscale",
                kind,
                path.display(),
                image.color()
            )));
        }

        let luma = image.into_luma16();
        let (width, height) = luma.dimensions();
        DepthImage::from_samples(width, height, timestamp, luma.into_raw())
            .ok_or_else(|| {
                self.read_error(format!("truncated {} file '{}'", kind, path.display()))
            })
    }

    fn load_row(&self, row: CaptureRow) -> Result<FramePair> {
        let color = match (row.color_timestamp_usec, row.color_file.as_deref()) {
            (Some(ts), Some(file)) if !file.is_empty() => Some(self.load_color(ts, file)?),
            _ => None,
        };
        let depth = match (row.depth_timestamp_usec, row.depth_file.as_deref()) {
            (Some(ts), Some(file)) if !file.is_empty() => {
                Some(self.load_gray16("depth", ts, file)?)
            }
            _ => None,
        };
        let pair = FramePair::new(color, depth);
        match (row.ir_timestamp_usec, row.ir_file.as_deref()) {
            (Some(ts), Some(file)) if !file.is_empty() => {
                Ok(pair.with_ir(self.load_gray16("IR", ts, file)?))
            }
            _ => Ok(pair),
        }
    }
}

impl RecordingReader for FrameDirectoryReader {
    fn calibration(&self) -> Result<CalibrationModel> {
        Ok(CalibrationModel::from_json_file(
            self.root.join(CALIBRATION_FILE),
        )?)
    }

    fn next_pair(&mut self) -> Result<StreamItem> {
        if self.finished {
            return Ok(StreamItem::EndOfStream);
        }

        let row = match self.rows.next() {
            None => {
                self.finished = true;
                return Ok(StreamItem::EndOfStream);
            }
            Some(Err(e)) => return Err(self.read_error(format!("malformed index row: {}", e))),
            Some(Ok(row)) => row,
        };

        let pair = self.load_row(row)?;
        self.index += 1;
        Ok(StreamItem::Pair(pair))
    }

    fn next_imu_sample(&mut self) -> Result<Option<ImuSample>> {
        let Some(rows) = self.imu.as_mut() else {
            return Ok(None);
        };
        match rows.next() {
            None => Ok(None),
            Some(Err(e)) => Err(RecordingError::Imu {
                path: self.root.join(IMU_FILE),
                index: self.imu_index,
                reason: format!("malformed row: {}", e),
            }),
            Some(Ok(row)) => {
                self.imu_index += 1;
                Ok(Some(row.into()))
            }
        }
    }
}

/// In-memory recording backed by a queue of frame pairs.
///
/// A read failure can be injected at a given pull position to exercise the
/// fatal-read path of consumers.
#[derive(Debug, Clone)]
pub struct MemoryRecording {
    calibration: Option<CalibrationModel>,
    pairs: VecDeque<FramePair>,
    imu: VecDeque<ImuSample>,
    fail_at: Option<usize>,
    pulled: usize,
    finished: bool,
}

impl MemoryRecording {
    pub fn new(calibration: CalibrationModel, pairs: Vec<FramePair>) -> Self {
        Self::from_parts(Some(calibration), pairs)
    }

    /// A recording that has no geometric model.
    pub fn uncalibrated(pairs: Vec<FramePair>) -> Self {
        Self::from_parts(None, pairs)
    }

    fn from_parts(calibration: Option<CalibrationModel>, pairs: Vec<FramePair>) -> Self {
        Self {
            calibration,
            pairs: pairs.into(),
            imu: VecDeque::new(),
            fail_at: None,
            pulled: 0,
            finished: false,
        }
    }

    /// Attach an IMU stream.
    pub fn with_imu(mut self, samples: Vec<ImuSample>) -> Self {
        self.imu = samples.into();
        self
    }

    /// Fail with a read error on pull number `position` (0-based).
    pub fn fail_at(mut self, position: usize) -> Self {
        self.fail_at = Some(position);
        self
    }

    /// Number of successful pulls so far, end-of-stream excluded.
    pub fn pulled(&self) -> usize {
        self.pulled
    }
}

impl RecordingReader for MemoryRecording {
    fn calibration(&self) -> Result<CalibrationModel> {
        self.calibration.ok_or_else(|| {
            CalibrationError::Unavailable("recording carries no calibration".to_string()).into()
        })
    }

    fn next_pair(&mut self) -> Result<StreamItem> {
        if self.finished {
            return Ok(StreamItem::EndOfStream);
        }
        if self.fail_at == Some(self.pulled) {
            return Err(RecordingError::Read {
                path: PathBuf::from("<memory>"),
                index: self.pulled,
                reason: "injected read failure".to_string(),
            });
        }

        match self.pairs.pop_front() {
            Some(pair) => {
                self.pulled += 1;
                Ok(StreamItem::Pair(pair))
            }
            None => {
                self.finished = true;
                Ok(StreamItem::EndOfStream)
            }
        }
    }

    fn next_imu_sample(&mut self) -> Result<Option<ImuSample>> {
        Ok(self.imu.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::synthetic;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_recording(dir: &Path, index: &str) {
        let model = synthetic::calibration(4, 3, 4, 3);
        fs::write(dir.join(CALIBRATION_FILE), model.to_json_string().unwrap()).unwrap();

        fs::create_dir_all(dir.join("color")).unwrap();
        fs::create_dir_all(dir.join("depth")).unwrap();
        fs::write(dir.join("color/a.jpg"), synthetic::jpeg_bytes(4, 3, 1)).unwrap();
        synthetic::depth_ramp(4, 3, 0, 500)
            .as_luma16()
            .unwrap()
            .save(dir.join("depth/a.png"))
            .unwrap();

        let mut file = File::create(dir.join(CAPTURE_INDEX_FILE)).unwrap();
        writeln!(file, "color_timestamp_usec,color_file,depth_timestamp_usec,depth_file").unwrap();
        write!(file, "{}", index).unwrap();
    }

    #[test]
    fn test_frame_directory_reads_ir_columns() -> Result<()> {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "");
        fs::create_dir_all(dir.path().join("ir")).unwrap();
        synthetic::depth_ramp(4, 3, 0, 40)
            .as_luma16()
            .unwrap()
            .save(dir.path().join("ir/a.png"))
            .unwrap();
        fs::write(
            dir.path().join(CAPTURE_INDEX_FILE),
            "color_timestamp_usec,color_file,depth_timestamp_usec,depth_file,ir_timestamp_usec,ir_file\n\
             100,color/a.jpg,110,depth/a.png,110,ir/a.png\n\
             200,color/a.jpg,210,depth/a.png,,\n",
        )
        .unwrap();

        let mut reader = FrameDirectoryReader::open(dir.path())?;
        let StreamItem::Pair(first) = reader.next_pair()? else {
            panic!("Expected a pair");
        };
        let ir = first.ir.unwrap();
        assert_eq!(ir.device_timestamp_usec, 110);
        assert_eq!(ir.data, synthetic::depth_ramp(4, 3, 0, 40).data);

        let StreamItem::Pair(second) = reader.next_pair()? else {
            panic!("Expected a pair");
        };
        assert!(second.ir.is_none());
        assert!(second.depth.is_some());
        Ok(())
    }

    #[test]
    fn test_frame_directory_reads_imu_stream() -> Result<()> {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "100,color/a.jpg,110,depth/a.png\n");
        fs::write(
            dir.path().join(IMU_FILE),
            "gyro_timestamp_usec,gyro_x,gyro_y,gyro_z,acc_timestamp_usec,acc_x,acc_y,acc_z\n\
             1000,0.5,-0.25,0,1010,0,0,9.75\n\
             2000,0,0,0.125,2010,1.5,0,9.5\n",
        )
        .unwrap();

        let mut reader = FrameDirectoryReader::open(dir.path())?;
        let first = reader.next_imu_sample()?.unwrap();
        assert_eq!(first.gyro_timestamp_usec, 1000);
        assert_eq!(first.gyro, [0.5, -0.25, 0.0]);
        assert_eq!(first.acc_timestamp_usec, 1010);
        assert_eq!(first.acc, [0.0, 0.0, 9.75]);
        assert_eq!(reader.next_imu_sample()?.unwrap().acc, [1.5, 0.0, 9.5]);
        assert_eq!(reader.next_imu_sample()?, None);

        // The frame stream is unaffected by the IMU stream.
        assert!(matches!(reader.next_pair()?, StreamItem::Pair(_)));
        Ok(())
    }

    #[test]
    fn test_frame_directory_without_imu_file() -> Result<()> {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "");

        let mut reader = FrameDirectoryReader::open(dir.path())?;
        assert_eq!(reader.next_imu_sample()?, None);
        Ok(())
    }

    #[test]
    fn test_frame_directory_malformed_imu_row() {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "");
        fs::write(
            dir.path().join(IMU_FILE),
            "gyro_timestamp_usec,gyro_x,gyro_y,gyro_z,acc_timestamp_usec,acc_x,acc_y,acc_z\n\
             1000,0,0,0,1010,0,0,9.8\n\
             oops,0,0,0,2010,0,0,9.8\n",
        )
        .unwrap();

        let mut reader = FrameDirectoryReader::open(dir.path()).unwrap();
        assert!(reader.next_imu_sample().unwrap().is_some());
        assert!(matches!(
            reader.next_imu_sample(),
            Err(RecordingError::Imu { index: 1, .. })
        ));
    }

    #[test]
    fn test_frame_directory_reads_pairs_in_order() -> Result<()> {
        let dir = TempDir::new().unwrap();
        write_recording(
            dir.path(),
            "100,color/a.jpg,110,depth/a.png\n\
             200,,210,depth/a.png\n\
             300,color/a.jpg,,\n",
        );

        let mut reader = FrameDirectoryReader::open(dir.path())?;
        let calibration = reader.calibration()?;
        assert_eq!(calibration.color.resolution_width, 4);

        let StreamItem::Pair(first) = reader.next_pair()? else {
            panic!("Expected a pair");
        };
        let color = first.color.unwrap();
        assert_eq!((color.width, color.height), (4, 3));
        assert_eq!(color.device_timestamp_usec, 100);
        assert_eq!(color.data, synthetic::jpeg_bytes(4, 3, 1));
        let depth = first.depth.unwrap();
        assert_eq!(depth.device_timestamp_usec, 110);
        assert_eq!(depth.data, synthetic::depth_ramp(4, 3, 0, 500).data);

        let StreamItem::Pair(second) = reader.next_pair()? else {
            panic!("Expected a pair");
        };
        assert!(second.color.is_none());
        assert!(second.depth.is_some());

        let StreamItem::Pair(third) = reader.next_pair()? else {
            panic!("Expected a pair");
        };
        assert!(third.color.is_some());
        assert!(third.depth.is_none());

        assert_eq!(reader.next_pair()?, StreamItem::EndOfStream);
        assert_eq!(reader.next_pair()?, StreamItem::EndOfStream);
        Ok(())
    }

    #[test]
    fn test_frame_directory_open_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FrameDirectoryReader::open(dir.path().join("missing")),
            Err(RecordingError::Open { .. })
        ));
        // Directory exists but has no capture index.
        assert!(matches!(
            FrameDirectoryReader::open(dir.path()),
            Err(RecordingError::Open { .. })
        ));
    }

    #[test]
    fn test_frame_directory_missing_calibration() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CAPTURE_INDEX_FILE),
            "color_timestamp_usec,color_file,depth_timestamp_usec,depth_file\n",
        )
        .unwrap();

        let reader = FrameDirectoryReader::open(dir.path()).unwrap();
        assert!(matches!(
            reader.calibration(),
            Err(RecordingError::Calibration(CalibrationError::Io { .. }))
        ));
    }

    #[test]
    fn test_frame_directory_missing_frame_is_read_error() {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "100,color/gone.jpg,110,depth/a.png\n");

        let mut reader = FrameDirectoryReader::open(dir.path()).unwrap();
        match reader.next_pair() {
            Err(RecordingError::Read { index, .. }) => assert_eq!(index, 0),
            other => panic!("Expected Read error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_directory_rejects_8bit_depth() {
        let dir = TempDir::new().unwrap();
        write_recording(dir.path(), "100,color/a.jpg,110,depth/b.png\n");
        image::GrayImage::new(4, 3)
            .save(dir.path().join("depth/b.png"))
            .unwrap();

        let mut reader = FrameDirectoryReader::open(dir.path()).unwrap();
        assert!(matches!(
            reader.next_pair(),
            Err(RecordingError::Read { .. })
        ));
    }

    #[test]
    fn test_memory_recording_end_is_idempotent() -> Result<()> {
        let pairs = vec![synthetic::frame_pair(4, 3, 4, 3, 1, true, true)];
        let mut recording = MemoryRecording::new(synthetic::calibration(4, 3, 4, 3), pairs);

        assert!(matches!(recording.next_pair()?, StreamItem::Pair(_)));
        assert_eq!(recording.next_pair()?, StreamItem::EndOfStream);
        assert_eq!(recording.next_pair()?, StreamItem::EndOfStream);
        assert_eq!(recording.pulled(), 1);
        Ok(())
    }

    #[test]
    fn test_memory_recording_injected_failure() {
        let pairs = (0..3)
            .map(|i| synthetic::frame_pair(4, 3, 4, 3, i, true, true))
            .collect();
        let mut recording =
            MemoryRecording::new(synthetic::calibration(4, 3, 4, 3), pairs).fail_at(2);

        assert!(recording.next_pair().is_ok());
        assert!(recording.next_pair().is_ok());
        assert!(matches!(
            recording.next_pair(),
            Err(RecordingError::Read { index: 2, .. })
        ));
    }

    #[test]
    fn test_memory_recording_imu_stream() -> Result<()> {
        let sample = ImuSample {
            gyro_timestamp_usec: 5,
            gyro: [0.1, 0.2, 0.3],
            acc_timestamp_usec: 6,
            acc: [0.0, 0.0, 9.81],
        };
        let mut recording = MemoryRecording::uncalibrated(Vec::new()).with_imu(vec![sample]);

        assert_eq!(recording.next_imu_sample()?, Some(sample));
        assert_eq!(recording.next_imu_sample()?, None);
        assert_eq!(recording.next_pair()?, StreamItem::EndOfStream);
        Ok(())
    }

    #[test]
    fn test_uncalibrated_recording() {
        let recording = MemoryRecording::uncalibrated(Vec::new());
        assert!(matches!(
            recording.calibration(),
            Err(RecordingError::Calibration(CalibrationError::Unavailable(_)))
        ));
    }
}
