//! Batched extraction loop.
//!
//! The calling thread is the only one that touches the recording: it pulls
//! up to `batch_capacity` pairs, hands the filled slots to the worker pool,
//! waits for all of them, reports the batch and starts over. Memory is
//! bounded by the slot arena, not by the recording length.

use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info};
use rayon::ThreadPoolBuildError;
use thiserror::Error;

use super::batch::{default_worker_count, Batch, BatchReport, FillEnd, WorkerPool};
use super::frame::FrameProcessor;
use crate::config::{ExtractionConfig, PipelineConfig};
use crate::core::calibration::CalibrationError;
use crate::core::recording::{FrameDirectoryReader, RecordingError, RecordingReader};
use crate::core::transforms::{PinholeTransform, TransformEngine};
use crate::core::writers::{OutputLayout, WriteError};

/// Errors that end an extraction run.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("failed to prepare output directory: {0}")]
    Output(#[from] WriteError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),

    #[error("invalid extraction config: {0}")]
    InvalidConfig(String),

    /// A read failed mid-stream. Frames pulled before it were processed.
    #[error("recording read failed after {} frames: {source}", .completed.frames)]
    Interrupted {
        source: RecordingError,
        completed: ExtractionSummary,
    },
}

/// Result type for extraction runs.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Totals of one extraction run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionSummary {
    pub batches: usize,
    pub frames: usize,
    pub success: usize,
    pub skipped: usize,
    pub transform_failed: usize,
    pub io_failed: usize,
    pub elapsed: Duration,
}

impl ExtractionSummary {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.frames += report.frames;
        self.success += report.success;
        self.skipped += report.skipped;
        self.transform_failed += report.transform_failed;
        self.io_failed += report.io_failed;
    }

    /// Frames failed by transform or I/O.
    pub fn failed(&self) -> usize {
        self.transform_failed + self.io_failed
    }

    /// Frames per second over the whole run.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Extract every frame pair of `reader` into `output_root`.
///
/// Pairs are pulled sequentially into a batch of `config.batch_capacity`
/// slots, processed in parallel, and reported once the whole batch is done.
/// Per-frame failures are counted in the summary, never returned.
///
/// # Arguments
/// * `reader` - Recording to drain; only this thread advances it
/// * `engine` - Transform engine shared by every worker
/// * `output_root` - Directory receiving `color/` and `depth/`
/// * `config` - Batch capacity, worker count, scheduling, mode and quality
/// * `on_batch` - Called on this thread after each non-empty batch
///
/// # Errors
/// Returns [`ExtractError::InvalidConfig`] before touching the output,
/// [`ExtractError::Output`] or [`ExtractError::WorkerPool`] if the run
/// cannot start, and [`ExtractError::Interrupted`] when the recording fails
/// mid-stream, after the pairs already pulled have been processed.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use frame_extractor::core::{FrameDirectoryReader, PinholeTransform, RecordingReader};
/// use frame_extractor::processors::extract_frames;
/// use frame_extractor::ExtractionConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut reader = FrameDirectoryReader::open("recording/")?;
/// let engine = PinholeTransform::new(&reader.calibration()?)?;
/// let summary = extract_frames(
///     &mut reader,
///     &engine,
///     Path::new("frames/"),
///     &ExtractionConfig::default(),
///     |report| println!("batch {}: {:.1} fps", report.index, report.fps()),
/// )?;
/// println!("{} of {} frames written", summary.success, summary.frames);
/// # Ok(())
/// # }
/// ```
pub fn extract_frames<R, F>(
    reader: &mut R,
    engine: &dyn TransformEngine,
    output_root: &Path,
    config: &ExtractionConfig,
    mut on_batch: F,
) -> Result<ExtractionSummary>
where
    R: RecordingReader + ?Sized,
    F: FnMut(&BatchReport),
{
    config.validate().map_err(ExtractError::InvalidConfig)?;

    let layout = OutputLayout::new(output_root);
    layout.prepare()?;

    let pool = WorkerPool::new(
        config.workers.unwrap_or_else(default_worker_count),
        config.scheduling,
    )?;
    let processor = FrameProcessor::new(engine, &layout, config.mode, config.jpeg_quality);
    let mut batch = Batch::new(config.batch_capacity, engine.color_resolution());

    info!(
        "Extracting to {} ({:?} mode, {} workers, {:?} scheduling, batch capacity {})",
        output_root.display(),
        config.mode,
        pool.workers(),
        pool.scheduling(),
        batch.capacity()
    );

    let started = Instant::now();
    let mut summary = ExtractionSummary::default();

    loop {
        batch.clear();
        // Batch time covers the pull as well as the parallel work.
        let batch_started = Instant::now();
        let end = batch.fill(reader);

        if !batch.is_empty() {
            pool.run(batch.filled_slots_mut(), &processor);

            let report =
                BatchReport::from_results(summary.batches, batch.results(), batch_started.elapsed());
            info!(
                "Batch {}: {} frames in {:.2?} ({:.1} fps)",
                report.index,
                report.frames,
                report.elapsed,
                report.fps()
            );
            summary.absorb(&report);
            on_batch(&report);
        }

        match end {
            FillEnd::Full => {}
            FillEnd::EndOfStream => {
                debug!("End of recording after {} frames", summary.frames);
                break;
            }
            FillEnd::Failed(source) => {
                summary.elapsed = started.elapsed();
                return Err(ExtractError::Interrupted {
                    source,
                    completed: summary,
                });
            }
        }
    }

    summary.elapsed = started.elapsed();
    Ok(summary)
}

/// Open a frame directory, build its transform engine and extract it.
///
/// # Arguments
/// * `input` - Recording directory holding `calibration.json` and `captures.csv`
/// * `output_root` - Directory receiving `color/` and `depth/`
/// * `config` - Extraction and undistortion settings
/// * `on_batch` - Called after each non-empty batch
///
/// # Errors
/// Fails like [`extract_frames`], and also when the recording cannot be
/// opened or its calibration is missing or invalid.
pub fn extract_recording<F>(
    input: &Path,
    output_root: &Path,
    config: &PipelineConfig,
    on_batch: F,
) -> Result<ExtractionSummary>
where
    F: FnMut(&BatchReport),
{
    let mut reader = FrameDirectoryReader::open(input)?;
    let calibration = reader.calibration()?;
    let engine =
        PinholeTransform::with_interpolation(&calibration, config.undistort.depth_interpolation)?;

    extract_frames(
        &mut reader,
        &engine,
        output_root,
        &config.extraction,
        on_batch,
    )
}
