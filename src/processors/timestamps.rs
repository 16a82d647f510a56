//! Per-sensor device timestamp export.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use crate::core::recording::{RecordingReader, StreamItem};
use crate::core::writers::TimestampWriter;

pub const COLOR_TIMESTAMPS_FILE: &str = "color_timestamps.csv";
pub const DEPTH_TIMESTAMPS_FILE: &str = "depth_timestamps.csv";
pub const IR_TIMESTAMPS_FILE: &str = "ir_timestamps.csv";

/// Row counts written by [`export_timestamps`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampCounts {
    pub captures: usize,
    pub color: usize,
    pub depth: usize,
    pub ir: usize,
}

/// Write the device timestamp of every color, depth and IR image to
/// `color_timestamps.csv`, `depth_timestamps.csv` and `ir_timestamps.csv`
/// under `output_dir`. Missing components are skipped.
///
/// # Arguments
/// * `reader` - Recording positioned at its first capture
/// * `output_dir` - Directory for the CSVs, created if absent
///
/// # Errors
/// Fails on an empty recording, before any file is created. Also fails
/// when a capture cannot be read or a CSV cannot be written; files written
/// up to that point are left in place.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use frame_extractor::core::FrameDirectoryReader;
/// use frame_extractor::processors::export_timestamps;
///
/// let mut reader = FrameDirectoryReader::open("recording/")?;
/// let counts = export_timestamps(&mut reader, Path::new("timestamps/"))?;
/// println!("{} captures", counts.captures);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn export_timestamps<R>(reader: &mut R, output_dir: &Path) -> Result<TimestampCounts>
where
    R: RecordingReader + ?Sized,
{
    let mut next = match reader
        .next_pair()
        .context("Failed to read first capture")?
    {
        StreamItem::Pair(pair) => Some(pair),
        StreamItem::EndOfStream => bail!("Recording is empty"),
    };

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let color_path = output_dir.join(COLOR_TIMESTAMPS_FILE);
    let depth_path = output_dir.join(DEPTH_TIMESTAMPS_FILE);
    let mut color = TimestampWriter::create(&color_path)?;
    let mut depth = TimestampWriter::create(&depth_path)?;
    let mut ir = TimestampWriter::create(&output_dir.join(IR_TIMESTAMPS_FILE))?;
    let mut counts = TimestampCounts::default();

    while let Some(pair) = next {
        counts.captures += 1;
        if let Some(image) = &pair.color {
            color.append(image.device_timestamp_usec)?;
        }
        if let Some(image) = &pair.depth {
            depth.append(image.device_timestamp_usec)?;
        }
        if let Some(image) = &pair.ir {
            ir.append(image.device_timestamp_usec)?;
        }

        next = match reader
            .next_pair()
            .with_context(|| format!("Failed to read capture {}", counts.captures))?
        {
            StreamItem::Pair(pair) => Some(pair),
            StreamItem::EndOfStream => None,
        };
    }

    counts.color = color.finish()?;
    counts.depth = depth.finish()?;
    counts.ir = ir.finish()?;

    info!(
        "{} captures: {} color -> {}, {} depth -> {}, {} IR",
        counts.captures,
        counts.color,
        color_path.display(),
        counts.depth,
        depth_path.display(),
        counts.ir
    );
    Ok(counts)
}
