//! IMU stream export.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::core::recording::RecordingReader;
use crate::core::writers::ImuWriter;

/// Default file name of the exported IMU CSV.
pub const IMU_EXPORT_FILE: &str = "imu.csv";

/// Write every IMU sample of the recording to `output` as
/// `ot,ox,oy,oz,at,ax,ay,az` rows, in stream order.
///
/// The frame stream is not touched. A recording without IMU data produces
/// a header-only file and a warning.
///
/// # Errors
/// Fails if the output cannot be created or written, or if a sample cannot
/// be read; rows written before the failure are flushed to disk.
pub fn export_imu<R>(reader: &mut R, output: &Path) -> Result<usize>
where
    R: RecordingReader + ?Sized,
{
    let mut writer = ImuWriter::create(output)
        .with_context(|| format!("Failed to create IMU file: {}", output.display()))?;

    let mut read_error = None;
    loop {
        match reader.next_imu_sample() {
            Ok(Some(sample)) => writer.append(&sample)?,
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        }
    }

    let rows = writer.finish()?;
    if let Some(e) = read_error {
        return Err(e).with_context(|| format!("Failed to read IMU sample {}", rows));
    }

    if rows == 0 {
        warn!("Recording has no IMU samples; wrote header only");
    } else {
        info!("{} IMU samples -> {}", rows, output.display());
    }
    Ok(rows)
}
