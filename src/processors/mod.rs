//! Data processing modules.

pub mod batch;
pub mod extraction;
pub mod frame;
pub mod imu;
pub mod timestamps;

// Re-export key types for convenience
pub use batch::{BatchReport, Scheduling};
pub use extraction::{extract_frames, extract_recording, ExtractError, ExtractionSummary};
pub use frame::{ExtractionMode, ExtractionResult, FrameProcessor};
pub use imu::export_imu;
pub use timestamps::{export_timestamps, TimestampCounts};
