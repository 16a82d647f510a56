//! Core data types and I/O operations.

pub mod calibration;
pub mod frames;
pub mod recording;
pub mod transforms;
pub mod writers;

#[cfg(test)]
pub(crate) mod synthetic;

pub use calibration::{CalibrationError, CalibrationModel};
pub use frames::{ColorFormat, ColorImage, DepthImage, FramePair, ImuSample, IrImage};
pub use recording::{
    FrameDirectoryReader, MemoryRecording, RecordingError, RecordingReader, StreamItem,
};
pub use transforms::{Interpolation, PinholeTransform, TransformEngine, TransformError};
pub use writers::{OutputLayout, WriteError};
