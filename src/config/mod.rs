//! Configuration types for the frame extractor.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::transforms::Interpolation;
use crate::processors::batch::Scheduling;
use crate::processors::frame::ExtractionMode;

/// Configuration for the batched extraction loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Frame pairs pulled per batch; one reprojection buffer per slot
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,

    /// Worker threads (defaults to the available hardware parallelism)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Distribution of a batch over the workers
    #[serde(default)]
    pub scheduling: Scheduling,

    /// JPEG quality for undistorted color frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Output mode
    #[serde(default)]
    pub mode: ExtractionMode,
}

fn default_batch_capacity() -> usize {
    256
}

fn default_jpeg_quality() -> u8 {
    96
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_capacity: default_batch_capacity(),
            workers: None,
            scheduling: Scheduling::default(),
            jpeg_quality: default_jpeg_quality(),
            mode: ExtractionMode::default(),
        }
    }
}

impl ExtractionConfig {
    /// Check value ranges, describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_capacity == 0 {
            return Err("batch_capacity must be at least 1".to_string());
        }
        if self.workers == Some(0) {
            return Err("workers must be at least 1".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!(
                "jpeg_quality must be within 1-100, got {}",
                self.jpeg_quality
            ));
        }
        Ok(())
    }
}

/// Configuration for lens undistortion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UndistortConfig {
    /// Sampling used for depth images
    #[serde(default)]
    pub depth_interpolation: Interpolation,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub undistort: UndistortConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction.batch_capacity, 256);
        assert_eq!(config.extraction.jpeg_quality, 96);
        assert_eq!(config.extraction.workers, None);
        assert_eq!(config.extraction.scheduling, Scheduling::Static);
        assert_eq!(config.extraction.mode, ExtractionMode::Undistort);
        assert_eq!(config.undistort.depth_interpolation, Interpolation::Nearest);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "extraction:\n  batch_capacity: 16\n  scheduling: work_stealing\n  mode: raw\n",
        )
        .unwrap();

        let config = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(config.extraction.batch_capacity, 16);
        assert_eq!(config.extraction.scheduling, Scheduling::WorkStealing);
        assert_eq!(config.extraction.mode, ExtractionMode::Raw);
        assert_eq!(config.extraction.jpeg_quality, 96);
        assert_eq!(config.undistort, UndistortConfig::default());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = PipelineConfig::default();
        config.extraction.workers = Some(3);
        config.undistort.depth_interpolation = Interpolation::Bilinear;

        config.to_yaml(&path).unwrap();
        assert_eq!(PipelineConfig::from_yaml(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = ExtractionConfig::default();
        assert!(config.validate().is_ok());

        config.batch_capacity = 0;
        assert!(config.validate().is_err());

        config = ExtractionConfig {
            workers: Some(0),
            ..ExtractionConfig::default()
        };
        assert!(config.validate().is_err());

        config = ExtractionConfig {
            jpeg_quality: 0,
            ..ExtractionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
