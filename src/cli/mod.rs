//! Command-line interface for the frame extractor.

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::recording::{FrameDirectoryReader, RecordingReader};
use crate::core::transforms::Interpolation;
use crate::core::writers;
use crate::processors::extraction::{self, ExtractError, ExtractionSummary};
use crate::processors::{imu, timestamps, ExtractionMode, Scheduling};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "frame-extractor")]
#[command(about = "Depth/color frame extraction from sensor recordings", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract color and depth frames as image files
    Extract {
        /// Recording directory (calibration.json + captures.csv)
        input: PathBuf,
        /// Output directory; color/ and depth/ are created inside
        output: PathBuf,
        /// Output mode
        #[arg(short, long, value_enum)]
        mode: Option<ExtractionMode>,
        /// Frame pairs per batch
        #[arg(long)]
        batch_capacity: Option<usize>,
        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,
        /// Batch scheduling strategy
        #[arg(long, value_enum)]
        scheduling: Option<Scheduling>,
        /// JPEG quality for undistorted color frames
        #[arg(long)]
        jpeg_quality: Option<u8>,
        /// Blend neighbouring depth samples when undistorting
        #[arg(long)]
        bilinear_depth: bool,
    },

    /// Dump the recording calibration as JSON
    Calibration {
        /// Recording directory
        input: PathBuf,
        /// Output JSON file
        output: PathBuf,
    },

    /// Export color, depth and IR device timestamps as CSV
    Timestamps {
        /// Recording directory
        input: PathBuf,
        /// Output directory for the timestamp CSVs
        output_dir: PathBuf,
    },

    /// Export gyroscope and accelerometer samples as CSV
    Imu {
        /// Recording directory
        input: PathBuf,
        /// Output CSV file
        #[arg(default_value = imu::IMU_EXPORT_FILE)]
        output: PathBuf,
    },
}

/// Flag overrides for the extraction config.
struct ExtractOverrides {
    mode: Option<ExtractionMode>,
    batch_capacity: Option<usize>,
    workers: Option<usize>,
    scheduling: Option<Scheduling>,
    jpeg_quality: Option<u8>,
    bilinear_depth: bool,
}

impl ExtractOverrides {
    fn apply(self, config: &mut PipelineConfig) {
        let extraction = &mut config.extraction;
        if let Some(mode) = self.mode {
            extraction.mode = mode;
        }
        if let Some(capacity) = self.batch_capacity {
            extraction.batch_capacity = capacity;
        }
        if self.workers.is_some() {
            extraction.workers = self.workers;
        }
        if let Some(scheduling) = self.scheduling {
            extraction.scheduling = scheduling;
        }
        if let Some(quality) = self.jpeg_quality {
            extraction.jpeg_quality = quality;
        }
        if self.bilinear_depth {
            config.undistort.depth_interpolation = Interpolation::Bilinear;
        }
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Defaults when no file is given, otherwise the parsed file.
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let config = PipelineConfig::from_yaml(path)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded config from: {}", path.display());
    Ok(config)
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config; an unreadable file given explicitly is fatal
    let mut config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Extract {
            input,
            output,
            mode,
            batch_capacity,
            workers,
            scheduling,
            jpeg_quality,
            bilinear_depth,
        } => {
            ExtractOverrides {
                mode,
                batch_capacity,
                workers,
                scheduling,
                jpeg_quality,
                bilinear_depth,
            }
            .apply(&mut config);
            cmd_extract(&input, &output, &config);
        }
        Commands::Calibration { input, output } => {
            cmd_calibration(&input, &output);
        }
        Commands::Timestamps { input, output_dir } => {
            cmd_timestamps(&input, &output_dir);
        }
        Commands::Imu { input, output } => {
            cmd_imu(&input, &output);
        }
    }
}

fn summary_items(
    input: &Path,
    output: &Path,
    mode: ExtractionMode,
    summary: &ExtractionSummary,
) -> Vec<(&'static str, String)> {
    vec![
        ("Recording", input.display().to_string()),
        ("Output directory", output.display().to_string()),
        ("Mode", format!("{:?}", mode)),
        ("Batches", summary.batches.to_string()),
        ("Frames", summary.frames.to_string()),
        ("Written", summary.success.to_string()),
        ("Skipped (incomplete)", summary.skipped.to_string()),
        ("Transform failures", summary.transform_failed.to_string()),
        ("I/O failures", summary.io_failed.to_string()),
        ("Throughput", format!("{:.1} fps", summary.fps())),
        ("Duration", format!("{:.2?}", summary.elapsed)),
    ]
}

fn cmd_extract(input: &Path, output: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    println!("Extracting frames...");
    println!("Recording: {}", input.display());
    println!("Output directory: {}", output.display());

    let spinner = create_spinner("Processing batches...");
    let mode = config.extraction.mode;

    let result = extraction::extract_recording(input, output, config, |report| {
        spinner.set_message(format!(
            "Batch {}: {} frames ({:.1} fps)",
            report.index + 1,
            report.frames,
            report.fps()
        ));
    });
    spinner.finish_and_clear();

    match result {
        Ok(summary) => {
            print_summary(
                "Extraction Complete",
                &summary_items(input, output, mode, &summary),
            );
            if summary.failed() > 0 {
                warn!(
                    "{} of {} frames failed; run with -v for per-frame details",
                    summary.failed(),
                    summary.frames
                );
            }
        }
        Err(ExtractError::Interrupted { source, completed }) => {
            print_summary(
                "Extraction Interrupted",
                &summary_items(input, output, mode, &completed),
            );
            error!("Reading the recording failed: {}", source);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Extraction failed after {:.2?}: {}", start.elapsed(), e);
            std::process::exit(1);
        }
    }
}

fn cmd_calibration(input: &Path, output: &Path) {
    let start = Instant::now();

    let model = match FrameDirectoryReader::open(input).and_then(|reader| reader.calibration()) {
        Ok(model) => model,
        Err(e) => {
            error!("Failed to load calibration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = writers::write_calibration_json(output, &model) {
        error!("Failed to write calibration: {}", e);
        std::process::exit(1);
    }

    print_summary(
        "Calibration Dump Complete",
        &[
            ("Recording", input.display().to_string()),
            ("Output file", output.display().to_string()),
            (
                "Depth camera",
                format!(
                    "{}x{}",
                    model.depth.resolution_width, model.depth.resolution_height
                ),
            ),
            (
                "Color camera",
                format!(
                    "{}x{}",
                    model.color.resolution_width, model.color.resolution_height
                ),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_timestamps(input: &Path, output_dir: &Path) {
    let start = Instant::now();

    let spinner = create_spinner("Reading capture timestamps...");
    let result = FrameDirectoryReader::open(input)
        .map_err(anyhow::Error::from)
        .and_then(|mut reader| timestamps::export_timestamps(&mut reader, output_dir));
    spinner.finish_and_clear();

    match result {
        Ok(counts) => {
            print_summary(
                "Timestamp Export Complete",
                &[
                    ("Recording", input.display().to_string()),
                    ("Output directory", output_dir.display().to_string()),
                    ("Captures", counts.captures.to_string()),
                    ("Color timestamps", counts.color.to_string()),
                    ("Depth timestamps", counts.depth.to_string()),
                    ("IR timestamps", counts.ir.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("Timestamp export failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_imu(input: &Path, output: &Path) {
    let start = Instant::now();

    let spinner = create_spinner("Reading IMU samples...");
    let result = FrameDirectoryReader::open(input)
        .map_err(anyhow::Error::from)
        .and_then(|mut reader| imu::export_imu(&mut reader, output));
    spinner.finish_and_clear();

    match result {
        Ok(samples) => {
            print_summary(
                "IMU Export Complete",
                &[
                    ("Recording", input.display().to_string()),
                    ("Output file", output.display().to_string()),
                    ("Samples", samples.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("IMU export failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_extract_overrides() {
        let cli = Cli::try_parse_from([
            "frame-extractor",
            "-vv",
            "extract",
            "in",
            "out",
            "--mode",
            "raw",
            "--workers",
            "3",
            "--scheduling",
            "work-stealing",
            "--bilinear-depth",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let Commands::Extract {
            mode,
            batch_capacity,
            workers,
            scheduling,
            jpeg_quality,
            bilinear_depth,
            ..
        } = cli.command
        else {
            panic!("Expected extract command");
        };

        let mut config = PipelineConfig::default();
        ExtractOverrides {
            mode,
            batch_capacity,
            workers,
            scheduling,
            jpeg_quality,
            bilinear_depth,
        }
        .apply(&mut config);

        assert_eq!(config.extraction.mode, ExtractionMode::Raw);
        assert_eq!(config.extraction.workers, Some(3));
        assert_eq!(config.extraction.scheduling, Scheduling::WorkStealing);
        assert_eq!(config.extraction.batch_capacity, 256);
        assert_eq!(config.extraction.jpeg_quality, 96);
        assert_eq!(config.undistort.depth_interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn test_cli_requires_paths() {
        assert!(Cli::try_parse_from(["frame-extractor", "extract", "in"]).is_err());
        assert!(Cli::try_parse_from(["frame-extractor", "timestamps"]).is_err());
        assert!(Cli::try_parse_from(["frame-extractor", "imu"]).is_err());
    }

    #[test]
    fn test_bad_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "extraction: [not, a, mapping]\n").unwrap();

        let err = load_config(Some(path.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to load config"));
        assert!(load_config(Some(dir.path().join("missing.yaml").as_path())).is_err());
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_cli_imu_output_defaults() {
        let cli = Cli::try_parse_from(["frame-extractor", "imu", "rec"]).unwrap();
        let Commands::Imu { input, output } = cli.command else {
            panic!("Expected imu command");
        };
        assert_eq!(input, PathBuf::from("rec"));
        assert_eq!(output, PathBuf::from("imu.csv"));
    }
}
