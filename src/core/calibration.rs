//! Per-recording sensor calibration.
//!
//! A [`CalibrationModel`] holds the intrinsics, extrinsics and resolution of
//! the depth and color cameras of one recording. It is immutable once loaded
//! and is consumed by the transform engine at construction time.
//!
//! The on-disk form is the JSON document also produced by the `calibration`
//! command:
//!
//! ```text
//! { "depth_camera": { "intrinsics": {...}, "extrinsics": {...}, ... },
//!   "color_camera": { ... } }
//! ```

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of values in the flat intrinsic parameter vector.
pub const INTRINSIC_PARAMETER_COUNT: usize = 14;

/// Tolerance on `det(R) - 1` when validating rotation matrices.
const ROTATION_DET_TOLERANCE: f64 = 1e-3;

/// Errors raised while loading or validating calibration data.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("failed to read calibration '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse calibration '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{camera} camera calibration is invalid: {reason}")]
    Invalid { camera: &'static str, reason: String },

    #[error("no calibration available: {0}")]
    Unavailable(String),
}

/// Result type for calibration operations.
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Named intrinsic parameters in the 14-value rational lens layout.
///
/// Field order matches the flat parameter vector:
/// `cx, cy, fx, fy, k1..k6, codx, cody, p2, p1`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IntrinsicParams {
    pub cx: f64,
    pub cy: f64,
    pub fx: f64,
    pub fy: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
    pub codx: f64,
    pub cody: f64,
    pub p2: f64,
    pub p1: f64,
}

impl IntrinsicParams {
    /// Pinhole-only parameters with no lens distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            ..Self::default()
        }
    }

    /// Flat parameter vector in storage order.
    pub fn as_array(&self) -> [f64; INTRINSIC_PARAMETER_COUNT] {
        [
            self.cx, self.cy, self.fx, self.fy, self.k1, self.k2, self.k3, self.k4, self.k5,
            self.k6, self.codx, self.cody, self.p2, self.p1,
        ]
    }

    /// Build from a flat parameter vector. Returns `None` if `values` is too short.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() < INTRINSIC_PARAMETER_COUNT {
            return None;
        }
        Some(Self {
            cx: values[0],
            cy: values[1],
            fx: values[2],
            fy: values[3],
            k1: values[4],
            k2: values[5],
            k3: values[6],
            k4: values[7],
            k5: values[8],
            k6: values[9],
            codx: values[10],
            cody: values[11],
            p2: values[12],
            p1: values[13],
        })
    }

    /// Pinhole camera matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Distortion coefficients in `(k1, k2, p1, p2, k3, k4, k5, k6)` order.
    pub fn distortion_coefficients(&self) -> [f64; 8] {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
    }
}

/// Lens model description for one camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Vendor lens model identifier (4 = rational 6KT Brown-Conrady).
    pub model_type: u32,
    /// Number of meaningful entries in the parameter vector.
    pub parameter_count: u32,
    pub params: IntrinsicParams,
}

/// Rigid transform from the reference (depth) frame into a camera frame.
///
/// `rotation` is row-major, `translation_mm` is in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub rotation: [f64; 9],
    pub translation_mm: [f64; 3],
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation_mm: [0.0; 3],
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.rotation)
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::from_row_slice(&self.translation_mm)
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

/// Calibration of a single physical camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCalibration {
    pub intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
    pub resolution_width: u32,
    pub resolution_height: u32,
    pub metric_radius: f64,
}

impl CameraCalibration {
    /// Number of pixels at the calibrated resolution.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.resolution_width as usize * self.resolution_height as usize
    }

    fn validate(&self, camera: &'static str) -> Result<()> {
        let invalid = |reason: String| CalibrationError::Invalid { camera, reason };
        let p = &self.intrinsics.params;

        if self.resolution_width == 0 || self.resolution_height == 0 {
            return Err(invalid(format!(
                "resolution {}x{} is empty",
                self.resolution_width, self.resolution_height
            )));
        }
        if !(p.fx.is_finite() && p.fy.is_finite() && p.fx > 0.0 && p.fy > 0.0) {
            return Err(invalid(format!(
                "focal lengths must be positive (fx={}, fy={})",
                p.fx, p.fy
            )));
        }
        if p.as_array().iter().any(|v| !v.is_finite()) {
            return Err(invalid("intrinsic parameters contain non-finite values".into()));
        }
        if self
            .extrinsics
            .rotation
            .iter()
            .chain(self.extrinsics.translation_mm.iter())
            .any(|v| !v.is_finite())
        {
            return Err(invalid("extrinsics contain non-finite values".into()));
        }
        let det = self.extrinsics.rotation_matrix().determinant();
        if (det - 1.0).abs() > ROTATION_DET_TOLERANCE {
            return Err(invalid(format!("rotation determinant is {det:.6}, expected 1")));
        }
        Ok(())
    }
}

/// Geometric model of a recording: depth and color camera calibrations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationModel {
    pub depth: CameraCalibration,
    pub color: CameraCalibration,
}

impl CalibrationModel {
    /// Check that both cameras describe a usable geometry.
    pub fn validate(&self) -> Result<()> {
        self.depth.validate("depth")?;
        self.color.validate("color")
    }

    /// Rigid transform taking points in the depth camera frame into the
    /// color camera frame, as `(R, t)` with `t` in millimetres.
    pub fn depth_to_color(&self) -> (Matrix3<f64>, Vector3<f64>) {
        let r_d = self.depth.extrinsics.rotation_matrix();
        let t_d = self.depth.extrinsics.translation();
        let r_c = self.color.extrinsics.rotation_matrix();
        let t_c = self.color.extrinsics.translation();

        let rotation = r_c * r_d.transpose();
        let translation = t_c - rotation * t_d;
        (rotation, translation)
    }

    /// Load a model from a calibration JSON document.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CalibrationError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&content).map_err(|e| match e {
            CalibrationError::Parse { source, .. } => CalibrationError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse a model from a calibration JSON string.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: CalibrationDocument =
            serde_json::from_str(content).map_err(|e| CalibrationError::Parse {
                path: "<memory>".to_string(),
                source: e,
            })?;
        document.into_model()
    }

    /// Render the model as a pretty-printed calibration JSON document.
    pub fn to_json_string(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&CalibrationDocument::from_model(self))
    }
}

/// Serialized calibration, one entry per camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDocument {
    pub depth_camera: CameraDocument,
    pub color_camera: CameraDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDocument {
    pub intrinsics: IntrinsicsDocument,
    pub extrinsics: ExtrinsicsDocument,
    pub resolution_width: u32,
    pub resolution_height: u32,
    #[serde(default)]
    pub metric_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicsDocument {
    #[serde(rename = "type")]
    pub model_type: u32,
    pub parameter_count: u32,
    pub parameters: ParametersDocument,
}

/// Intrinsic parameters, by name and as the flat vector.
///
/// When reading, the named form wins if both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersDocument {
    #[serde(default)]
    pub parameters_as_dict: Option<IntrinsicParams>,
    #[serde(default)]
    pub parameters_as_list: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrinsicsDocument {
    pub rotation: Vec<f64>,
    pub translation_in_meters: Vec<f64>,
}

impl CalibrationDocument {
    pub fn from_model(model: &CalibrationModel) -> Self {
        Self {
            depth_camera: CameraDocument::from_camera(&model.depth),
            color_camera: CameraDocument::from_camera(&model.color),
        }
    }

    pub fn into_model(self) -> Result<CalibrationModel> {
        Ok(CalibrationModel {
            depth: self.depth_camera.into_camera("depth")?,
            color: self.color_camera.into_camera("color")?,
        })
    }
}

impl CameraDocument {
    fn from_camera(camera: &CameraCalibration) -> Self {
        let params = camera.intrinsics.params;
        Self {
            intrinsics: IntrinsicsDocument {
                model_type: camera.intrinsics.model_type,
                parameter_count: camera.intrinsics.parameter_count,
                parameters: ParametersDocument {
                    parameters_as_dict: Some(params),
                    parameters_as_list: params.as_array().to_vec(),
                },
            },
            extrinsics: ExtrinsicsDocument {
                rotation: camera.extrinsics.rotation.to_vec(),
                translation_in_meters: camera
                    .extrinsics
                    .translation_mm
                    .iter()
                    .map(|t| t / 1000.0)
                    .collect(),
            },
            resolution_width: camera.resolution_width,
            resolution_height: camera.resolution_height,
            metric_radius: camera.metric_radius,
        }
    }

    fn into_camera(self, camera: &'static str) -> Result<CameraCalibration> {
        let invalid = |reason: String| CalibrationError::Invalid { camera, reason };

        let params = match self.intrinsics.parameters.parameters_as_dict {
            Some(params) => params,
            None => IntrinsicParams::from_slice(&self.intrinsics.parameters.parameters_as_list)
                .ok_or_else(|| {
                    invalid(format!(
                        "expected {} intrinsic parameters, found {}",
                        INTRINSIC_PARAMETER_COUNT,
                        self.intrinsics.parameters.parameters_as_list.len()
                    ))
                })?,
        };

        let rotation: [f64; 9] = self.extrinsics.rotation.as_slice().try_into().map_err(|_| {
            invalid(format!(
                "rotation must have 9 entries, found {}",
                self.extrinsics.rotation.len()
            ))
        })?;
        let translation_m: [f64; 3] = self
            .extrinsics
            .translation_in_meters
            .as_slice()
            .try_into()
            .map_err(|_| {
                invalid(format!(
                    "translation must have 3 entries, found {}",
                    self.extrinsics.translation_in_meters.len()
                ))
            })?;

        Ok(CameraCalibration {
            intrinsics: Intrinsics {
                model_type: self.intrinsics.model_type,
                parameter_count: self.intrinsics.parameter_count,
                params,
            },
            extrinsics: Extrinsics {
                rotation,
                translation_mm: translation_m.map(|t| t * 1000.0),
            },
            resolution_width: self.resolution_width,
            resolution_height: self.resolution_height,
            metric_radius: self.metric_radius,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(width: u32, height: u32) -> CameraCalibration {
        CameraCalibration {
            intrinsics: Intrinsics {
                model_type: 4,
                parameter_count: 14,
                params: IntrinsicParams {
                    k1: 0.1,
                    p1: -0.001,
                    ..IntrinsicParams::pinhole(500.0, 505.0, 320.0, 240.0)
                },
            },
            extrinsics: Extrinsics::identity(),
            resolution_width: width,
            resolution_height: height,
            metric_radius: 1.7,
        }
    }

    #[test]
    fn test_parameter_vector_order() {
        let params = camera(640, 480).intrinsics.params;
        let flat = params.as_array();
        assert_eq!(flat[0], 320.0);
        assert_eq!(flat[2], 500.0);
        assert_eq!(flat[4], 0.1);
        assert_eq!(flat[13], -0.001);
        assert_eq!(IntrinsicParams::from_slice(&flat), Some(params));
        assert!(IntrinsicParams::from_slice(&flat[..10]).is_none());
    }

    #[test]
    fn test_distortion_coefficients_order() {
        let params = IntrinsicParams {
            k1: 1.0,
            k2: 2.0,
            p1: 3.0,
            p2: 4.0,
            k3: 5.0,
            k4: 6.0,
            k5: 7.0,
            k6: 8.0,
            ..IntrinsicParams::default()
        };
        assert_eq!(
            params.distortion_coefficients(),
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_json_document_round_trip() {
        let mut color = camera(1280, 720);
        color.extrinsics.translation_mm = [-32.0, -1.5, 4.0];
        let model = CalibrationModel {
            depth: camera(640, 576),
            color,
        };

        let json = model.to_json_string().unwrap();
        assert!(json.contains("\"translation_in_meters\""));
        assert!(json.contains("\"parameters_as_list\""));

        let parsed = CalibrationModel::from_json_str(&json).unwrap();
        assert_eq!(parsed.color.resolution_width, 1280);
        assert!((parsed.color.extrinsics.translation_mm[0] + 32.0).abs() < 1e-9);
        assert_eq!(parsed.depth.intrinsics.params, model.depth.intrinsics.params);
    }

    #[test]
    fn test_parameters_from_list_only() {
        let json = r#"{
            "depth_camera": {
                "intrinsics": {"type": 4, "parameter_count": 14,
                    "parameters": {"parameters_as_list": [1,2,3,4,5,6,7,8,9,10,11,12,13,14]}},
                "extrinsics": {"rotation": [1,0,0,0,1,0,0,0,1], "translation_in_meters": [0,0,0]},
                "resolution_width": 4, "resolution_height": 4
            },
            "color_camera": {
                "intrinsics": {"type": 4, "parameter_count": 14,
                    "parameters": {"parameters_as_list": [1,2,3,4,5,6,7,8,9,10,11,12,13,14]}},
                "extrinsics": {"rotation": [1,0,0,0,1,0,0,0,1], "translation_in_meters": [0.001,0,0]},
                "resolution_width": 4, "resolution_height": 4
            }
        }"#;
        let model = CalibrationModel::from_json_str(json).unwrap();
        assert_eq!(model.depth.intrinsics.params.fx, 3.0);
        assert_eq!(model.depth.intrinsics.params.p1, 14.0);
        assert!((model.color.extrinsics.translation_mm[0] - 1.0).abs() < 1e-9);
        assert_eq!(model.depth.metric_radius, 0.0);
    }

    #[test]
    fn test_short_rotation_rejected() {
        let json = r#"{
            "depth_camera": {
                "intrinsics": {"type": 4, "parameter_count": 14,
                    "parameters": {"parameters_as_list": [1,2,3,4,5,6,7,8,9,10,11,12,13,14]}},
                "extrinsics": {"rotation": [1,0,0], "translation_in_meters": [0,0,0]},
                "resolution_width": 4, "resolution_height": 4
            },
            "color_camera": {
                "intrinsics": {"type": 4, "parameter_count": 14,
                    "parameters": {"parameters_as_list": [1,2,3,4,5,6,7,8,9,10,11,12,13,14]}},
                "extrinsics": {"rotation": [1,0,0,0,1,0,0,0,1], "translation_in_meters": [0,0,0]},
                "resolution_width": 4, "resolution_height": 4
            }
        }"#;
        match CalibrationModel::from_json_str(json) {
            Err(CalibrationError::Invalid { camera, .. }) => assert_eq!(camera, "depth"),
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_degenerate_models() {
        let mut model = CalibrationModel {
            depth: camera(640, 576),
            color: camera(1280, 720),
        };
        assert!(model.validate().is_ok());

        model.color.intrinsics.params.fx = 0.0;
        assert!(matches!(
            model.validate(),
            Err(CalibrationError::Invalid { camera: "color", .. })
        ));

        model.color.intrinsics.params.fx = 500.0;
        model.depth.resolution_height = 0;
        assert!(matches!(
            model.validate(),
            Err(CalibrationError::Invalid { camera: "depth", .. })
        ));

        model.depth.resolution_height = 576;
        model.depth.extrinsics.rotation = [2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_depth_to_color_composes_extrinsics() {
        let mut model = CalibrationModel {
            depth: camera(640, 576),
            color: camera(1280, 720),
        };
        model.depth.extrinsics.translation_mm = [10.0, 0.0, 0.0];
        model.color.extrinsics.translation_mm = [-22.0, 0.0, 0.0];

        let (r, t) = model.depth_to_color();
        assert!((r - Matrix3::identity()).norm() < 1e-12);
        // Depth origin sits at -10mm in the reference frame, so it lands at -32mm in color.
        assert!((t.x + 32.0).abs() < 1e-12);
        assert_eq!(t.y, 0.0);
    }
}
