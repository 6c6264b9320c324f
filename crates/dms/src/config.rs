//! DMS configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ear::EyePolicy;
use crate::DmsError;

/// Thresholds for one drowsiness level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    /// EAR below which the eyes count as closed for this level
    pub ear_threshold: f64,
    /// Closed time required before the level fires (seconds)
    pub duration_threshold: f64,
    /// Text spoken when the level fires
    pub message: String,
}

/// No-face alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoFaceConfig {
    /// Seconds between repeated no-face alerts
    pub alert_interval: f64,
    pub message: String,
}

/// DMS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmsConfig {
    /// Normal drowsiness level
    pub normal: LevelThresholds,

    /// Extreme drowsiness level
    pub extreme: LevelThresholds,

    /// Consecutive below-threshold frames required in addition to the duration
    pub consecutive_frames_threshold: u32,

    /// Face detection confidence threshold
    pub face_confidence: f32,

    /// How a frame with only one visible eye is scored
    pub eye_policy: EyePolicy,

    pub no_face: NoFaceConfig,

    /// Nominal seconds between frames, used when no previous frame is known
    pub frame_interval: f64,

    /// Model paths
    pub face_model_path: PathBuf,
    pub landmark_model_path: PathBuf,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            normal: LevelThresholds {
                ear_threshold: 0.3,
                duration_threshold: 1.5,
                message: "Hey, are you awake?".to_string(),
            },
            extreme: LevelThresholds {
                ear_threshold: 0.25,
                duration_threshold: 0.8,
                message: "Alert! Wake up now!".to_string(),
            },
            consecutive_frames_threshold: 10,
            face_confidence: 0.5,
            eye_policy: EyePolicy::Either,
            no_face: NoFaceConfig {
                alert_interval: 5.0,
                message: "No face detected! Please position yourself in front of the camera."
                    .to_string(),
            },
            frame_interval: 1.0 / 30.0,
            face_model_path: PathBuf::from("models/face_detector.onnx"),
            landmark_model_path: PathBuf::from("models/landmarks_68.onnx"),
        }
    }
}

impl DmsConfig {
    /// Check value ranges; called once at load time
    pub fn validate(&self) -> Result<(), DmsError> {
        check_unit("drowsiness.normal.ear_threshold", self.normal.ear_threshold)?;
        check_unit("drowsiness.extreme.ear_threshold", self.extreme.ear_threshold)?;
        check_unit("detection.face_confidence", self.face_confidence as f64)?;
        check_positive(
            "drowsiness.normal.duration_threshold",
            self.normal.duration_threshold,
        )?;
        check_positive(
            "drowsiness.extreme.duration_threshold",
            self.extreme.duration_threshold,
        )?;
        check_positive("face_detection.alert_interval", self.no_face.alert_interval)?;
        check_positive("frame interval", self.frame_interval)?;

        if self.extreme.ear_threshold > self.normal.ear_threshold {
            return Err(DmsError::Config(format!(
                "drowsiness.extreme.ear_threshold ({}) must not exceed drowsiness.normal.ear_threshold ({})",
                self.extreme.ear_threshold, self.normal.ear_threshold
            )));
        }

        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), DmsError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DmsError::Config(format!(
            "{} value {} is out of range [0, 1]",
            field, value
        )));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), DmsError> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(DmsError::Config(format!(
            "{} must be a positive number of seconds, got {}",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DmsConfig::default().validate().unwrap();
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = DmsConfig::default();
        config.normal.ear_threshold = 1.2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drowsiness.normal.ear_threshold"));
    }

    #[test]
    fn test_non_positive_duration() {
        let mut config = DmsConfig::default();
        config.extreme.duration_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = DmsConfig::default();
        config.no_face.alert_interval = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extreme_above_normal_rejected() {
        let mut config = DmsConfig::default();
        config.extreme.ear_threshold = 0.35;
        assert!(matches!(config.validate(), Err(DmsError::Config(_))));
    }
}
