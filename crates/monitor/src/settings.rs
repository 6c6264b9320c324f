//! Typed application settings
//!
//! Loaded once from a YAML file (plus `DROWSY__SECTION__KEY` environment
//! overrides), validated, then split into the per-component configs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use alerting::{AlertConfig, ClipMessages};
use camera_capture::CameraConfig;
use dms::{DmsConfig, DmsError, EyePolicy, LevelThresholds, NoFaceConfig};
use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "DROWSY";
const ENV_SEPARATOR: &str = "__";

/// Settings error types
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Dms(#[from] DmsError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub device_id: i32,
    /// [width, height]
    pub resolution: [u32; 2],
    pub fps: u32,
    pub open_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_id: 0,
            resolution: [640, 480],
            fps: 30,
            open_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub face_confidence: f32,
    /// Used when `drowsiness.normal.ear_threshold` is not set
    pub eye_aspect_ratio_threshold: f64,
    pub consecutive_frames_threshold: u32,
    pub eye_policy: EyePolicy,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            face_confidence: 0.5,
            eye_aspect_ratio_threshold: 0.3,
            consecutive_frames_threshold: 10,
            eye_policy: EyePolicy::Either,
        }
    }
}

/// One alert level; unset keys take that level's defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LevelSettings {
    pub ear_threshold: Option<f64>,
    pub duration_threshold: Option<f64>,
    pub message: Option<String>,
}

impl LevelSettings {
    fn resolve(&self, defaults: LevelThresholds) -> LevelThresholds {
        LevelThresholds {
            ear_threshold: self.ear_threshold.unwrap_or(defaults.ear_threshold),
            duration_threshold: self.duration_threshold.unwrap_or(defaults.duration_threshold),
            message: self.message.clone().unwrap_or(defaults.message),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DrowsinessSettings {
    pub normal: LevelSettings,
    pub extreme: LevelSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub volume: f32,
    /// Seconds between repeats of the normal alert
    pub repeat_interval: f64,
    pub success_message: String,
    pub audio_dir: PathBuf,
    pub player: String,
    pub synthesizer: String,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            volume: 0.8,
            repeat_interval: 5.0,
            success_message: "Great! You're awake now. Stay alert.".to_string(),
            audio_dir: PathBuf::from("audio"),
            player: "ffplay".to_string(),
            synthesizer: "espeak-ng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceDetectionSettings {
    pub alert_interval: f64,
    pub message: String,
}

impl Default for FaceDetectionSettings {
    fn default() -> Self {
        Self {
            alert_interval: 5.0,
            message: "No face detected! Please position yourself in front of the camera."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub face_detector: PathBuf,
    pub landmarks: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("models/face_detector.onnx"),
            landmarks: PathBuf::from("models/landmarks_68.onnx"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `dms=debug,info`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Whole configuration document. Unknown sections (such as `gemini`) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub drowsiness: DrowsinessSettings,
    pub alerts: AlertSettings,
    pub face_detection: FaceDetectionSettings,
    pub models: ModelSettings,
    pub logging: LoggingSettings,
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

impl Settings {
    /// Load and validate the YAML file at `path`
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: &Path, env: config::Environment) -> Result<Self, SettingsError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(env)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Apply a command-line camera index over `camera.device_id`
    pub fn with_camera(mut self, device_id: Option<i32>) -> Self {
        if let Some(device_id) = device_id {
            self.camera.device_id = device_id;
        }
        self
    }

    /// Range checks for everything the components do not check themselves
    pub fn validate(&self) -> Result<(), SettingsError> {
        let [width, height] = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err(SettingsError::Invalid(format!(
                "camera.resolution {}x{} must be non-zero",
                width, height
            )));
        }
        if self.camera.fps == 0 {
            return Err(SettingsError::Invalid("camera.fps must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.alerts.volume) {
            return Err(SettingsError::Invalid(format!(
                "alerts.volume value {} is out of range [0, 1]",
                self.alerts.volume
            )));
        }
        if !(self.alerts.repeat_interval > 0.0 && self.alerts.repeat_interval.is_finite()) {
            return Err(SettingsError::Invalid(format!(
                "alerts.repeat_interval must be a positive number of seconds, got {}",
                self.alerts.repeat_interval
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.eye_aspect_ratio_threshold) {
            return Err(SettingsError::Invalid(format!(
                "detection.eye_aspect_ratio_threshold value {} is out of range [0, 1]",
                self.detection.eye_aspect_ratio_threshold
            )));
        }

        self.dms_config().validate()?;
        Ok(())
    }

    pub fn camera_config(&self) -> CameraConfig {
        let [width, height] = self.camera.resolution;
        CameraConfig {
            device_id: self.camera.device_id,
            width,
            height,
            fps: self.camera.fps,
            open_retries: self.camera.open_retries,
            retry_delay: Duration::from_millis(self.camera.retry_delay_ms),
        }
    }

    pub fn dms_config(&self) -> DmsConfig {
        let defaults = DmsConfig::default();
        // The legacy detection key only stands in for the normal threshold
        let normal = LevelThresholds {
            ear_threshold: self.detection.eye_aspect_ratio_threshold,
            ..defaults.normal
        };

        DmsConfig {
            normal: self.drowsiness.normal.resolve(normal),
            extreme: self.drowsiness.extreme.resolve(defaults.extreme),
            consecutive_frames_threshold: self.detection.consecutive_frames_threshold,
            face_confidence: self.detection.face_confidence,
            eye_policy: self.detection.eye_policy,
            no_face: NoFaceConfig {
                alert_interval: self.face_detection.alert_interval,
                message: self.face_detection.message.clone(),
            },
            frame_interval: 1.0 / self.camera.fps.max(1) as f64,
            face_model_path: self.models.face_detector.clone(),
            landmark_model_path: self.models.landmarks.clone(),
        }
    }

    pub fn alert_config(&self) -> AlertConfig {
        AlertConfig {
            volume: self.alerts.volume,
            repeat_interval: Duration::from_secs_f64(self.alerts.repeat_interval),
        }
    }

    pub fn clip_messages(&self) -> ClipMessages {
        let dms = self.dms_config();
        ClipMessages {
            normal: dms.normal.message,
            extreme: dms.extreme.message,
            no_face: dms.no_face.message,
            success: self.alerts.success_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
camera:
  device_id: 1
  resolution: [1280, 720]
  fps: 15
detection:
  face_confidence: 0.6
  eye_aspect_ratio_threshold: 0.28
  consecutive_frames_threshold: 5
drowsiness:
  normal:
    duration_threshold: 2.0
    message: "Stay with me"
  extreme:
    ear_threshold: 0.2
    duration_threshold: 1.0
    message: "Wake up!"
alerts:
  volume: 0.5
face_detection:
  alert_interval: 3
  message: "Where are you?"
gemini:
  api_key: "unused"
  api_url: "https://example.invalid"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample() {
        let file = write_config(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();

        let camera = settings.camera_config();
        assert_eq!(camera.device_id, 1);
        assert_eq!((camera.width, camera.height, camera.fps), (1280, 720, 15));

        let dms = settings.dms_config();
        // Falls back to the legacy detection threshold
        assert_eq!(dms.normal.ear_threshold, 0.28);
        assert_eq!(dms.normal.duration_threshold, 2.0);
        assert_eq!(dms.extreme.ear_threshold, 0.2);
        assert_eq!(dms.consecutive_frames_threshold, 5);
        assert_eq!(dms.no_face.alert_interval, 3.0);
        assert!((dms.frame_interval - 1.0 / 15.0).abs() < 1e-12);

        assert_eq!(settings.alert_config().volume, 0.5);
        assert_eq!(settings.alert_config().repeat_interval, Duration::from_secs(5));
        assert_eq!(settings.clip_messages().no_face, "Where are you?");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_level_sections_use_level_defaults() {
        let file = write_config(
            "drowsiness:\n  normal:\n    ear_threshold: 0.32\n    message: hi\n  extreme:\n    duration_threshold: 1.2\n",
        );
        let dms = Settings::load(file.path()).unwrap().dms_config();

        assert_eq!(dms.normal.ear_threshold, 0.32);
        assert_eq!(dms.normal.duration_threshold, 1.5);
        assert_eq!(dms.normal.message, "hi");

        // Extreme keeps its own threshold rather than the legacy detection one
        assert_eq!(dms.extreme.ear_threshold, 0.25);
        assert_eq!(dms.extreme.duration_threshold, 1.2);
        assert_eq!(dms.extreme.message, "Alert! Wake up now!");
    }

    #[test]
    fn test_environment_overrides() {
        let file = write_config(SAMPLE);
        let vars: config::Map<String, String> = [
            ("DROWSY__ALERTS__VOLUME", "0.5"),
            ("DROWSY__FACE_DETECTION__ALERT_INTERVAL", "2"),
            ("DROWSY__CAMERA__FPS", "20"),
            ("OTHER__ALERTS__VOLUME", "0.1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = Settings::load_with(file.path(), environment().source(Some(vars))).unwrap();
        assert_eq!(settings.alerts.volume, 0.5);
        assert_eq!(settings.face_detection.alert_interval, 2.0);
        assert_eq!(settings.camera.fps, 20);
        // File values without an override survive
        assert_eq!(settings.camera.device_id, 1);
    }

    #[test]
    fn test_environment_override_is_validated() {
        let file = write_config(SAMPLE);
        let vars: config::Map<String, String> =
            [("DROWSY__ALERTS__VOLUME".to_string(), "3".to_string())]
                .into_iter()
                .collect();
        assert!(matches!(
            Settings::load_with(file.path(), environment().source(Some(vars))),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn test_camera_override() {
        let settings = Settings::default().with_camera(Some(2));
        assert_eq!(settings.camera_config().device_id, 2);

        let file = write_config(SAMPLE);
        let settings = Settings::load(file.path()).unwrap().with_camera(None);
        assert_eq!(settings.camera_config().device_id, 1);
    }

    #[test]
    fn test_rejects_out_of_range_volume() {
        let file = write_config("alerts:\n  volume: 1.5\n");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let file = write_config(
            "drowsiness:\n  normal:\n    ear_threshold: 1.4\n    duration_threshold: 1.5\n    message: hi\n",
        );
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::Dms(DmsError::Config(_)))
        ));

        let file = write_config(
            "drowsiness:\n  extreme:\n    ear_threshold: 0.2\n    duration_threshold: -1\n    message: hi\n",
        );
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
        assert_eq!(Settings::default().dms_config(), DmsConfig::default());
    }
}
