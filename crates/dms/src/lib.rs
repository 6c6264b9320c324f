//! Driver Monitoring System (DMS)
//!
//! Per-frame driver drowsiness analysis:
//! - Face detection and 68-point landmark regression (ONNX Runtime)
//! - Eye aspect ratio (EAR) reduction
//! - Drowsiness state machine with tiered alerts

pub mod analysis;
pub mod config;
pub mod detector;
pub mod ear;
pub mod state;

pub use analysis::{AlertEvent, AlertLevel, FrameAnalysis};
pub use config::{DmsConfig, LevelThresholds, NoFaceConfig};
pub use detector::{FaceBbox, LandmarkProvider, OnnxLandmarkProvider};
pub use ear::{EyePolicy, FrameEar, LandmarkSet, Point};
pub use state::{DriverState, DriverStatus, DrowsinessLevel, Observation, StateUpdate};

use camera_capture::VideoFrame;
use thiserror::Error;
use tracing::warn;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid landmark set: {0}")]
    InvalidLandmarkSet(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}

/// Driver monitoring module
pub struct DmsModule<L> {
    config: DmsConfig,
    provider: L,
    state: DriverState,
}

impl DmsModule<OnnxLandmarkProvider> {
    /// Validate the configuration and load the ONNX models
    pub fn from_config(config: DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;
        let provider = OnnxLandmarkProvider::new(&config)?;
        Ok(Self::new(config, provider))
    }
}

impl<L: LandmarkProvider> DmsModule<L> {
    /// Create a DMS module around any landmark provider
    pub fn new(config: DmsConfig, provider: L) -> Self {
        Self {
            state: DriverState::new(config.clone()),
            config,
            provider,
        }
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn status(&self) -> DriverStatus {
        self.state.status()
    }

    /// Analyze a single frame for driver state.
    ///
    /// Detection failures never abort the loop: the frame is logged and
    /// counted as a frame without a face.
    pub fn analyze(&mut self, frame: &VideoFrame) -> FrameAnalysis {
        let ear = match self.provider.locate(frame) {
            Ok(Some(landmarks)) => match ear::frame_ear(&landmarks, self.config.eye_policy) {
                Ok(ear) => Some(ear),
                Err(e) => {
                    warn!("Frame {} skipped: {}", frame.sequence, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Frame {} skipped: {}", frame.sequence, e);
                None
            }
        };

        let observation = match ear {
            Some(ear) => Observation::Eyes { ear: ear.value },
            None => Observation::NoFace,
        };
        let update = self.state.update(observation, frame.timestamp_secs());

        FrameAnalysis {
            face_detected: ear.is_some(),
            ear,
            previous: update.previous,
            status: update.status,
            alert: update.alert,
            closed_for: update.closed_for,
            closure_ratio: self.state.closure_ratio(),
        }
    }

    /// Reset driver state (on driver change)
    pub fn reset_state(&mut self) {
        self.state.reset();
    }
}
