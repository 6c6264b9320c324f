//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the frames the detection loop consumes:
//! - Live cabin camera via OpenCV `videoio` (feature `opencv`)
//! - Replay of a directory of still images for offline runs and tests

pub mod frame;
pub mod replay;

#[cfg(feature = "opencv")]
pub mod device;

pub use frame::VideoFrame;
pub use replay::ImageSequenceSource;

#[cfg(feature = "opencv")]
pub use device::OpenCvCamera;

use std::time::Duration;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Camera capture not supported in this build: {0}")]
    Unsupported(String),
}

impl CameraError {
    /// Whether reopening the device may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Unavailable(_))
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Device index (0 = first camera)
    pub device_id: i32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Extra open attempts after the first failure
    pub open_retries: u32,
    /// Delay between open attempts
    pub retry_delay: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 640,
            height: 480,
            fps: 30,
            open_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl CameraConfig {
    /// Nominal time between two frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Anything that yields frames in capture order.
///
/// `Ok(None)` marks the end of the stream (replay exhausted, device closed).
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        let config = CameraConfig {
            fps: 20,
            ..Default::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(50));

        // A zero rate must not divide by zero
        let config = CameraConfig {
            fps: 0,
            ..Default::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_errors() {
        assert!(CameraError::Unavailable("busy".into()).is_transient());
        assert!(!CameraError::Unsupported("no opencv".into()).is_transient());
    }
}
