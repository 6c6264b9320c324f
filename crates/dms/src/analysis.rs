//! DMS analysis results and alerts

use serde::{Deserialize, Serialize};

use crate::ear::FrameEar;
use crate::state::{DriverStatus, DrowsinessLevel};

/// Alert kinds, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    /// Face not visible (driver out of frame, camera blocked)
    NoFace,

    /// Eyes closed past the normal thresholds
    Normal,

    /// Eyes closed past the extreme thresholds
    Extreme,
}

impl AlertLevel {
    /// Playback priority; higher preempts lower
    pub fn severity(&self) -> u8 {
        match self {
            AlertLevel::NoFace => 1,
            AlertLevel::Normal => 2,
            AlertLevel::Extreme => 3,
        }
    }
}

/// Fire-and-forget alert produced by a state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub message: String,
    /// Frame timestamp (seconds) that triggered the alert
    pub timestamp: f64,
}

/// Complete per-frame analysis result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    /// Whether a usable face was found
    pub face_detected: bool,

    /// Eye aspect ratio, when landmarks were usable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ear: Option<FrameEar>,

    /// Status before this frame
    pub previous: DriverStatus,

    /// Status after this frame
    pub status: DriverStatus,

    /// Alert emitted by this frame, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertEvent>,

    /// Seconds of the current closure episode
    pub closed_for: f64,

    /// Share of closed frames over the recent window (0-1)
    pub closure_ratio: f64,
}

impl FrameAnalysis {
    /// Alert level the driver just recovered from (eyes reopened)
    pub fn recovered_from(&self) -> Option<DrowsinessLevel> {
        match (self.previous, self.status) {
            (DriverStatus::NormalAlert, DriverStatus::Awake) => Some(DrowsinessLevel::Normal),
            (DriverStatus::ExtremeAlert, DriverStatus::Awake) => Some(DrowsinessLevel::Extreme),
            _ => None,
        }
    }

    /// Whether an active drowsiness alert ended because the face was lost
    pub fn lost_face_during_alert(&self) -> bool {
        self.previous.is_alert() && self.status == DriverStatus::NoFace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(AlertLevel::Extreme > AlertLevel::Normal);
        assert!(AlertLevel::Normal > AlertLevel::NoFace);
        assert!(AlertLevel::Extreme.severity() > AlertLevel::Normal.severity());
        assert!(AlertLevel::Normal.severity() > AlertLevel::NoFace.severity());
    }

    #[test]
    fn test_recovered_from() {
        let analysis = FrameAnalysis {
            previous: DriverStatus::ExtremeAlert,
            status: DriverStatus::Awake,
            ..Default::default()
        };
        assert_eq!(analysis.recovered_from(), Some(DrowsinessLevel::Extreme));
        assert!(!analysis.lost_face_during_alert());

        let analysis = FrameAnalysis {
            previous: DriverStatus::NormalAlert,
            status: DriverStatus::NoFace,
            ..Default::default()
        };
        assert_eq!(analysis.recovered_from(), None);
        assert!(analysis.lost_face_during_alert());
    }
}
