//! Driver state tracking
//!
//! `DriverState` is the per-frame drowsiness state machine:
//!
//! ```text
//! Awake --closed >= normal--> NormalAlert --closed >= extreme--> ExtremeAlert
//!   ^                              |                                 |
//!   +------- EAR >= normal threshold (episode ends) ---------------+
//! any --no face--> NoFace --face found--> Awake (timing from zero)
//! ```
//!
//! Both debounces must hold before a level fires: accumulated closed time and
//! the count of consecutive below-threshold frames.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{AlertEvent, AlertLevel};
use crate::config::DmsConfig;

/// Slack when comparing accumulated frame intervals against a threshold
const TIME_EPSILON: f64 = 1e-6;

/// Frames kept for the closure ratio
const CLOSURE_WINDOW: usize = 30;

/// Drowsiness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DrowsinessLevel {
    #[default]
    Awake,
    Normal,
    Extreme,
}

/// State machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriverStatus {
    #[default]
    Awake,
    NormalAlert,
    ExtremeAlert,
    NoFace,
}

impl DriverStatus {
    /// Drowsiness level this state represents
    pub fn level(&self) -> DrowsinessLevel {
        match self {
            DriverStatus::NormalAlert => DrowsinessLevel::Normal,
            DriverStatus::ExtremeAlert => DrowsinessLevel::Extreme,
            DriverStatus::Awake | DriverStatus::NoFace => DrowsinessLevel::Awake,
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, DriverStatus::NormalAlert | DriverStatus::ExtremeAlert)
    }
}

/// What the detector saw in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Face found; mean eye aspect ratio for the frame
    Eyes { ear: f64 },
    /// No usable face this frame
    NoFace,
}

/// Contiguous run of frames with the eyes below the normal threshold
#[derive(Debug, Clone, Default)]
struct ClosureEpisode {
    /// Accumulated closed time (seconds)
    closed_for: f64,
    /// Consecutive frames below the normal threshold
    frames_below_normal: u32,
    /// Consecutive frames below the extreme threshold
    frames_below_extreme: u32,
}

#[derive(Debug, Clone)]
struct NoFaceSpan {
    since: f64,
    last_alert: Option<f64>,
}

/// Result of feeding one frame to the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub previous: DriverStatus,
    pub status: DriverStatus,
    pub alert: Option<AlertEvent>,
    /// Seconds of the active closure episode (0 when none)
    pub closed_for: f64,
}

/// Driver state (tracked over time)
#[derive(Debug, Clone)]
pub struct DriverState {
    config: DmsConfig,
    status: DriverStatus,
    episode: Option<ClosureEpisode>,
    no_face: Option<NoFaceSpan>,
    last_timestamp: Option<f64>,
    /// Recent closed/open samples, newest last
    closure_history: VecDeque<bool>,
}

impl DriverState {
    pub fn new(config: DmsConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Awake,
            episode: None,
            no_face: None,
            last_timestamp: None,
            closure_history: VecDeque::with_capacity(CLOSURE_WINDOW),
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    /// Seconds of the active closure episode
    pub fn closed_for(&self) -> f64 {
        self.episode.as_ref().map(|e| e.closed_for).unwrap_or(0.0)
    }

    /// Share of closed frames among the last detected frames (0-1)
    pub fn closure_ratio(&self) -> f64 {
        if self.closure_history.is_empty() {
            return 0.0;
        }
        let closed = self.closure_history.iter().filter(|&&c| c).count();
        closed as f64 / self.closure_history.len() as f64
    }

    /// Feed one frame observed at `timestamp` (seconds)
    pub fn update(&mut self, observation: Observation, timestamp: f64) -> StateUpdate {
        let previous = self.status;

        let alert = match observation {
            Observation::NoFace => self.on_no_face(timestamp),
            Observation::Eyes { ear } => {
                let dt = match self.last_timestamp {
                    Some(prev) if timestamp >= prev => timestamp - prev,
                    Some(prev) => {
                        warn!("Frame timestamp went backwards ({} < {})", timestamp, prev);
                        0.0
                    }
                    None => self.config.frame_interval,
                };
                self.last_timestamp = Some(timestamp);
                self.on_eyes(ear, dt, timestamp)
            }
        };

        if previous != self.status {
            debug!("Driver status {:?} -> {:?}", previous, self.status);
        }

        StateUpdate {
            previous,
            status: self.status,
            alert,
            closed_for: self.closed_for(),
        }
    }

    fn on_no_face(&mut self, timestamp: f64) -> Option<AlertEvent> {
        // The episode cannot continue without landmarks
        self.episode = None;
        self.last_timestamp = None;
        self.status = DriverStatus::NoFace;

        let interval = self.config.no_face.alert_interval;
        let span = self.no_face.get_or_insert(NoFaceSpan {
            since: timestamp,
            last_alert: None,
        });
        let anchor = span.last_alert.unwrap_or(span.since);

        if timestamp - anchor + TIME_EPSILON >= interval {
            span.last_alert = Some(timestamp);
            info!(
                "No face detected for {:.1}s",
                timestamp - span.since
            );
            return Some(AlertEvent {
                level: AlertLevel::NoFace,
                message: self.config.no_face.message.clone(),
                timestamp,
            });
        }
        None
    }

    fn on_eyes(&mut self, ear: f64, dt: f64, timestamp: f64) -> Option<AlertEvent> {
        self.no_face = None;
        if self.status == DriverStatus::NoFace {
            self.status = DriverStatus::Awake;
        }

        let closed = ear < self.config.normal.ear_threshold;
        if self.closure_history.len() == CLOSURE_WINDOW {
            self.closure_history.pop_front();
        }
        self.closure_history.push_back(closed);

        if !closed {
            if self.status.is_alert() {
                info!(
                    "Eyes reopened (EAR {:.3}) after {:.2}s, leaving {:?}",
                    ear,
                    self.closed_for(),
                    self.status
                );
            }
            self.episode = None;
            self.status = DriverStatus::Awake;
            return None;
        }

        let episode = self.episode.get_or_insert_with(ClosureEpisode::default);
        episode.closed_for += dt;
        episode.frames_below_normal += 1;
        if ear < self.config.extreme.ear_threshold {
            episode.frames_below_extreme += 1;
        } else {
            episode.frames_below_extreme = 0;
        }

        let min_frames = self.config.consecutive_frames_threshold;
        let next = match self.status {
            DriverStatus::Awake
                if episode.closed_for + TIME_EPSILON >= self.config.normal.duration_threshold
                    && episode.frames_below_normal >= min_frames =>
            {
                Some((DriverStatus::NormalAlert, AlertLevel::Normal))
            }
            DriverStatus::NormalAlert
                if ear < self.config.extreme.ear_threshold
                    && episode.closed_for + TIME_EPSILON
                        >= self.config.extreme.duration_threshold
                    && episode.frames_below_extreme >= min_frames =>
            {
                Some((DriverStatus::ExtremeAlert, AlertLevel::Extreme))
            }
            _ => None,
        };

        let (status, level) = next?;
        let closed_for = episode.closed_for;
        self.status = status;

        let message = match level {
            AlertLevel::Extreme => self.config.extreme.message.clone(),
            _ => self.config.normal.message.clone(),
        };
        info!(
            "Drowsiness {:?}: EAR {:.3}, eyes closed {:.2}s",
            level, ear, closed_for
        );

        Some(AlertEvent {
            level,
            message,
            timestamp,
        })
    }

    /// Reset state (on driver change)
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
