//! Eye aspect ratio (EAR) from eye-contour landmarks
//!
//! Each eye is described by six contour points in the usual order:
//! `p1` outer corner, `p2`/`p3` upper lid, `p4` inner corner, `p5`/`p6` lower lid.
//!
//! ```text
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)
//! ```

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// Points per eye contour
pub const EYE_POINTS: usize = 6;

/// Points in the iBUG 68-point face layout
pub const IBUG68_POINTS: usize = 68;

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

/// Horizontal distance below which a contour is treated as degenerate
const MIN_EYE_WIDTH: f64 = 1e-9;

/// 2-D landmark in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Landmarks for one detected face
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub left_eye: Option<Vec<Point>>,
    pub right_eye: Option<Vec<Point>>,
    /// Every face point in model order; empty when only eye groups are known
    pub points: Vec<Point>,
}

impl LandmarkSet {
    /// Build from explicit eye groups
    pub fn from_eyes(left_eye: Option<Vec<Point>>, right_eye: Option<Vec<Point>>) -> Self {
        Self {
            left_eye,
            right_eye,
            points: Vec::new(),
        }
    }

    /// Extract both eyes from a full 68-point face
    pub fn from_ibug68(points: &[Point]) -> Result<Self, DmsError> {
        if points.len() != IBUG68_POINTS {
            return Err(DmsError::InvalidLandmarkSet(format!(
                "expected {} face landmarks, got {}",
                IBUG68_POINTS,
                points.len()
            )));
        }

        Ok(Self {
            left_eye: Some(points[LEFT_EYE].to_vec()),
            right_eye: Some(points[RIGHT_EYE].to_vec()),
            points: points.to_vec(),
        })
    }
}

/// Scoring of frames where only one eye is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyePolicy {
    /// Use the visible eye alone
    #[default]
    Either,
    /// Reject the frame unless both eyes are present
    Both,
}

/// Per-frame EAR
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameEar {
    pub left: Option<f64>,
    pub right: Option<f64>,
    /// Mean of the available eyes
    pub value: f64,
}

/// EAR of a single six-point eye contour
pub fn eye_aspect_ratio(eye: &[Point]) -> Result<f64, DmsError> {
    if eye.len() != EYE_POINTS {
        return Err(DmsError::InvalidLandmarkSet(format!(
            "eye contour needs {} points, got {}",
            EYE_POINTS,
            eye.len()
        )));
    }
    if eye.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(DmsError::InvalidLandmarkSet(
            "eye contour has non-finite coordinates".into(),
        ));
    }

    let vertical_a = eye[1].distance(&eye[5]);
    let vertical_b = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    if horizontal < MIN_EYE_WIDTH {
        return Err(DmsError::InvalidLandmarkSet(
            "eye corners coincide".into(),
        ));
    }

    Ok((vertical_a + vertical_b) / (2.0 * horizontal))
}

/// Reduce a landmark set to one EAR value for the frame
pub fn frame_ear(landmarks: &LandmarkSet, policy: EyePolicy) -> Result<FrameEar, DmsError> {
    let left = landmarks
        .left_eye
        .as_deref()
        .map(eye_aspect_ratio)
        .transpose()?;
    let right = landmarks
        .right_eye
        .as_deref()
        .map(eye_aspect_ratio)
        .transpose()?;

    let value = match (left, right, policy) {
        (Some(l), Some(r), _) => (l + r) / 2.0,
        (Some(single), None, EyePolicy::Either) | (None, Some(single), EyePolicy::Either) => {
            single
        }
        (None, None, _) => {
            return Err(DmsError::InvalidLandmarkSet("no eye landmarks".into()));
        }
        _ => {
            return Err(DmsError::InvalidLandmarkSet(
                "both eyes required but only one is visible".into(),
            ));
        }
    };

    Ok(FrameEar { left, right, value })
}
