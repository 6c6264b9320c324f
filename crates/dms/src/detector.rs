//! Face and landmark detection models

use std::path::Path;

use camera_capture::VideoFrame;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::ear::{LandmarkSet, Point, IBUG68_POINTS};
use crate::{DmsConfig, DmsError};

/// SSD detector input side
const FACE_INPUT: u32 = 300;
/// BGR channel means subtracted before SSD inference
const FACE_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Values per SSD detection row: [image_id, label, confidence, x1, y1, x2, y2]
const DETECTION_ROW: usize = 7;

/// Landmark regressor input side
const LANDMARK_INPUT: u32 = 112;
/// Margin added around the face box before landmark regression
const CROP_MARGIN: f32 = 0.1;

/// Source of eye landmarks for a frame.
///
/// `Ok(None)` means no face was found.
pub trait LandmarkProvider {
    fn locate(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError>;
}

/// Face bounding box in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBbox {
    /// Grow the box by `margin` of its size on each side, clamped to the frame
    fn expanded(&self, margin: f32, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let dx = self.width * margin;
        let dy = self.height * margin;
        let x0 = (self.x - dx).max(0.0);
        let y0 = (self.y - dy).max(0.0);
        let x1 = (self.x + self.width + dx).min(frame_width as f32);
        let y1 = (self.y + self.height + dy).min(frame_height as f32);
        (
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(0.0) as u32,
            (y1 - y0).max(0.0) as u32,
        )
    }
}

fn load_session(path: &Path, what: &str) -> Result<Session, DmsError> {
    if !path.is_file() {
        error!("{} model not found at {}", what, path.display());
        return Err(DmsError::ModelLoad(format!(
            "{} model not found at {}",
            what,
            path.display()
        )));
    }

    info!("Loading {} model from {}", what, path.display());
    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load {} model: {}", what, e);
            DmsError::ModelLoad(format!("{}: {}", path.display(), e))
        })
}

fn run_model(session: &Session, input: Array4<f32>) -> Result<Vec<f32>, DmsError> {
    let tensor = Tensor::from_array(input).map_err(|e| DmsError::Inference(e.to_string()))?;
    let outputs = session
        .run(ort::inputs![tensor].map_err(|e| DmsError::Inference(e.to_string()))?)
        .map_err(|e| DmsError::Inference(e.to_string()))?;
    let view = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| DmsError::Inference(e.to_string()))?;
    Ok(view.iter().copied().collect())
}

/// SSD face detector (ResNet-10 style, 300x300 input)
pub struct FaceDetector {
    confidence_threshold: f32,
    session: Session,
}

impl FaceDetector {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        Ok(Self {
            confidence_threshold: config.face_confidence,
            session: load_session(&config.face_model_path, "face detection")?,
        })
    }

    /// Most confident face above the threshold
    pub fn detect(&self, frame: &VideoFrame) -> Result<Option<FaceBbox>, DmsError> {
        let img = frame
            .to_image()
            .ok_or_else(|| DmsError::ImageProcessing("Failed to create image buffer".into()))?;
        let resized = imageops::resize(&img, FACE_INPUT, FACE_INPUT, FilterType::Triangle);

        // NCHW, BGR channel order, mean-subtracted
        let side = FACE_INPUT as usize;
        let mut input = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = pixel[2] as f32 - FACE_MEAN_BGR[0];
            input[[0, 1, y, x]] = pixel[1] as f32 - FACE_MEAN_BGR[1];
            input[[0, 2, y, x]] = pixel[0] as f32 - FACE_MEAN_BGR[2];
        }

        let detections = run_model(&self.session, input)?;
        Ok(best_detection(
            &detections,
            self.confidence_threshold,
            frame.width,
            frame.height,
        ))
    }
}

/// Pick the most confident SSD row and scale it to pixels
fn best_detection(
    rows: &[f32],
    confidence_threshold: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<FaceBbox> {
    let (w, h) = (frame_width as f32, frame_height as f32);
    rows.chunks_exact(DETECTION_ROW)
        .filter(|row| row[2] >= confidence_threshold)
        .max_by(|a, b| a[2].total_cmp(&b[2]))
        .and_then(|row| {
            let x1 = (row[3] * w).clamp(0.0, w);
            let y1 = (row[4] * h).clamp(0.0, h);
            let x2 = (row[5] * w).clamp(0.0, w);
            let y2 = (row[6] * h).clamp(0.0, h);
            if x2 <= x1 || y2 <= y1 {
                return None;
            }
            Some(FaceBbox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: row[2],
            })
        })
}

/// 68-point landmark regressor over a face crop
pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        Ok(Self {
            session: load_session(&config.landmark_model_path, "landmark")?,
        })
    }

    /// Landmarks in frame coordinates for the given face
    pub fn regress(&self, frame: &VideoFrame, face: &FaceBbox) -> Result<Vec<Point>, DmsError> {
        let (cx, cy, cw, ch) = face.expanded(CROP_MARGIN, frame.width, frame.height);
        let crop = frame
            .crop(cx, cy, cw, ch)
            .and_then(|c| c.to_image())
            .ok_or_else(|| DmsError::ImageProcessing("Face crop outside frame".into()))?;
        let resized = imageops::resize(&crop, LANDMARK_INPUT, LANDMARK_INPUT, FilterType::Triangle);

        let side = LANDMARK_INPUT as usize;
        let mut input = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                input[[0, c, y, x]] = pixel[c] as f32 / 255.0;
            }
        }

        let coords = run_model(&self.session, input)?;
        if coords.len() < IBUG68_POINTS * 2 {
            return Err(DmsError::InvalidLandmarkSet(format!(
                "landmark model returned {} values",
                coords.len()
            )));
        }

        Ok(coords[..IBUG68_POINTS * 2]
            .chunks_exact(2)
            .map(|xy| {
                Point::new(
                    cx as f64 + xy[0] as f64 * cw as f64,
                    cy as f64 + xy[1] as f64 * ch as f64,
                )
            })
            .collect())
    }
}

/// Face detector followed by landmark regression, both on ONNX Runtime
pub struct OnnxLandmarkProvider {
    face_detector: FaceDetector,
    regressor: LandmarkRegressor,
}

impl OnnxLandmarkProvider {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        Ok(Self {
            face_detector: FaceDetector::new(config)?,
            regressor: LandmarkRegressor::new(config)?,
        })
    }
}

impl LandmarkProvider for OnnxLandmarkProvider {
    fn locate(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
        let Some(face) = self.face_detector.detect(frame)? else {
            return Ok(None);
        };
        debug!(
            "Face at ({:.0}, {:.0}) {:.0}x{:.0}, confidence {:.2}",
            face.x, face.y, face.width, face.height, face.confidence
        );

        let points = self.regressor.regress(frame, &face)?;
        LandmarkSet::from_ibug68(&points).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_detection_picks_most_confident() {
        let rows = [
            0.0, 1.0, 0.60, 0.1, 0.1, 0.3, 0.3, //
            0.0, 1.0, 0.95, 0.25, 0.2, 0.75, 0.8, //
            0.0, 1.0, 0.30, 0.0, 0.0, 1.0, 1.0,
        ];
        let face = best_detection(&rows, 0.5, 640, 480).unwrap();
        assert_eq!(face.confidence, 0.95);
        assert!((face.x - 160.0).abs() < 1e-3);
        assert!((face.y - 96.0).abs() < 1e-3);
        assert!((face.width - 320.0).abs() < 1e-3);
        assert!((face.height - 288.0).abs() < 1e-3);
    }

    #[test]
    fn test_best_detection_respects_threshold() {
        let rows = [0.0, 1.0, 0.4, 0.1, 0.1, 0.3, 0.3];
        assert!(best_detection(&rows, 0.5, 640, 480).is_none());
    }

    #[test]
    fn test_best_detection_rejects_empty_box() {
        let rows = [0.0, 1.0, 0.9, 0.5, 0.5, 0.5, 0.7];
        assert!(best_detection(&rows, 0.5, 640, 480).is_none());
    }

    #[test]
    fn test_expanded_box_is_clamped() {
        let face = FaceBbox {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
        };
        assert_eq!(face.expanded(0.1, 640, 480), (0, 10, 120, 120));
        assert_eq!(face.expanded(0.1, 100, 100), (0, 10, 100, 90));
    }

    #[test]
    fn test_missing_model_is_model_load_error() {
        let config = DmsConfig {
            face_model_path: "does/not/exist.onnx".into(),
            ..Default::default()
        };
        assert!(matches!(
            OnnxLandmarkProvider::new(&config),
            Err(DmsError::ModelLoad(_))
        ));
    }
}
