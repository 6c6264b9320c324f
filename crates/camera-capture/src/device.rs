//! Live camera capture through OpenCV `videoio`

use std::time::Instant;

use opencv::core::Mat;
use opencv::prelude::{MatTraitConst, MatTraitConstManual, VideoCaptureTrait, VideoCaptureTraitConst};
use opencv::{imgproc, videoio};
use tracing::{info, warn};

use crate::{CameraConfig, CameraError, FrameSource, VideoFrame};

/// Cabin camera opened by device index
pub struct OpenCvCamera {
    capture: videoio::VideoCapture,
    started: Instant,
    sequence: u32,
}

impl OpenCvCamera {
    /// Open the configured device and apply resolution and rate
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let mut capture = videoio::VideoCapture::new(config.device_id, videoio::CAP_ANY)
            .map_err(|e| CameraError::Unavailable(format!("device {}: {}", config.device_id, e)))?;

        if !capture.is_opened().unwrap_or(false) {
            return Err(CameraError::Unavailable(format!(
                "could not open camera {}",
                config.device_id
            )));
        }

        for (prop, value) in [
            (videoio::CAP_PROP_FRAME_WIDTH, config.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64),
            (videoio::CAP_PROP_FPS, config.fps as f64),
        ] {
            if !capture.set(prop, value).unwrap_or(false) {
                warn!("Camera {} ignored property {} = {}", config.device_id, prop, value);
            }
        }

        info!(
            "Opened camera {} at {}x{} @ {}fps",
            config.device_id, config.width, config.height, config.fps
        );

        Ok(Self {
            capture,
            started: Instant::now(),
            sequence: 0,
        })
    }
}

impl FrameSource for OpenCvCamera {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let mut bgr = Mat::default();
        let grabbed = self
            .capture
            .read(&mut bgr)
            .map_err(|e| CameraError::Stream(e.to_string()))?;
        if !grabbed || bgr.empty() {
            return Err(CameraError::Stream("failed to capture frame".into()));
        }
        let timestamp_ns = self.started.elapsed().as_nanos() as u64;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)
            .map_err(|e| CameraError::Format(e.to_string()))?;

        let data = rgb
            .data_bytes()
            .map_err(|e| CameraError::Format(e.to_string()))?
            .to_vec();
        let frame = VideoFrame::new(
            data,
            rgb.cols() as u32,
            rgb.rows() as u32,
            timestamp_ns,
            self.sequence,
        )?;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Some(frame))
    }
}
