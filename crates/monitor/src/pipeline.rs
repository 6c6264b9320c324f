//! Capture, analysis and alert loop
//!
//! One frame at a time: read, analyse, hand the result to the alert
//! dispatcher, then wait for the next frame slot. Audio never blocks the
//! loop; playback runs on its own task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alerting::{AlertDispatcher, AudioPlayer};
use camera_capture::{CameraConfig, CameraError, FrameSource, VideoFrame};
use dms::{AlertLevel, DmsModule, LandmarkProvider};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::stats::FpsCounter;

/// Consecutive failed reads tolerated before the stream counts as lost
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

/// Frames per FPS measurement
const FPS_WINDOW: u32 = 10;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Camera stream lost after {failures} failed reads: {source}")]
    StreamLost { failures: u32, source: CameraError },
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    Shutdown,
    EndOfStream,
}

/// What a run did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames: u64,
    pub no_face_frames: u64,
    pub dropped_frames: u64,
    pub alerts: BTreeMap<AlertLevel, u64>,
    pub elapsed: Duration,
    pub stop: StopReason,
}

impl RunSummary {
    pub fn alert_count(&self, level: AlertLevel) -> u64 {
        self.alerts.get(&level).copied().unwrap_or(0)
    }

    /// Processed frames per second over the whole run
    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Detection loop over a frame source
pub struct Pipeline<S, L, P> {
    source: S,
    dms: DmsModule<L>,
    dispatcher: AlertDispatcher<P>,
    frame_interval: Duration,
    fps: FpsCounter,
}

impl<S, L, P> Pipeline<S, L, P>
where
    S: FrameSource,
    L: LandmarkProvider,
    P: AudioPlayer,
{
    pub fn new(
        source: S,
        dms: DmsModule<L>,
        dispatcher: AlertDispatcher<P>,
        frame_interval: Duration,
    ) -> Self {
        Self {
            source,
            dms,
            dispatcher,
            frame_interval,
            fps: FpsCounter::new(FPS_WINDOW),
        }
    }

    /// Run until `shutdown` is raised or the source ends.
    ///
    /// The flag is checked between frames, so the frame in flight is always
    /// finished. Playback is stopped before returning.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut read_failures = 0u32;
        let mut deadline = Instant::now();

        info!("Drowsiness detection started");
        let stop = loop {
            if shutdown.load(Ordering::SeqCst) {
                break StopReason::Shutdown;
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    read_failures = 0;
                    self.process(&frame, &mut summary);
                }
                Ok(None) => break StopReason::EndOfStream,
                Err(e) => {
                    read_failures += 1;
                    summary.dropped_frames += 1;
                    if read_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        error!("Giving up on camera stream: {}", e);
                        self.dispatcher.silence();
                        return Err(PipelineError::StreamLost {
                            failures: read_failures,
                            source: e,
                        });
                    }
                    warn!(
                        "Failed to capture frame ({}/{}): {}",
                        read_failures, MAX_CONSECUTIVE_READ_FAILURES, e
                    );
                }
            }

            // Pace to the frame rate; when behind, start the next frame now
            // rather than bursting to catch up.
            deadline += self.frame_interval;
            let now = Instant::now();
            if deadline < now {
                deadline = now;
            }
            tokio::time::sleep_until(deadline).await;
        };

        self.dispatcher.silence();
        summary.elapsed = started.elapsed();
        summary.stop = stop;
        info!(
            "Detection stopped ({:?}) after {} frames in {:.1}s: {:.1} FPS average, {:.1} FPS last window",
            stop,
            summary.frames,
            summary.elapsed.as_secs_f64(),
            summary.average_fps(),
            self.fps.fps()
        );
        Ok(summary)
    }

    fn process(&mut self, frame: &VideoFrame, summary: &mut RunSummary) {
        let analysis = self.dms.analyze(frame);

        summary.frames += 1;
        if !analysis.face_detected {
            summary.no_face_frames += 1;
        }
        if let Some(event) = &analysis.alert {
            *summary.alerts.entry(event.level).or_default() += 1;
        }

        debug!(
            frame = frame.sequence,
            ear = ?analysis.ear.map(|e| e.value),
            status = ?analysis.status,
            closed_for = analysis.closed_for,
            "Frame analysed"
        );

        self.dispatcher.handle(&analysis);

        if let Some(fps) = self.fps.tick() {
            debug!("FPS: {:.1}", fps);
        }
    }
}

/// Open a camera, retrying transient failures per `config`
pub async fn open_with_retry<T, F>(config: &CameraConfig, mut open: F) -> Result<T, CameraError>
where
    F: FnMut(&CameraConfig) -> Result<T, CameraError>,
{
    let mut retries = 0;
    loop {
        match open(config) {
            Ok(camera) => return Ok(camera),
            Err(e) if e.is_transient() && retries < config.open_retries => {
                retries += 1;
                warn!(
                    "Camera {} unavailable ({}), retry {}/{} in {:?}",
                    config.device_id, e, retries, config.open_retries, config.retry_delay
                );
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
