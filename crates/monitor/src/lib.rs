//! Drowsiness Monitor
//!
//! Wires camera capture, driver monitoring and spoken alerts into one loop.

pub mod pipeline;
pub mod settings;
pub mod stats;

pub use pipeline::{open_with_retry, Pipeline, PipelineError, RunSummary, StopReason};
pub use settings::{Settings, SettingsError};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alerting::{
    AlertDispatcher, ClipCache, ClipSet, CommandPlayer, CommandSynthesizer, SpeechSynthesizer,
};
use anyhow::Context;
use camera_capture::{CameraConfig, CameraError, FrameSource, ImageSequenceSource};
use dms::DmsModule;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` takes precedence over `filter`.
pub fn init_logging(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Render any missing or stale alert clips with the configured synthesizer
pub fn prepare_audio(settings: &Settings) -> anyhow::Result<ClipSet> {
    let synthesizer = CommandSynthesizer::new(&settings.alerts.synthesizer)?;
    prepare_clips(settings, &synthesizer)
}

/// Render any missing or stale alert clips with `synthesizer`
pub fn prepare_clips(
    settings: &Settings,
    synthesizer: &dyn SpeechSynthesizer,
) -> anyhow::Result<ClipSet> {
    let dir = &settings.alerts.audio_dir;
    let mut cache = ClipCache::open(dir)
        .with_context(|| format!("opening clip cache {}", dir.display()))?;
    let clips = cache.prepare_all(&settings.clip_messages(), synthesizer)?;
    info!("Alert clips ready in {}", dir.display());
    Ok(clips)
}

/// Clips for this run; falls back to whatever is already cached when
/// synthesis is unavailable.
fn load_clips(settings: &Settings) -> anyhow::Result<ClipSet> {
    match prepare_audio(settings) {
        Ok(clips) => Ok(clips),
        Err(e) => {
            warn!("Could not render alert clips ({:#}); using cached clips", e);
            let cache = ClipCache::open(&settings.alerts.audio_dir)?;
            Ok(cache.cached(&settings.clip_messages()))
        }
    }
}

#[cfg(feature = "opencv")]
async fn open_camera(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    let camera = open_with_retry(config, camera_capture::OpenCvCamera::open).await?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "opencv"))]
async fn open_camera(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Err(CameraError::Unsupported(format!(
        "camera {} needs a build with the `opencv` feature; use --replay <dir> instead",
        config.device_id
    )))
}

/// Run detection until ctrl-c or the end of a replay
pub async fn run(settings: &Settings, replay: Option<&Path>) -> anyhow::Result<RunSummary> {
    let dms = DmsModule::from_config(settings.dms_config()).context("loading detection models")?;
    let clips = load_clips(settings)?;
    let player = CommandPlayer::new(&settings.alerts.player).context("locating audio player")?;
    let dispatcher = AlertDispatcher::new(settings.alert_config(), player, clips);

    let camera = settings.camera_config();
    let source: Box<dyn FrameSource> = match replay {
        Some(dir) => Box::new(
            ImageSequenceSource::open(dir, camera.fps)
                .with_context(|| format!("opening replay {}", dir.display()))?,
        ),
        None => open_camera(&camera).await.context("opening camera")?,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            signal.store(true, Ordering::SeqCst);
        }
    });

    let pipeline = Pipeline::new(source, dms, dispatcher, camera.frame_interval());
    Ok(pipeline.run(shutdown).await?)
}
