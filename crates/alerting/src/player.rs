//! Audio playback through an external player process

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::AlertError;

/// Completes when playback ends; dropping it stops playback
pub type PlaybackFuture = Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send>>;

/// Plays a rendered clip at a volume in [0, 1]
pub trait AudioPlayer: Send + Sync {
    fn play(&self, clip: &Path, volume: f32) -> PlaybackFuture;
}

/// Supported external players and their volume flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerKind {
    /// `ffplay -volume 0..100`
    Ffplay,
    /// `paplay --volume 0..65536`
    Paplay,
    /// `mpg123 -f 0..32768`
    Mpg123,
    /// Anything else gets the clip path only
    Plain,
}

impl PlayerKind {
    fn detect(program: &Path) -> Self {
        match program.file_stem().and_then(|s| s.to_str()) {
            Some("ffplay") => PlayerKind::Ffplay,
            Some("paplay") => PlayerKind::Paplay,
            Some("mpg123") => PlayerKind::Mpg123,
            _ => PlayerKind::Plain,
        }
    }

    fn args(&self, clip: &Path, volume: f32) -> Vec<String> {
        let volume = volume.clamp(0.0, 1.0);
        let clip = clip.display().to_string();
        match self {
            PlayerKind::Ffplay => vec![
                "-nodisp".into(),
                "-autoexit".into(),
                "-loglevel".into(),
                "quiet".into(),
                "-volume".into(),
                format!("{}", (volume * 100.0).round() as u32),
                clip,
            ],
            PlayerKind::Paplay => vec![
                format!("--volume={}", (volume * 65536.0).round() as u32),
                clip,
            ],
            PlayerKind::Mpg123 => vec![
                "-q".into(),
                "-f".into(),
                format!("{}", (volume * 32768.0).round() as u32),
                clip,
            ],
            PlayerKind::Plain => vec![clip],
        }
    }
}

/// Runs an external audio player per clip
pub struct CommandPlayer {
    program: PathBuf,
    kind: PlayerKind,
}

impl CommandPlayer {
    /// Resolve `program` on PATH
    pub fn new(program: &str) -> Result<Self, AlertError> {
        let program =
            which::which(program).map_err(|_| AlertError::ToolNotFound(program.to_string()))?;
        let kind = PlayerKind::detect(&program);
        info!("Audio player: {} ({:?})", program.display(), kind);
        Ok(Self { program, kind })
    }
}

impl AudioPlayer for CommandPlayer {
    fn play(&self, clip: &Path, volume: f32) -> PlaybackFuture {
        let mut command = Command::new(&self.program);
        command
            .args(self.kind.args(clip, volume))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let clip = clip.to_path_buf();

        Box::pin(async move {
            debug!("Playing {}", clip.display());
            let status = command
                .status()
                .await
                .map_err(|e| AlertError::AudioPlayback(format!("{}: {}", clip.display(), e)))?;
            if status.success() {
                Ok(())
            } else {
                Err(AlertError::AudioPlayback(format!(
                    "{} exited with {}",
                    clip.display(),
                    status
                )))
            }
        })
    }
}
