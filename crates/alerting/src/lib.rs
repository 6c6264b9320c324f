//! Alerting System
//!
//! Turns drowsiness alerts into speech: pre-rendered clips per alert kind,
//! played through an external player without blocking the detection loop.

mod clips;
mod dispatcher;
mod player;

pub use clips::{ClipCache, ClipId, ClipMessages, ClipSet, CommandSynthesizer, SpeechSynthesizer};
pub use dispatcher::{AlertConfig, AlertDispatcher, DispatchOutcome, PlaybackSlot};
pub use player::{AudioPlayer, CommandPlayer, PlaybackFuture};

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Audio playback failed: {0}")]
    AudioPlayback(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    #[error("Clip cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
