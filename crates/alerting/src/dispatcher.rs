//! Alert Dispatcher Implementation
//!
//! Plays the clip for each alert on a background task so the detection loop
//! never waits on audio. One clip plays at a time: while it plays, alerts of
//! equal or lower severity are dropped and higher ones take over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dms::{AlertEvent, DriverStatus, FrameAnalysis};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clips::{ClipId, ClipSet};
use crate::player::AudioPlayer;

/// Severity of the recovery message; anything else preempts it
const SUCCESS_SEVERITY: u8 = 1;

/// Minimum gap before the same clip is started again by `sustain`
const MIN_REPLAY_GAP: Duration = Duration::from_millis(500);

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Playback volume (0.0 to 1.0)
    pub volume: f32,
    /// Replay cadence of the normal alert while it stays active
    pub repeat_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            volume: 0.8,
            repeat_interval: Duration::from_secs(5),
        }
    }
}

/// Severity of the clip currently playing, shared with playback tasks.
///
/// `state` holds `tag << 8 | severity`; `generation` only hands out fresh
/// tags, so a finished task can only clear the slot it claimed.
#[derive(Debug, Default)]
pub struct PlaybackSlot {
    state: AtomicU64,
    generation: AtomicU64,
}

impl PlaybackSlot {
    /// Severity playing right now, `None` when idle
    pub fn current(&self) -> Option<u8> {
        let severity = (self.state.load(Ordering::Acquire) & 0xff) as u8;
        (severity != 0).then_some(severity)
    }

    fn claim(&self, severity: u8) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.state
            .store((generation << 8) | severity as u64, Ordering::Release);
        generation
    }

    fn release(&self, generation: u64) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state >> 8 == generation).then_some(0)
            });
    }

    fn clear(&self) {
        self.state.store(0, Ordering::Release);
    }
}

/// What `dispatch` did with an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was playing; playback started
    Started,
    /// A lower-severity clip was stopped in favour of this one
    Preempted,
    /// An equal or higher severity clip is still playing
    Dropped,
    /// No clip is available for this alert
    NoClip,
}

/// Maps alerts to clips and drives playback
pub struct AlertDispatcher<P> {
    config: AlertConfig,
    player: P,
    clips: ClipSet,
    slot: Arc<PlaybackSlot>,
    active: Option<JoinHandle<()>>,
    last_started: HashMap<ClipId, Instant>,
}

impl<P: AudioPlayer> AlertDispatcher<P> {
    /// Create a new alert dispatcher
    pub fn new(config: AlertConfig, player: P, clips: ClipSet) -> Self {
        info!(
            "Creating alert dispatcher: volume {:.2}, repeat every {:?}",
            config.volume, config.repeat_interval
        );
        Self {
            config,
            player,
            clips,
            slot: Arc::new(PlaybackSlot::default()),
            active: None,
            last_started: HashMap::new(),
        }
    }

    /// Severity currently playing
    pub fn playing(&self) -> Option<u8> {
        self.slot.current()
    }

    /// Route everything one analysed frame implies for audio
    pub fn handle(&mut self, analysis: &FrameAnalysis) {
        if let Some(level) = analysis.recovered_from() {
            info!("Driver recovered from {:?} drowsiness", level);
            self.silence();
            self.start(ClipId::Success, SUCCESS_SEVERITY);
        } else if analysis.lost_face_during_alert() {
            self.silence();
        }

        if let Some(event) = &analysis.alert {
            self.dispatch(event);
        }

        self.sustain(analysis.status);
    }

    /// Play the clip for an alert unless something as severe is playing
    pub fn dispatch(&mut self, event: &AlertEvent) -> DispatchOutcome {
        let severity = event.level.severity();
        if let Some(playing) = self.slot.current() {
            if severity <= playing {
                debug!(
                    "Dropping {:?} alert: severity {} already playing",
                    event.level, playing
                );
                return DispatchOutcome::Dropped;
            }
        }

        info!("Alert {:?}: {}", event.level, event.message);
        self.start(ClipId::from(event.level), severity)
    }

    /// Keep an active drowsiness alert audible: the normal clip repeats on
    /// the configured cadence, the extreme clip loops.
    pub fn sustain(&mut self, status: DriverStatus) {
        let (clip, severity, interval) = match status {
            DriverStatus::NormalAlert => (
                ClipId::Normal,
                dms::AlertLevel::Normal.severity(),
                self.config.repeat_interval,
            ),
            DriverStatus::ExtremeAlert => (
                ClipId::Extreme,
                dms::AlertLevel::Extreme.severity(),
                Duration::ZERO,
            ),
            _ => return,
        };

        if self.slot.current().is_some() || self.clips.get(clip).is_none() {
            return;
        }
        if let Some(last) = self.last_started.get(&clip) {
            if last.elapsed() < interval.max(MIN_REPLAY_GAP) {
                return;
            }
        }

        debug!("Repeating {:?} clip", clip);
        self.start(clip, severity);
    }

    /// Stop whatever is playing
    pub fn silence(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
        self.slot.clear();
    }

    fn start(&mut self, clip: ClipId, severity: u8) -> DispatchOutcome {
        let Some(path) = self.clips.get(clip) else {
            warn!("No rendered clip for {:?}", clip);
            return DispatchOutcome::NoClip;
        };

        let playback = self.player.play(path, self.config.volume);
        let preempted = self.slot.current().is_some();
        if let Some(handle) = self.active.take() {
            handle.abort();
        }

        let generation = self.slot.claim(severity);
        let slot = Arc::clone(&self.slot);
        self.active = Some(tokio::spawn(async move {
            if let Err(e) = playback.await {
                warn!("{}", e);
            }
            slot.release(generation);
        }));
        self.last_started.insert(clip, Instant::now());

        if preempted {
            DispatchOutcome::Preempted
        } else {
            DispatchOutcome::Started
        }
    }
}

impl<P> Drop for AlertDispatcher<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlaybackFuture;
    use crate::AlertError;
    use dms::AlertLevel;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    const CLIP_LENGTH: Duration = Duration::from_secs(2);

    /// Pretends every clip lasts two seconds
    #[derive(Clone, Default)]
    struct FakePlayer {
        played: Arc<Mutex<Vec<PathBuf>>>,
        fail: bool,
    }

    impl AudioPlayer for FakePlayer {
        fn play(&self, clip: &Path, _volume: f32) -> PlaybackFuture {
            self.played.lock().unwrap().push(clip.to_path_buf());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(AlertError::AudioPlayback("device busy".into()));
                }
                tokio::time::sleep(CLIP_LENGTH).await;
                Ok(())
            })
        }
    }

    impl FakePlayer {
        fn played(&self) -> Vec<String> {
            self.played
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.display().to_string())
                .collect()
        }
    }

    fn clips() -> ClipSet {
        let mut set = ClipSet::default();
        for (id, name) in [
            (ClipId::Normal, "normal"),
            (ClipId::Extreme, "extreme"),
            (ClipId::NoFace, "no_face"),
            (ClipId::Success, "success"),
        ] {
            set.insert(id, PathBuf::from(name));
        }
        set
    }

    fn event(level: AlertLevel) -> AlertEvent {
        AlertEvent {
            level,
            message: format!("{:?}", level),
            timestamp: 0.0,
        }
    }

    fn dispatcher(player: FakePlayer) -> AlertDispatcher<FakePlayer> {
        AlertDispatcher::new(AlertConfig::default(), player, clips())
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_or_lower_severity_is_dropped() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());

        assert_eq!(dispatcher.dispatch(&event(AlertLevel::Normal)), DispatchOutcome::Started);
        assert_eq!(dispatcher.playing(), Some(AlertLevel::Normal.severity()));

        assert_eq!(dispatcher.dispatch(&event(AlertLevel::Normal)), DispatchOutcome::Dropped);
        assert_eq!(dispatcher.dispatch(&event(AlertLevel::NoFace)), DispatchOutcome::Dropped);
        assert_eq!(player.played(), vec!["normal"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_severity_preempts() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());

        dispatcher.dispatch(&event(AlertLevel::NoFace));
        assert_eq!(
            dispatcher.dispatch(&event(AlertLevel::Extreme)),
            DispatchOutcome::Preempted
        );
        assert_eq!(dispatcher.playing(), Some(AlertLevel::Extreme.severity()));

        // The preempted task must not clear the new clip's slot
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.playing(), Some(AlertLevel::Extreme.severity()));
        assert_eq!(player.played(), vec!["no_face", "extreme"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_released_after_playback() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());

        dispatcher.dispatch(&event(AlertLevel::Normal));
        tokio::time::sleep(CLIP_LENGTH + Duration::from_millis(10)).await;
        assert_eq!(dispatcher.playing(), None);

        assert_eq!(dispatcher.dispatch(&event(AlertLevel::NoFace)), DispatchOutcome::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_alert_repeats_on_interval() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());

        dispatcher.dispatch(&event(AlertLevel::Normal));
        tokio::time::sleep(Duration::from_secs(3)).await;
        dispatcher.sustain(DriverStatus::NormalAlert);
        assert_eq!(player.played().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        dispatcher.sustain(DriverStatus::NormalAlert);
        assert_eq!(player.played(), vec!["normal", "normal"]);

        // Not while awake
        tokio::time::sleep(Duration::from_secs(10)).await;
        dispatcher.sustain(DriverStatus::Awake);
        assert_eq!(player.played().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_alert_loops() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());

        dispatcher.dispatch(&event(AlertLevel::Extreme));
        dispatcher.sustain(DriverStatus::ExtremeAlert);
        assert_eq!(player.played().len(), 1);

        tokio::time::sleep(CLIP_LENGTH + Duration::from_millis(10)).await;
        dispatcher.sustain(DriverStatus::ExtremeAlert);
        assert_eq!(player.played(), vec!["extreme", "extreme"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_plays_success() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());
        dispatcher.dispatch(&event(AlertLevel::Extreme));

        dispatcher.handle(&FrameAnalysis {
            face_detected: true,
            previous: DriverStatus::ExtremeAlert,
            status: DriverStatus::Awake,
            ..Default::default()
        });
        assert_eq!(player.played(), vec!["extreme", "success"]);
        assert_eq!(dispatcher.playing(), Some(SUCCESS_SEVERITY));

        // A new alert outranks the recovery message
        assert_eq!(
            dispatcher.dispatch(&event(AlertLevel::Normal)),
            DispatchOutcome::Preempted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_face_silences_alert() {
        let player = FakePlayer::default();
        let mut dispatcher = dispatcher(player.clone());
        dispatcher.dispatch(&event(AlertLevel::Normal));

        dispatcher.handle(&FrameAnalysis {
            previous: DriverStatus::NormalAlert,
            status: DriverStatus::NoFace,
            ..Default::default()
        });
        assert_eq!(dispatcher.playing(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_frees_slot() {
        let player = FakePlayer {
            fail: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(player.clone());

        assert_eq!(dispatcher.dispatch(&event(AlertLevel::Normal)), DispatchOutcome::Started);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(dispatcher.playing(), None);
        assert_eq!(dispatcher.dispatch(&event(AlertLevel::Normal)), DispatchOutcome::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_clip() {
        let mut dispatcher = AlertDispatcher::new(
            AlertConfig::default(),
            FakePlayer::default(),
            ClipSet::default(),
        );
        assert_eq!(dispatcher.dispatch(&event(AlertLevel::Normal)), DispatchOutcome::NoClip);
        assert_eq!(dispatcher.playing(), None);
    }
}
