//! Pre-rendered speech clips
//!
//! Each alert kind has one clip in the cache directory. `clips.json` records
//! the SHA-256 of the text each clip was rendered from, so a clip is only
//! re-synthesized when its message changes or its file disappears.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use dms::AlertLevel;

use crate::AlertError;

const MANIFEST_FILE: &str = "clips.json";

/// Identity of a rendered clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipId {
    Normal,
    Extreme,
    NoFace,
    /// Spoken when the driver recovers from an alert
    Success,
}

impl ClipId {
    pub const ALL: [ClipId; 4] = [ClipId::Normal, ClipId::Extreme, ClipId::NoFace, ClipId::Success];

    fn file_name(&self) -> &'static str {
        match self {
            ClipId::Normal => "alert_normal.wav",
            ClipId::Extreme => "alert_extreme.wav",
            ClipId::NoFace => "alert_no_face.wav",
            ClipId::Success => "alert_success.wav",
        }
    }
}

impl From<AlertLevel> for ClipId {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Normal => ClipId::Normal,
            AlertLevel::Extreme => ClipId::Extreme,
            AlertLevel::NoFace => ClipId::NoFace,
        }
    }
}

/// Text for every clip
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMessages {
    pub normal: String,
    pub extreme: String,
    pub no_face: String,
    pub success: String,
}

impl ClipMessages {
    fn text(&self, id: ClipId) -> &str {
        match id {
            ClipId::Normal => &self.normal,
            ClipId::Extreme => &self.extreme,
            ClipId::NoFace => &self.no_face,
            ClipId::Success => &self.success,
        }
    }
}

/// Renders text to an audio file
pub trait SpeechSynthesizer {
    fn synthesize(&self, text: &str, output: &Path) -> Result<(), AlertError>;
}

/// Text-to-speech through an external program (`espeak-ng -w <out> <text>`)
pub struct CommandSynthesizer {
    program: PathBuf,
}

impl CommandSynthesizer {
    /// Resolve `program` on PATH
    pub fn new(program: &str) -> Result<Self, AlertError> {
        let program =
            which::which(program).map_err(|_| AlertError::ToolNotFound(program.to_string()))?;
        Ok(Self { program })
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str, output: &Path) -> Result<(), AlertError> {
        let status = Command::new(&self.program)
            .arg("-w")
            .arg(output)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(AlertError::Synthesis(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClipRecord {
    file: String,
    text_sha256: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    clips: BTreeMap<ClipId, ClipRecord>,
}

/// Resolved clip paths handed to the dispatcher
#[derive(Debug, Clone, Default)]
pub struct ClipSet {
    paths: HashMap<ClipId, PathBuf>,
}

impl ClipSet {
    pub fn get(&self, id: ClipId) -> Option<&Path> {
        self.paths.get(&id).map(PathBuf::as_path)
    }

    pub fn insert(&mut self, id: ClipId, path: PathBuf) {
        self.paths.insert(id, path);
    }
}

/// On-disk cache of rendered clips
pub struct ClipCache {
    dir: PathBuf,
    manifest: Manifest,
}

impl ClipCache {
    /// Open (or create) the cache directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AlertError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable {}: {}", manifest_path.display(), e);
                Manifest::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { dir, manifest })
    }

    /// Path of a clip rendered for exactly `text`, if it is cached
    pub fn lookup(&self, id: ClipId, text: &str) -> Option<PathBuf> {
        let record = self.manifest.clips.get(&id)?;
        let path = self.dir.join(&record.file);
        (record.text_sha256 == digest(text) && path.is_file()).then_some(path)
    }

    /// Return the clip for `text`, rendering it first if missing or stale
    pub fn ensure(
        &mut self,
        id: ClipId,
        text: &str,
        synthesizer: &dyn SpeechSynthesizer,
    ) -> Result<PathBuf, AlertError> {
        if let Some(path) = self.lookup(id, text) {
            debug!("Clip {:?} is up to date", id);
            return Ok(path);
        }

        let path = self.dir.join(id.file_name());
        info!("Rendering {:?} clip: {:?}", id, text);
        synthesizer.synthesize(text, &path)?;
        if !path.is_file() {
            return Err(AlertError::Synthesis(format!(
                "synthesizer did not produce {}",
                path.display()
            )));
        }

        self.manifest.clips.insert(
            id,
            ClipRecord {
                file: id.file_name().to_string(),
                text_sha256: digest(text),
            },
        );
        self.save()?;
        Ok(path)
    }

    /// Render every clip that is missing or stale
    pub fn prepare_all(
        &mut self,
        messages: &ClipMessages,
        synthesizer: &dyn SpeechSynthesizer,
    ) -> Result<ClipSet, AlertError> {
        let mut set = ClipSet::default();
        for id in ClipId::ALL {
            let path = self.ensure(id, messages.text(id), synthesizer)?;
            set.insert(id, path);
        }
        Ok(set)
    }

    /// Cached clips matching `messages`, without rendering anything
    pub fn cached(&self, messages: &ClipMessages) -> ClipSet {
        let mut set = ClipSet::default();
        for id in ClipId::ALL {
            match self.lookup(id, messages.text(id)) {
                Some(path) => set.insert(id, path),
                None => warn!("No up-to-date {:?} clip in {}", id, self.dir.display()),
            }
        }
        set
    }

    fn save(&self) -> Result<(), AlertError> {
        let raw = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| AlertError::Cache(e.to_string()))?;
        std::fs::write(self.dir.join(MANIFEST_FILE), raw)?;
        Ok(())
    }
}

fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
