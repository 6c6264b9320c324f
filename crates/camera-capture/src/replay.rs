//! Image-sequence replay source
//!
//! Plays back a directory of still images (`.png`, `.jpg`, `.jpeg`, `.bmp`)
//! in file-name order, stamping them as if captured at a fixed rate.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{CameraError, FrameSource, VideoFrame};

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Replays recorded frames from disk
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    interval_ns: u64,
}

impl ImageSequenceSource {
    /// Open a directory of frames replayed at `fps`
    pub fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Unavailable(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no image frames found in {}",
                dir.display()
            )));
        }

        info!("Replaying {} frames from {}", files.len(), dir.display());

        Ok(Self {
            files,
            next: 0,
            interval_ns: 1_000_000_000 / fps.max(1) as u64,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let index = self.next;
        let Some(path) = self.files.get(index) else {
            return Ok(None);
        };
        // Consume the slot first so an unreadable file is skipped, not retried
        self.next += 1;

        let image = image::open(path)
            .map_err(|e| CameraError::Format(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        let sequence = index as u32;
        let timestamp_ns = index as u64 * self.interval_ns;

        debug!("Replay frame {} from {}", sequence, path.display());
        Ok(Some(VideoFrame::from_image(image, timestamp_ns, sequence)))
    }
}
