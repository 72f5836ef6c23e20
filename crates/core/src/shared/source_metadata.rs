use std::path::PathBuf;
use std::time::Duration;

use crate::capture::domain::source_descriptor::SourceKind;

/// Frame geometry and timing reported by an opened source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceMetadata {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
    /// Native frame rate; 0 for stills.
    pub fps: f64,
    /// Known only for file-backed sources.
    pub duration: Option<Duration>,
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
}

impl SourceMetadata {
    /// Frame rate used when writing recordings, falling back to 30 fps
    /// when the source does not report a usable rate.
    pub fn recording_fps(&self) -> f64 {
        if self.fps.is_finite() && self.fps >= 1.0 {
            self.fps
        } else {
            30.0
        }
    }

    /// Duration spanned by `frames` frames at the native rate.
    pub fn frames_to_duration(&self, frames: u32) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.recording_fps())
    }
}
