use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::shared::constants::IMAGE_EXTENSIONS;

/// What kind of device or file backs a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Camera,
    VideoFile,
    Image,
}

impl SourceKind {
    /// Live sources favour recency; everything else favours completeness.
    pub fn is_live(self) -> bool {
        matches!(self, SourceKind::Camera)
    }

    /// Only video files have a position that can be paused or sought.
    pub fn supports_playback(self) -> bool {
        matches!(self, SourceKind::VideoFile)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::VideoFile => write!(f, "video file"),
            SourceKind::Image => write!(f, "image"),
        }
    }
}

/// Identifies a frame source to open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    Camera { index: u32 },
    VideoFile(PathBuf),
    Image(PathBuf),
}

impl SourceDescriptor {
    /// Classifies a file path as an image (by extension) or a video.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if is_image(&path) {
            SourceDescriptor::Image(path)
        } else {
            SourceDescriptor::VideoFile(path)
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Camera { .. } => SourceKind::Camera,
            SourceDescriptor::VideoFile(_) => SourceKind::VideoFile,
            SourceDescriptor::Image(_) => SourceKind::Image,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            SourceDescriptor::Camera { .. } => None,
            SourceDescriptor::VideoFile(p) | SourceDescriptor::Image(p) => Some(p),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Camera { index } => write!(f, "camera:{index}"),
            SourceDescriptor::VideoFile(p) | SourceDescriptor::Image(p) => {
                write!(f, "{}", p.display())
            }
        }
    }
}

impl FromStr for SourceDescriptor {
    type Err = String;

    /// Accepts `camera:<index>`, `camera` (index 0), or a file path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty source".into());
        }
        if trimmed.eq_ignore_ascii_case("camera") {
            return Ok(SourceDescriptor::Camera { index: 0 });
        }
        if let Some(index) = trimmed.strip_prefix("camera:") {
            return index
                .parse()
                .map(|index| SourceDescriptor::Camera { index })
                .map_err(|_| format!("invalid camera index: {index}"));
        }
        Ok(SourceDescriptor::from_path(trimmed))
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
