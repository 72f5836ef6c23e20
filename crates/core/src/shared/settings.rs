use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classification::domain::emotion::EmotionVocabulary;
use crate::detection::domain::backend_kind::BackendKind;
use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Tunables for one orchestrator, persisted as JSON.
///
/// Missing fields take their default, so settings files written by older
/// versions keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub vocabulary: EmotionVocabulary,
    pub backend: BackendKind,
    /// Capture queue capacity for live sources (frames beyond it replace the oldest).
    pub live_queue_capacity: usize,
    /// Capture queue capacity for file sources (capture blocks when full).
    pub file_queue_capacity: usize,
    pub recorder_queue_capacity: usize,
    pub classifier_workers: usize,
    pub model_load_timeout_secs: u64,
    /// Fraction of the face box added on every side before classification.
    pub crop_margin: f64,
    pub cascade_min_face_size: u32,
    pub deep_confidence: f64,
    pub mesh_confidence: f64,
    pub models_dir: Option<PathBuf>,
    /// Pace file sources at their native frame rate.
    pub realtime_playback: bool,
    /// Frames jumped by the rewind / forward controls.
    pub skip_frames: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            vocabulary: EmotionVocabulary::Seven,
            backend: BackendKind::Cascade,
            live_queue_capacity: 1,
            file_queue_capacity: 8,
            recorder_queue_capacity: 32,
            classifier_workers: 2,
            model_load_timeout_secs: 30,
            crop_margin: 0.1,
            cascade_min_face_size: 20,
            deep_confidence: 0.25,
            mesh_confidence: 0.5,
            models_dir: None,
            realtime_playback: true,
            skip_frames: 30,
        }
    }
}

impl PipelineSettings {
    /// `<config_dir>/MoodLens/settings.json`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    /// Loads from the platform config path, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_or_default(&path),
            _ => Self::default(),
        }
    }

    /// Loads from `path`, logging and falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load_from(path)
            .and_then(|settings| settings.validate().map(|_| settings))
            .unwrap_or_else(|e| {
                log::warn!("{e}; using default settings");
                Self::default()
            })
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.live_queue_capacity == 0
            || self.file_queue_capacity == 0
            || self.recorder_queue_capacity == 0
        {
            return Err(SettingsError::Invalid(
                "queue capacities must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crop_margin) {
            return Err(SettingsError::Invalid(format!(
                "crop_margin must be within 0.0-1.0, got {}",
                self.crop_margin
            )));
        }
        for (name, value) in [
            ("deep_confidence", self.deep_confidence),
            ("mesh_confidence", self.mesh_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SettingsError::Invalid(format!(
                    "{name} must be within 0.0-1.0, got {value}"
                )));
            }
        }
        if self.model_load_timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "model_load_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_secs(self.model_load_timeout_secs)
    }
}
