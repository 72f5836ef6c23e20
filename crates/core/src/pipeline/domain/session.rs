use std::path::PathBuf;

use crate::capture::domain::frame_source::SourceError;
use crate::capture::domain::source_descriptor::SourceDescriptor;
use crate::detection::domain::backend_kind::BackendKind;
use crate::pipeline::domain::playback_controller::PlaybackState;
use crate::recording::domain::storage_error::StorageError;
use crate::shared::frame::SourceId;
use crate::shared::model_slot::Readiness;

/// Notifications for the boundary, delivered in the order they happen.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Frames from now on are located by this backend.
    BackendActivated(BackendKind),
    /// A model could not be loaded in time; detection degrades to empty.
    ReadinessFault { model: String, reason: String },
    /// The source ran out of frames. File sources stay open for seeking.
    SourceEnded { source: SourceId },
    /// The source failed mid-stream and the session's capture has stopped.
    SessionFault { source: SourceId, error: SourceError },
    /// Recording ended, with the storage failure that ended it if any.
    RecordingStopped {
        destination: PathBuf,
        error: Option<StorageError>,
    },
    PlaybackChanged(PlaybackState),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Recording {
        destination: PathBuf,
        frames_written: u64,
        frames_dropped: u64,
    },
}

impl RecordingStatus {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingStatus::Recording { .. })
    }
}

/// Frame accounting for the current source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub captured: u64,
    pub processed: u64,
    /// Replaced in the capture queue before processing reached them.
    pub dropped_backpressure: u64,
    /// Superseded before the presenter picked them up.
    pub dropped_presentation: u64,
    pub dropped_recorder: u64,
    /// Deepest the capture queue has been.
    pub max_queue_depth: u64,
}

/// Immutable copy of the session state, handed out on request.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub source: Option<SourceDescriptor>,
    pub source_id: Option<SourceId>,
    /// Backend that processed the most recent frame.
    pub active_backend: Option<BackendKind>,
    pub requested_backend: BackendKind,
    pub classifier: Readiness,
    pub playback: Option<PlaybackState>,
    pub recording: RecordingStatus,
    pub counters: SessionCounters,
}
