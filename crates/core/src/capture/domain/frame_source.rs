use std::time::Duration;

use thiserror::Error;

use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("source unavailable: {descriptor}: {reason}")]
    Unavailable { descriptor: String, reason: String },
    #[error("device error: {0}")]
    Device(String),
    #[error("seek is not supported by {0} sources")]
    SeekUnsupported(SourceKind),
    /// The container could not be repositioned; the stream itself is intact.
    #[error("seek to {position:?} failed: {reason}")]
    Seek { position: Duration, reason: String },
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn unavailable(descriptor: &SourceDescriptor, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Produces timestamped frames from a camera, a video file or a still image.
///
/// Implementations own their device or decoder and are driven from a single
/// capture thread.
pub trait FrameSource: Send {
    fn metadata(&self) -> &SourceMetadata;

    /// Next frame, or `Ok(None)` at end of stream.
    ///
    /// Camera sources block until a frame arrives or the device fails.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Repositions the stream so the next frame's timestamp is at or after
    /// `position`.
    fn seek(&mut self, _position: Duration) -> Result<(), SourceError> {
        Err(SourceError::SeekUnsupported(self.metadata().kind))
    }

    /// Releases the device or file. Safe to call more than once.
    fn close(&mut self);
}

/// Opens sources from descriptors.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError>;
}
