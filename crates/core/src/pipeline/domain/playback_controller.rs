use std::time::Duration;

use thiserror::Error;

use crate::capture::domain::frame_source::SourceError;
use crate::capture::domain::source_descriptor::SourceKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Seeking,
    Ended,
}

/// Position and status of a file-backed source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub position: Duration,
    /// `None` when the container does not say how long it is.
    pub duration: Option<Duration>,
    pub status: PlaybackStatus,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {action} while {from:?}")]
pub struct InvalidTransition {
    pub from: PlaybackStatus,
    pub action: &'static str,
}

/// Failure of a playback command issued to the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("no source is open")]
    NoSource,
    #[error("{0} sources cannot be paused or resumed")]
    NotFileBacked(SourceKind),
    #[error("{0} sources cannot seek")]
    SeekUnsupported(SourceKind),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("seek failed: {0}")]
    Seek(SourceError),
}

/// State machine for a file source's play head.
///
/// Pure: it never touches the source. The capture loop consults
/// [`PlaybackController::is_pulling`] before reading and reports progress
/// back through [`advance`](Self::advance) and
/// [`source_exhausted`](Self::source_exhausted).
#[derive(Debug, Clone)]
pub struct PlaybackController {
    position: Duration,
    duration: Option<Duration>,
    status: PlaybackStatus,
    seek_target: Duration,
}

impl PlaybackController {
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            position: Duration::ZERO,
            duration,
            status: PlaybackStatus::Playing,
            seek_target: Duration::ZERO,
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            position: self.position,
            duration: self.duration,
            status: self.status,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    /// True when the capture loop should read the next frame.
    pub fn is_pulling(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    /// Idempotent while paused.
    pub fn pause(&mut self) -> Result<(), InvalidTransition> {
        match self.status {
            PlaybackStatus::Playing | PlaybackStatus::Paused => {
                self.status = PlaybackStatus::Paused;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "pause",
            }),
        }
    }

    /// Idempotent while playing.
    pub fn resume(&mut self) -> Result<(), InvalidTransition> {
        match self.status {
            PlaybackStatus::Paused | PlaybackStatus::Playing => {
                self.status = PlaybackStatus::Playing;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "resume",
            }),
        }
    }

    /// Enters `Seeking` towards `target`, clamped to the duration when it
    /// is known, and returns the clamped target. Allowed from `Ended` for
    /// replay.
    pub fn begin_seek(&mut self, target: Duration) -> Result<Duration, InvalidTransition> {
        if self.status == PlaybackStatus::Seeking {
            return Err(InvalidTransition {
                from: self.status,
                action: "seek",
            });
        }
        let target = self.clamp(target);
        self.seek_target = target;
        self.status = PlaybackStatus::Seeking;
        Ok(target)
    }

    /// Target of a relative jump from the current position, clamped.
    pub fn offset_target(&self, delta: Duration, forward: bool) -> Duration {
        if forward {
            self.clamp(self.position.saturating_add(delta))
        } else {
            self.position.saturating_sub(delta)
        }
    }

    fn clamp(&self, target: Duration) -> Duration {
        self.duration.map_or(target, |d| target.min(d))
    }

    pub fn complete_seek(&mut self) {
        if self.status == PlaybackStatus::Seeking {
            self.position = self.seek_target;
            self.status = PlaybackStatus::Paused;
        }
    }

    /// Leaves the position where it was.
    pub fn abort_seek(&mut self) {
        if self.status == PlaybackStatus::Seeking {
            self.status = PlaybackStatus::Paused;
        }
    }

    /// Records the timestamp of the frame just read.
    pub fn advance(&mut self, timestamp: Duration) {
        self.position = timestamp;
    }

    pub fn source_exhausted(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Ended;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn controller() -> PlaybackController {
        PlaybackController::new(Some(secs(10)))
    }

    #[test]
    fn test_starts_playing_at_zero() {
        let c = controller();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert_eq!(c.position(), Duration::ZERO);
        assert!(c.is_pulling());
    }

    #[test]
    fn test_pause_resume_keeps_position() {
        let mut c = controller();
        c.advance(secs(3));
        c.pause().unwrap();
        assert_eq!(c.state().position, secs(3));
        c.resume().unwrap();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert_eq!(c.position(), secs(3));
    }

    #[test]
    fn test_pause_twice_is_idempotent() {
        let mut c = controller();
        c.advance(secs(2));
        c.pause().unwrap();
        c.pause().unwrap();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.position(), secs(2));
        assert!(!c.is_pulling());
    }

    #[test]
    fn test_seek_completes_paused_at_target() {
        let mut c = controller();
        assert_eq!(c.begin_seek(secs(4)).unwrap(), secs(4));
        assert_eq!(c.status(), PlaybackStatus::Seeking);
        assert!(!c.is_pulling());
        c.complete_seek();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.position(), secs(4));
    }

    #[test]
    fn test_seek_target_is_clamped_to_duration() {
        let mut c = controller();
        assert_eq!(c.begin_seek(secs(99)).unwrap(), secs(10));
    }

    #[test]
    fn test_ended_allows_seek_for_replay() {
        let mut c = controller();
        c.source_exhausted();
        assert_eq!(c.status(), PlaybackStatus::Ended);
        assert!(c.pause().is_err());
        c.begin_seek(Duration::ZERO).unwrap();
        c.complete_seek();
        c.resume().unwrap();
        assert!(c.is_pulling());
    }

    #[test]
    fn test_abort_seek_keeps_position() {
        let mut c = controller();
        c.advance(secs(5));
        c.begin_seek(secs(1)).unwrap();
        c.abort_seek();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.position(), secs(5));
    }

    #[rstest]
    #[case(PlaybackStatus::Seeking)]
    #[case(PlaybackStatus::Ended)]
    fn test_resume_rejected_outside_pause(#[case] status: PlaybackStatus) {
        let mut c = controller();
        match status {
            PlaybackStatus::Seeking => {
                c.begin_seek(secs(1)).unwrap();
            }
            _ => c.source_exhausted(),
        }
        let err = c.resume().unwrap_err();
        assert_eq!(err.from, status);
    }

    #[test]
    fn test_seek_while_seeking_is_rejected() {
        let mut c = controller();
        c.begin_seek(secs(1)).unwrap();
        assert!(c.begin_seek(secs(2)).is_err());
    }

    #[rstest]
    #[case(secs(5), secs(2), false, secs(3))]
    #[case(secs(1), secs(2), false, Duration::ZERO)]
    #[case(secs(9), secs(2), true, secs(10))]
    fn test_offset_target_clamps(
        #[case] at: Duration,
        #[case] delta: Duration,
        #[case] forward: bool,
        #[case] expected: Duration,
    ) {
        let mut c = controller();
        c.advance(at);
        assert_eq!(c.offset_target(delta, forward), expected);
    }

    #[test]
    fn test_unknown_duration_seeks_anywhere_forward() {
        let mut c = PlaybackController::new(None);
        assert_eq!(c.begin_seek(secs(30)).unwrap(), secs(30));
        c.complete_seek();
        assert_eq!(c.position(), secs(30));
        assert_eq!(c.state().duration, None);
        assert_eq!(c.offset_target(secs(2), true), secs(32));
        assert_eq!(c.offset_target(secs(40), false), Duration::ZERO);
    }
}
