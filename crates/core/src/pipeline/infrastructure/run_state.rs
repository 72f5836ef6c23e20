use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::detection::domain::backend_kind::BackendKind;
use crate::pipeline::domain::annotated_frame::AnnotatedFrame;
use crate::pipeline::domain::playback_controller::{PlaybackController, PlaybackState};
use crate::pipeline::domain::session::SessionCounters;
use crate::pipeline::infrastructure::frame_queue::Push;
use crate::shared::frame::SourceId;

/// How long an idle loop waits before re-checking for cancellation.
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(50);

/// State shared by the capture and processing threads of one opened source.
///
/// A new `RunState` is created for every source, so nothing here outlives
/// a source switch.
pub struct RunState {
    source: SourceId,
    cancel: Arc<AtomicBool>,
    faulted: AtomicBool,
    playback: Option<Mutex<PlaybackController>>,
    latest: Mutex<Option<AnnotatedFrame>>,
    active_backend: Mutex<Option<BackendKind>>,
    captured: AtomicU64,
    processed: AtomicU64,
    dropped_backpressure: AtomicU64,
    max_queue_depth: AtomicU64,
}

impl RunState {
    pub fn new(source: SourceId, playback: Option<PlaybackController>) -> Self {
        Self {
            source,
            cancel: Arc::new(AtomicBool::new(false)),
            faulted: AtomicBool::new(false),
            playback: playback.map(Mutex::new),
            latest: Mutex::new(None),
            active_backend: Mutex::new(None),
            captured: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped_backpressure: AtomicU64::new(0),
            max_queue_depth: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// The source failed mid-stream; the session it belonged to is over.
    pub fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::Release);
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn has_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// Runs `f` on the playback controller, if this source has one.
    pub fn with_playback<R>(&self, f: impl FnOnce(&mut PlaybackController) -> R) -> Option<R> {
        self.playback
            .as_ref()
            .map(|p| f(&mut p.lock().unwrap_or_else(PoisonError::into_inner)))
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.with_playback(|p| p.state())
    }

    /// Live sources and stills are always pulled.
    pub fn is_pulling(&self) -> bool {
        self.with_playback(|p| p.is_pulling()).unwrap_or(true)
    }

    pub fn record_push(&self, push: &Push, depth: usize) {
        match push {
            Push::Queued => {}
            Push::Replaced(n) => {
                self.dropped_backpressure.fetch_add(*n, Ordering::Relaxed);
            }
            Push::Closed => return,
        }
        self.captured.fetch_add(1, Ordering::Relaxed);
        self.max_queue_depth.fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub fn record_processed(&self, frame: &AnnotatedFrame) -> u64 {
        *lock(&self.active_backend) = frame.backend;
        *lock(&self.latest) = Some(frame.clone());
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Most recently processed frame.
    pub fn latest(&self) -> Option<AnnotatedFrame> {
        lock(&self.latest).clone()
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        *lock(&self.active_backend)
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            captured: self.captured.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            ..SessionCounters::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
