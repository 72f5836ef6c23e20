use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::pipeline::domain::annotated_frame::AnnotatedFrame;
use crate::pipeline::domain::result_renderer::ResultRenderer;
use crate::shared::frame::SourceId;

#[derive(Default)]
struct SlotState {
    latest: Option<AnnotatedFrame>,
    /// Frames from any other source are refused.
    source: Option<SourceId>,
    attached: bool,
    closed: bool,
}

/// Single-frame mailbox between processing and the presenter.
///
/// Publishing never waits: a frame the presenter has not picked up yet is
/// overwritten and counted as skipped.
#[derive(Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    available: Condvar,
    /// Held while a frame is rendered, so a reset waits for it.
    render_turn: Mutex<()>,
    skipped: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a frame. Ignored while no presenter is attached or when the
    /// frame belongs to a source other than the current one.
    pub fn publish(&self, frame: AnnotatedFrame) {
        let mut state = self.lock();
        if !state.attached || state.closed || state.source != Some(frame.frame.source()) {
            return;
        }
        if state.latest.replace(frame).is_some() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Switches to `source`, discarding anything still waiting from the
    /// previous one. Once this returns no frame of the previous source is
    /// rendered.
    pub fn reset(&self, source: Option<SourceId>) {
        let _turn = self.render_turn();
        let mut state = self.lock();
        state.latest = None;
        state.source = source;
        self.skipped.store(0, Ordering::Relaxed);
    }

    /// Frames overwritten before presentation since the last reset.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Waits for the next frame; `None` once closed.
    fn take(&self) -> Option<AnnotatedFrame> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.latest.take() {
                return Some(frame);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn accepts(&self, source: SourceId) -> bool {
        self.lock().source == Some(source)
    }

    fn render_turn(&self) -> MutexGuard<'_, ()> {
        self.render_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self) {
        let mut state = self.lock();
        state.attached = true;
        state.closed = false;
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.attached = false;
        state.latest = None;
        drop(state);
        self.available.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Presentation thread: renders whatever frame is most recent.
pub struct Presenter {
    slot: Arc<LatestFrameSlot>,
    handle: Option<JoinHandle<()>>,
}

impl Presenter {
    pub fn spawn(slot: Arc<LatestFrameSlot>, mut renderer: Box<dyn ResultRenderer>) -> Self {
        slot.attach();
        let handle = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                while let Some(frame) = slot.take() {
                    let _turn = slot.render_turn();
                    if slot.accepts(frame.frame.source()) {
                        renderer.render(&frame);
                    }
                }
            })
        };
        Self {
            slot,
            handle: Some(handle),
        }
    }

    /// Stops presenting; a frame being rendered is finished first.
    pub fn stop(&mut self) {
        self.slot.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Renderer panicked");
            }
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.stop();
    }
}
