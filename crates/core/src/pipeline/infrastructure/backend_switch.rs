use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::{DetectorBackend, DetectorFactory};
use crate::pipeline::domain::session::SessionEvent;
use crate::shared::model_slot::{ModelSlot, Readiness};

type Backend = Arc<dyn DetectorBackend>;

struct Pending {
    kind: BackendKind,
    slot: Arc<ModelSlot<dyn DetectorBackend>>,
}

#[derive(Default)]
struct SwitchState {
    requested: Option<BackendKind>,
    pending: Option<Pending>,
    current: Option<Backend>,
    loaded: HashMap<BackendKind, Backend>,
    /// Why the most recent request could not be served.
    failure: Option<String>,
}

/// Coordinates backend selection with the processing loop.
///
/// Selection only starts a load. A finished load is published as the
/// current backend the next time anyone looks, but the processing loop
/// only picks it up in [`at_frame_boundary`](Self::at_frame_boundary),
/// between two frames, so a frame is always located by exactly one
/// backend. Loaded backends are kept so switching back is immediate.
pub struct BackendSwitch {
    factory: Arc<dyn DetectorFactory>,
    load_timeout: Duration,
    events: Sender<SessionEvent>,
    state: Mutex<SwitchState>,
}

impl BackendSwitch {
    pub fn new(
        factory: Arc<dyn DetectorFactory>,
        load_timeout: Duration,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            factory,
            load_timeout,
            events,
            state: Mutex::new(SwitchState::default()),
        }
    }

    /// Requests `kind` for subsequent frames. Loading runs on its own
    /// thread; until it is ready the current backend stays in use.
    pub fn request(&self, kind: BackendKind) {
        let mut state = self.lock();
        state.requested = Some(kind);

        if state.pending.as_ref().is_some_and(|p| p.kind == kind) {
            return;
        }
        state.failure = None;
        let label = format!("{kind} backend");
        let slot = match state.loaded.get(&kind) {
            Some(backend) => ModelSlot::preloaded(label, Arc::clone(backend)),
            None => {
                log::info!("Loading {kind} backend");
                let factory = Arc::clone(&self.factory);
                ModelSlot::spawn(label, self.load_timeout, move || factory.load(kind))
            }
        };
        state.pending = Some(Pending { kind, slot });
    }

    /// Hands the processing loop the current backend, taking in a load
    /// that has just finished.
    ///
    /// `active` is the loop's own reference; it is replaced wholesale,
    /// never mutated, so regions already emitted keep the backend they
    /// were located with.
    pub fn at_frame_boundary(&self, active: &mut Option<Backend>) {
        let mut state = self.lock();
        self.absorb_finished_load(&mut state);
        if !same_backend(active, &state.current) {
            active.clone_from(&state.current);
        }
    }

    pub fn current_kind(&self) -> Option<BackendKind> {
        let mut state = self.lock();
        self.absorb_finished_load(&mut state);
        state.current.as_ref().map(|b| b.kind())
    }

    pub fn requested_kind(&self) -> Option<BackendKind> {
        self.lock().requested
    }

    /// Readiness of the most recent request.
    pub fn readiness(&self) -> Readiness {
        let mut state = self.lock();
        self.absorb_finished_load(&mut state);
        match (&state.pending, &state.failure, &state.current) {
            (Some(_), _, _) => Readiness::Loading,
            (None, Some(reason), _) => Readiness::Failed(reason.clone()),
            (None, None, Some(_)) => Readiness::Ready,
            (None, None, None) => Readiness::Loading,
        }
    }

    /// Publishes a pending load that has settled. Success becomes the
    /// current backend; a failure is reported once and the previous
    /// backend stays current.
    fn absorb_finished_load(&self, state: &mut SwitchState) {
        let Some(pending) = state.pending.as_ref() else {
            return;
        };
        let kind = pending.kind;
        match pending.slot.readiness() {
            Readiness::Loading => {}
            Readiness::Ready => {
                let Some(backend) = pending.slot.get() else {
                    return;
                };
                state.pending = None;
                state.loaded.insert(kind, Arc::clone(&backend));
                state.current = Some(backend);
                log::info!("Switched to {kind} backend");
                let _ = self.events.send(SessionEvent::BackendActivated(kind));
            }
            Readiness::Failed(reason) => {
                let model = pending.slot.label().to_string();
                state.pending = None;
                state.failure = Some(reason.clone());
                log::warn!("Keeping previous backend; {model} failed: {reason}");
                let _ = self.events.send(SessionEvent::ReadinessFault { model, reason });
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_backend(a: &Option<Backend>, b: &Option<Backend>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detector_backend::DetectError;
    use crate::shared::frame::Frame;
    use crate::shared::model_slot::ModelLoadError;
    use crate::shared::region::FaceRegion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct Stub(BackendKind);

    impl DetectorBackend for Stub {
        fn kind(&self) -> BackendKind {
            self.0
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectError> {
            Ok(Vec::new())
        }
    }

    /// Loads instantly, except kinds gated on a channel or configured to fail.
    struct StubFactory {
        loads: AtomicUsize,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        failing: Option<BackendKind>,
    }

    impl StubFactory {
        fn instant() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                gate: Mutex::new(None),
                failing: None,
            }
        }
    }

    impl DetectorFactory for StubFactory {
        fn load(&self, kind: BackendKind) -> Result<Backend, ModelLoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = self.gate.lock().unwrap().take() {
                let _ = gate.recv();
            }
            if self.failing == Some(kind) {
                return Err(ModelLoadError::model(kind.name(), "weights corrupt"));
            }
            Ok(Arc::new(Stub(kind)))
        }
    }

    fn switch(
        factory: &Arc<StubFactory>,
    ) -> (BackendSwitch, crossbeam_channel::Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let factory: Arc<dyn DetectorFactory> = factory.clone();
        (BackendSwitch::new(factory, Duration::from_secs(5), tx), rx)
    }

    fn settle(switch: &BackendSwitch) {
        let pending = switch.lock().pending.as_ref().map(|p| Arc::clone(&p.slot));
        if let Some(slot) = pending {
            slot.wait(Duration::from_secs(5));
        }
    }

    fn kind_of(active: &Option<Backend>) -> Option<BackendKind> {
        active.as_ref().map(|b| b.kind())
    }

    #[test]
    fn test_swap_happens_at_boundary() {
        let factory = Arc::new(StubFactory::instant());
        let (switch, events) = switch(&factory);
        let mut active = None;

        switch.request(BackendKind::Cascade);
        settle(&switch);
        assert!(active.is_none());

        switch.at_frame_boundary(&mut active);
        assert_eq!(kind_of(&active), Some(BackendKind::Cascade));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::BackendActivated(BackendKind::Cascade)
        );
    }

    #[test]
    fn test_previous_backend_stays_while_loading() {
        let factory = Arc::new(StubFactory::instant());
        let (switch, _events) = switch(&factory);
        let mut active = None;
        switch.request(BackendKind::Cascade);
        settle(&switch);
        switch.at_frame_boundary(&mut active);

        let (gate_tx, gate_rx) = mpsc::channel();
        *factory.gate.lock().unwrap() = Some(gate_rx);
        switch.request(BackendKind::DeepDetector);
        for _ in 0..3 {
            switch.at_frame_boundary(&mut active);
            assert_eq!(kind_of(&active), Some(BackendKind::Cascade));
        }
        assert_eq!(switch.readiness(), Readiness::Loading);
        assert_eq!(switch.requested_kind(), Some(BackendKind::DeepDetector));

        drop(gate_tx);
        settle(&switch);
        switch.at_frame_boundary(&mut active);
        assert_eq!(kind_of(&active), Some(BackendKind::DeepDetector));
    }

    #[test]
    fn test_failed_load_keeps_previous_and_reports_once() {
        let mut stub = StubFactory::instant();
        stub.failing = Some(BackendKind::LandmarkMesh);
        let factory = Arc::new(stub);
        let (switch, events) = switch(&factory);
        let mut active = None;
        switch.request(BackendKind::Cascade);
        settle(&switch);
        switch.at_frame_boundary(&mut active);
        let _ = events.try_recv();

        switch.request(BackendKind::LandmarkMesh);
        settle(&switch);
        switch.at_frame_boundary(&mut active);
        switch.at_frame_boundary(&mut active);

        assert_eq!(kind_of(&active), Some(BackendKind::Cascade));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::ReadinessFault { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_switching_back_reuses_loaded_backend() {
        let factory = Arc::new(StubFactory::instant());
        let (switch, _events) = switch(&factory);
        let mut active = None;
        for kind in [
            BackendKind::Cascade,
            BackendKind::DeepDetector,
            BackendKind::Cascade,
        ] {
            switch.request(kind);
            settle(&switch);
            switch.at_frame_boundary(&mut active);
        }
        assert_eq!(switch.current_kind(), Some(BackendKind::Cascade));
        assert_eq!(factory.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_loop_picks_up_current_backend() {
        let factory = Arc::new(StubFactory::instant());
        let (switch, _events) = switch(&factory);
        switch.request(BackendKind::DeepDetector);
        settle(&switch);
        let mut first = None;
        switch.at_frame_boundary(&mut first);

        let mut fresh = None;
        switch.at_frame_boundary(&mut fresh);
        assert!(Arc::ptr_eq(first.as_ref().unwrap(), fresh.as_ref().unwrap()));
    }

    #[test]
    fn test_finished_load_is_published_without_frames() {
        let factory = Arc::new(StubFactory::instant());
        let (switch, events) = switch(&factory);
        switch.request(BackendKind::Cascade);
        settle(&switch);

        assert_eq!(switch.readiness(), Readiness::Ready);
        assert_eq!(switch.current_kind(), Some(BackendKind::Cascade));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::BackendActivated(BackendKind::Cascade)
        );

        // The loop adopts it at its first boundary without a second event
        let mut active = None;
        switch.at_frame_boundary(&mut active);
        assert_eq!(kind_of(&active), Some(BackendKind::Cascade));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_failure_stays_visible_until_next_request() {
        let mut stub = StubFactory::instant();
        stub.failing = Some(BackendKind::LandmarkMesh);
        let factory = Arc::new(stub);
        let (switch, _events) = switch(&factory);

        switch.request(BackendKind::LandmarkMesh);
        settle(&switch);
        let mut active = None;
        switch.at_frame_boundary(&mut active);
        assert!(active.is_none());
        assert!(matches!(switch.readiness(), Readiness::Failed(_)));
        assert!(matches!(switch.readiness(), Readiness::Failed(_)));

        switch.request(BackendKind::Cascade);
        settle(&switch);
        assert_eq!(switch.readiness(), Readiness::Ready);
    }
}
