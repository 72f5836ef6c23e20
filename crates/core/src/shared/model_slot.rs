use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;

use crate::shared::model_resolver::ModelResolveError;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model artifact unavailable: {0}")]
    ModelMissing(#[from] ModelResolveError),
    #[error("failed to initialise {model}: {reason}")]
    Model { model: String, reason: String },
    #[error("{model} did not finish loading within {timeout:?}")]
    Timeout { model: String, timeout: Duration },
    #[error("loading {model} was abandoned")]
    Cancelled { model: String },
}

impl ModelLoadError {
    pub fn model(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Model {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

/// Observable state of a [`ModelSlot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed(String),
}

enum SlotState<T: ?Sized> {
    Loading,
    Ready(Arc<T>),
    Failed(String),
}

/// A model that is loaded once on a background thread under a deadline.
///
/// Callers on the hot path use [`ModelSlot::get`], which never blocks; a
/// slot that is still loading or has failed simply yields `None`.
pub struct ModelSlot<T: ?Sized> {
    label: String,
    state: Mutex<SlotState<T>>,
    settled: Condvar,
}

impl<T: ?Sized + Send + Sync + 'static> ModelSlot<T> {
    /// Starts `load` on its own thread. If it has not produced a model
    /// after `timeout` the slot fails with [`ModelLoadError::Timeout`] and a
    /// late result is discarded.
    pub fn spawn<F>(label: impl Into<String>, timeout: Duration, load: F) -> Arc<Self>
    where
        F: FnOnce() -> Result<Arc<T>, ModelLoadError> + Send + 'static,
    {
        let slot = Arc::new(Self::with_state(label.into(), SlotState::Loading));
        let (tx, rx) = crossbeam_channel::bounded(1);

        thread::spawn(move || {
            let _ = tx.send(load());
        });

        let watcher = slot.clone();
        thread::spawn(move || {
            let outcome = match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(ModelLoadError::Timeout {
                    model: watcher.label.clone(),
                    timeout,
                }),
                Err(RecvTimeoutError::Disconnected) => Err(ModelLoadError::Cancelled {
                    model: watcher.label.clone(),
                }),
            };
            watcher.settle(outcome);
        });

        slot
    }

    /// A slot whose model is already available.
    pub fn preloaded(label: impl Into<String>, model: Arc<T>) -> Arc<Self> {
        Arc::new(Self::with_state(label.into(), SlotState::Ready(model)))
    }

    fn with_state(label: String, state: SlotState<T>) -> Self {
        Self {
            label,
            state: Mutex::new(state),
            settled: Condvar::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            SlotState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    pub fn readiness(&self) -> Readiness {
        readiness_of(&self.lock())
    }

    /// Blocks until the slot settles or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while matches!(*guard, SlotState::Loading) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = self
                .settled
                .wait_timeout(guard, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        readiness_of(&guard)
    }

    fn settle(&self, outcome: Result<Arc<T>, ModelLoadError>) {
        let state = match outcome {
            Ok(model) => {
                log::info!("{} ready", self.label);
                SlotState::Ready(model)
            }
            Err(e) => {
                log::warn!("{} unavailable: {e}", self.label);
                SlotState::Failed(e.to_string())
            }
        };
        *self.lock() = state;
        self.settled.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn readiness_of<T: ?Sized>(state: &SlotState<T>) -> Readiness {
    match state {
        SlotState::Loading => Readiness::Loading,
        SlotState::Ready(_) => Readiness::Ready,
        SlotState::Failed(reason) => Readiness::Failed(reason.clone()),
    }
}
