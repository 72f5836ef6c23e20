use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::detection::domain::backend_kind::BackendKind;
use crate::shared::frame::Frame;
use crate::shared::model_slot::ModelLoadError;
use crate::shared::region::FaceRegion;

pub type DetectError = Box<dyn std::error::Error + Send + Sync>;

/// Locates faces in a frame.
///
/// Backends are shared read-only between threads once loaded, so `detect`
/// takes `&self`; adapters that need exclusive access to an inference
/// session guard it internally for the duration of one call.
pub trait DetectorBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Faces in detector output order. Boxes should already be clamped to
    /// the frame; [`locate`] drops any that are not.
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectError>;
}

/// Loads backends on demand. Called off the capture thread.
pub trait DetectorFactory: Send + Sync {
    fn load(&self, kind: BackendKind) -> Result<Arc<dyn DetectorBackend>, ModelLoadError>;
}

/// Runs `backend` on `frame`, never failing.
///
/// Detector errors and panics degrade to "no faces" with a logged warning.
/// Every returned region lies inside the frame and is attributed to
/// `backend`.
pub fn locate(backend: &dyn DetectorBackend, frame: &Frame) -> Vec<FaceRegion> {
    let kind = backend.kind();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.detect(frame)));
    let regions = match outcome {
        Ok(Ok(regions)) => regions,
        Ok(Err(e)) => {
            log::warn!("{kind} detector failed on frame {}: {e}", frame.index());
            return Vec::new();
        }
        Err(_) => {
            log::warn!("{kind} detector panicked on frame {}", frame.index());
            return Vec::new();
        }
    };

    let (width, height) = (frame.width(), frame.height());
    regions
        .into_iter()
        .filter(|r| r.bbox.fits_within(width, height))
        .map(|r| FaceRegion { backend: kind, ..r })
        .collect()
}
