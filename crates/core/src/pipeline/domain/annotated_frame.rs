use std::sync::Arc;

use crate::classification::domain::emotion_result::FaceEmotion;
use crate::detection::domain::backend_kind::BackendKind;
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

/// One located face and what the classifier made of it.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedFace {
    pub region: FaceRegion,
    pub emotion: FaceEmotion,
}

/// A frame with its faces in detector output order.
///
/// Produced at most once per captured frame. The pixel buffer is shared
/// with every consumer; consumers that draw on it copy it first.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub frame: Arc<Frame>,
    pub faces: Vec<AnnotatedFace>,
    /// Backend that located `faces`; `None` when no backend was ready.
    pub backend: Option<BackendKind>,
    /// Capture order within the current source.
    pub sequence: u64,
    /// Set when a model was not ready and detection was skipped.
    pub readiness_note: Option<String>,
}

impl AnnotatedFrame {
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn classified_count(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| f.emotion.result().is_some())
            .count()
    }
}
