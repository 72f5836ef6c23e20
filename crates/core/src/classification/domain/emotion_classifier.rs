use std::sync::Arc;

use thiserror::Error;

use crate::classification::domain::emotion::EmotionVocabulary;
use crate::classification::domain::emotion_result::EmotionResult;
use crate::shared::frame::Frame;
use crate::shared::model_slot::ModelLoadError;
use crate::shared::region::FaceRegion;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("emotion inference failed: {0}")]
    Inference(String),
    #[error("emotion classifier is not ready")]
    NotReady,
}

/// Maps one face of a frame to a distribution over the vocabulary.
///
/// Implementations are stateless across calls and shared between the
/// classification workers.
pub trait EmotionClassifier: Send + Sync {
    fn vocabulary(&self) -> EmotionVocabulary;

    fn classify(&self, frame: &Frame, face: &FaceRegion)
        -> Result<EmotionResult, ClassificationError>;
}

/// One-time classifier warm-up. Runs on a loader thread.
pub trait ClassifierFactory: Send + Sync {
    fn load(
        &self,
        vocabulary: EmotionVocabulary,
    ) -> Result<Arc<dyn EmotionClassifier>, ModelLoadError>;
}
