/// FER+ emotion classifier using ONNX Runtime via `ort`.
///
/// Input is a `1x1x64x64` grayscale face with raw 0-255 intensities; the
/// output is 8 logits that are softmaxed and projected onto the configured
/// vocabulary.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::classification::domain::emotion::{Emotion, EmotionVocabulary};
use crate::classification::domain::emotion_classifier::{
    ClassificationError, ClassifierFactory, EmotionClassifier,
};
use crate::classification::domain::emotion_result::EmotionResult;
use crate::classification::domain::face_crop::grayscale_crop;
use crate::detection::infrastructure::execution_provider::build_session;
use crate::shared::constants::EMOTION_MODEL;
use crate::shared::frame::Frame;
use crate::shared::model_resolver::{self, logged_progress};
use crate::shared::model_slot::ModelLoadError;
use crate::shared::region::FaceRegion;
use crate::shared::settings::PipelineSettings;

/// FER+ input resolution.
const INPUT_SIZE: u32 = 64;

/// FER+ output order. Contempt has no counterpart in the vocabulary.
const FERPLUS_LABELS: [Option<Emotion>; 8] = [
    Some(Emotion::Neutral),
    Some(Emotion::Happy),
    Some(Emotion::Surprised),
    Some(Emotion::Sad),
    Some(Emotion::Angry),
    Some(Emotion::Disgust),
    Some(Emotion::Fear),
    None,
];

pub struct OnnxFerPlusClassifier {
    session: Mutex<ort::session::Session>,
    vocabulary: EmotionVocabulary,
    crop_margin: f64,
}

impl OnnxFerPlusClassifier {
    pub fn new(
        model_path: &Path,
        vocabulary: EmotionVocabulary,
        crop_margin: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
            vocabulary,
            crop_margin,
        })
    }

    fn infer(&self, input: ndarray::Array4<f32>) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let input_value = ort::value::Tensor::from_array(input)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("FER+ model produced no outputs".into());
        }
        let logits = outputs[0].try_extract_array::<f32>()?;
        let data = logits.as_slice().ok_or("cannot get logit slice")?;
        Ok(data.to_vec())
    }
}

impl EmotionClassifier for OnnxFerPlusClassifier {
    fn vocabulary(&self) -> EmotionVocabulary {
        self.vocabulary
    }

    fn classify(
        &self,
        frame: &Frame,
        face: &FaceRegion,
    ) -> Result<EmotionResult, ClassificationError> {
        let patch = grayscale_crop(frame, &face.bbox, self.crop_margin, INPUT_SIZE)?;
        let size = INPUT_SIZE as usize;
        let input = ndarray::Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
            patch.get_pixel(x as u32, y as u32).0[0] as f32
        });

        let logits = self
            .infer(input)
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;
        project(&logits, self.vocabulary)
    }
}

/// Softmax over FER+ logits, projected onto `vocabulary`.
fn project(logits: &[f32], vocabulary: EmotionVocabulary) -> Result<EmotionResult, ClassificationError> {
    if logits.len() < FERPLUS_LABELS.len() {
        return Err(ClassificationError::Inference(format!(
            "expected {} logits, got {}",
            FERPLUS_LABELS.len(),
            logits.len()
        )));
    }
    let logits = &logits[..FERPLUS_LABELS.len()];
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    let scores = FERPLUS_LABELS
        .iter()
        .zip(exps)
        .filter_map(|(label, e)| label.map(|emotion| (emotion, e / total)));
    EmotionResult::from_scores(vocabulary, scores)
}

/// Loads the FER+ model, resolving it like the detector models.
#[derive(Clone, Debug)]
pub struct FerPlusClassifierFactory {
    models_dir: Option<PathBuf>,
    crop_margin: f64,
}

impl FerPlusClassifierFactory {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            models_dir: settings.models_dir.clone(),
            crop_margin: settings.crop_margin,
        }
    }
}

impl ClassifierFactory for FerPlusClassifierFactory {
    fn load(
        &self,
        vocabulary: EmotionVocabulary,
    ) -> Result<Arc<dyn EmotionClassifier>, ModelLoadError> {
        log::info!("Resolving model: {}", EMOTION_MODEL.file_name);
        let path = model_resolver::resolve(
            &EMOTION_MODEL,
            self.models_dir.as_deref(),
            Some(logged_progress(EMOTION_MODEL.file_name)),
        )?;
        let classifier = OnnxFerPlusClassifier::new(&path, vocabulary, self.crop_margin)
            .map_err(|e| ModelLoadError::model(path.display().to_string(), e))?;
        log::info!("Loaded emotion classifier ({} classes)", vocabulary.len());
        Ok(Arc::new(classifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_project_seven_sums_to_one() {
        let logits = [0.5, 4.0, 0.1, -1.0, 0.0, -2.0, 0.3, 1.0];
        let result = project(&logits, EmotionVocabulary::Seven).unwrap();

        let total: f32 = result.probabilities().iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
        assert_eq!(result.dominant(), Emotion::Happy);
    }

    #[test]
    fn test_project_drops_contempt() {
        // Contempt dominates the logits but is not a vocabulary label
        let logits = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 10.0];
        let result = project(&logits, EmotionVocabulary::Seven).unwrap();
        for (_, p) in result.probabilities() {
            assert_relative_eq!(*p, 1.0 / 7.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_project_five_class_excludes_fear() {
        let logits = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 8.0, 0.0];
        let result = project(&logits, EmotionVocabulary::Five).unwrap();
        assert_eq!(result.probabilities().len(), 5);
        assert_relative_eq!(result.probability(Emotion::Fear), 0.0);
    }

    #[test]
    fn test_project_rejects_short_output() {
        let result = project(&[1.0, 2.0], EmotionVocabulary::Seven);
        assert!(matches!(result, Err(ClassificationError::Inference(_))));
    }

    #[test]
    fn test_factory_reports_corrupt_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EMOTION_MODEL.file_name), b"garbage").unwrap();
        let settings = PipelineSettings {
            models_dir: Some(dir.path().to_path_buf()),
            ..PipelineSettings::default()
        };

        let result = FerPlusClassifierFactory::from_settings(&settings).load(EmotionVocabulary::Seven);
        assert!(matches!(result, Err(ModelLoadError::Model { .. })));
    }
}
