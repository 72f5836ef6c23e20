use crate::classification::domain::emotion::{Emotion, EmotionVocabulary};
use crate::classification::domain::emotion_classifier::ClassificationError;

/// Probability distribution over a vocabulary plus its argmax.
///
/// Probabilities follow vocabulary order and sum to 1.
#[derive(Clone, Debug, PartialEq)]
pub struct EmotionResult {
    probabilities: Vec<(Emotion, f32)>,
    dominant: Emotion,
    confidence: f32,
}

impl EmotionResult {
    /// Builds a result from non-negative scores, keeping only labels in
    /// `vocabulary` and renormalizing them. Labels without a score get 0.
    pub fn from_scores(
        vocabulary: EmotionVocabulary,
        scores: impl IntoIterator<Item = (Emotion, f32)>,
    ) -> Result<Self, ClassificationError> {
        let mut probabilities: Vec<(Emotion, f32)> =
            vocabulary.emotions().iter().map(|&e| (e, 0.0)).collect();
        for (emotion, score) in scores {
            if !score.is_finite() || score < 0.0 {
                return Err(ClassificationError::Inference(format!(
                    "invalid score {score} for {emotion}"
                )));
            }
            if let Some(slot) = probabilities.iter_mut().find(|(e, _)| *e == emotion) {
                slot.1 += score;
            }
        }

        let total: f32 = probabilities.iter().map(|(_, p)| p).sum();
        if total <= 0.0 {
            return Err(ClassificationError::Inference(
                "no probability mass on the configured vocabulary".to_string(),
            ));
        }
        for (_, p) in probabilities.iter_mut() {
            *p /= total;
        }

        // First maximum wins so ties resolve in vocabulary order
        let (dominant, confidence) = probabilities
            .iter()
            .copied()
            .fold(probabilities[0], |best, cur| if cur.1 > best.1 { cur } else { best });

        Ok(Self {
            probabilities,
            dominant,
            confidence,
        })
    }

    pub fn probabilities(&self) -> &[(Emotion, f32)] {
        &self.probabilities
    }

    pub fn probability(&self, emotion: Emotion) -> f32 {
        self.probabilities
            .iter()
            .find(|(e, _)| *e == emotion)
            .map_or(0.0, |(_, p)| *p)
    }

    pub fn dominant(&self) -> Emotion {
        self.dominant
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Per-face classification outcome. A face whose classification failed is
/// kept as `Unclassified` rather than dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum FaceEmotion {
    Classified(EmotionResult),
    Unclassified,
}

impl FaceEmotion {
    pub fn result(&self) -> Option<&EmotionResult> {
        match self {
            FaceEmotion::Classified(result) => Some(result),
            FaceEmotion::Unclassified => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_scores_normalizes() {
        let result = EmotionResult::from_scores(
            EmotionVocabulary::Seven,
            [(Emotion::Happy, 3.0), (Emotion::Sad, 1.0)],
        )
        .unwrap();

        let total: f32 = result.probabilities().iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
        assert_eq!(result.probabilities().len(), 7);
        assert_eq!(result.dominant(), Emotion::Happy);
        assert_relative_eq!(result.confidence(), 0.75, epsilon = 1e-6);
        assert_relative_eq!(result.probability(Emotion::Fear), 0.0);
    }

    #[test]
    fn test_from_scores_drops_labels_outside_vocabulary() {
        let result = EmotionResult::from_scores(
            EmotionVocabulary::Five,
            [(Emotion::Fear, 5.0), (Emotion::Neutral, 1.0)],
        )
        .unwrap();

        assert_eq!(result.dominant(), Emotion::Neutral);
        assert_relative_eq!(result.confidence(), 1.0);
        assert!(result.probabilities().iter().all(|(e, _)| *e != Emotion::Fear));
    }

    #[test]
    fn test_ties_resolve_in_vocabulary_order() {
        let result = EmotionResult::from_scores(
            EmotionVocabulary::Seven,
            [(Emotion::Neutral, 1.0), (Emotion::Sad, 1.0)],
        )
        .unwrap();
        assert_eq!(result.dominant(), Emotion::Sad);
    }

    #[test]
    fn test_zero_mass_is_an_error() {
        let result = EmotionResult::from_scores(EmotionVocabulary::Five, [(Emotion::Fear, 1.0)]);
        assert!(matches!(result, Err(ClassificationError::Inference(_))));
    }

    #[test]
    fn test_negative_or_nan_scores_are_rejected() {
        let vocab = EmotionVocabulary::Seven;
        assert!(EmotionResult::from_scores(vocab, [(Emotion::Happy, -0.1)]).is_err());
        assert!(EmotionResult::from_scores(vocab, [(Emotion::Happy, f32::NAN)]).is_err());
    }

    #[test]
    fn test_unclassified_has_no_result() {
        assert!(FaceEmotion::Unclassified.result().is_none());
    }
}
