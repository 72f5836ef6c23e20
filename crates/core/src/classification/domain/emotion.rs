use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One label of the emotion vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Neutral,
    Fear,
    Disgust,
}

/// Language used for display labels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    English,
    Spanish,
}

impl Emotion {
    pub fn label(self, locale: Locale) -> &'static str {
        match locale {
            Locale::English => match self {
                Emotion::Happy => "happy",
                Emotion::Sad => "sad",
                Emotion::Angry => "angry",
                Emotion::Surprised => "surprised",
                Emotion::Neutral => "neutral",
                Emotion::Fear => "fear",
                Emotion::Disgust => "disgust",
            },
            Locale::Spanish => match self {
                Emotion::Happy => "Feliz",
                Emotion::Sad => "Triste",
                Emotion::Angry => "Enojado",
                Emotion::Surprised => "Sorprendido",
                Emotion::Neutral => "Neutral",
                Emotion::Fear => "Miedo",
                Emotion::Disgust => "Disgusto",
            },
        }
    }

    /// Overlay colour (RGB) used when the classification is confident.
    pub fn color(self) -> [u8; 3] {
        match self {
            Emotion::Happy => [0, 255, 0],
            Emotion::Sad => [30, 144, 255],
            Emotion::Angry => [255, 0, 0],
            Emotion::Surprised => [255, 255, 0],
            Emotion::Neutral => [255, 255, 255],
            Emotion::Fear => [148, 0, 211],
            Emotion::Disgust => [0, 128, 0],
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(Locale::English))
    }
}

/// Size of the label set a deployment classifies into. Fixed for the
/// lifetime of an orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionVocabulary {
    /// happy, sad, angry, surprised, neutral
    Five,
    /// The five plus fear and disgust.
    #[default]
    Seven,
}

const FIVE: [Emotion; 5] = [
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Surprised,
    Emotion::Neutral,
];

const SEVEN: [Emotion; 7] = [
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Surprised,
    Emotion::Neutral,
    Emotion::Fear,
    Emotion::Disgust,
];

impl EmotionVocabulary {
    pub fn emotions(self) -> &'static [Emotion] {
        match self {
            EmotionVocabulary::Five => &FIVE,
            EmotionVocabulary::Seven => &SEVEN,
        }
    }

    pub fn len(self) -> usize {
        self.emotions().len()
    }

    pub fn contains(self, emotion: Emotion) -> bool {
        self.emotions().contains(&emotion)
    }
}

impl FromStr for EmotionVocabulary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5" | "five" => Ok(EmotionVocabulary::Five),
            "7" | "seven" => Ok(EmotionVocabulary::Seven),
            other => Err(format!("unsupported class count '{other}' (expected 5 or 7)")),
        }
    }
}
