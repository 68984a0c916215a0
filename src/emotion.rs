//! Closed emotion vocabulary shared by both modalities.
//!
//! Raw labels from either classifier are normalized into [`Emotion`] before
//! fusion. Anything that does not map falls back to [`Emotion::Neutral`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix some audio emotion models put in front of their labels
pub const VOCAL_LABEL_PREFIX: &str = "emotion_";

/// The fixed emotion vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgusted,
    Fearful,
    Happy,
    Sad,
    Surprised,
    Neutral,
}

impl Default for Emotion {
    fn default() -> Self {
        Self::Neutral
    }
}

impl Emotion {
    /// Every member of the vocabulary
    pub const ALL: [Emotion; 7] = [
        Self::Angry,
        Self::Disgusted,
        Self::Fearful,
        Self::Happy,
        Self::Sad,
        Self::Surprised,
        Self::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angry => "angry",
            Self::Disgusted => "disgusted",
            Self::Fearful => "fearful",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Surprised => "surprised",
            Self::Neutral => "neutral",
        }
    }

    /// Map a facial-classifier label (DeepFace style: `disgust`, `fear`,
    /// `surprise`, ...) into the vocabulary. Unmapped labels become neutral.
    pub fn from_facial_label(label: &str) -> Self {
        Self::try_from_facial_label(label).unwrap_or_default()
    }

    /// Like [`Emotion::from_facial_label`] but `None` for unknown labels
    pub fn try_from_facial_label(label: &str) -> Option<Self> {
        match label {
            "angry" => Some(Self::Angry),
            "disgust" => Some(Self::Disgusted),
            "fear" => Some(Self::Fearful),
            "happy" => Some(Self::Happy),
            "sad" => Some(Self::Sad),
            "surprise" => Some(Self::Surprised),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Map a vocal-classifier label into the vocabulary.
    ///
    /// The `emotion_` prefix is stripped and the label lower-cased first.
    /// Vocabulary words and facial-style synonyms are accepted; anything else
    /// is neutral.
    pub fn from_vocal_label(label: &str) -> Self {
        let normalized = normalize_vocal_label(label);
        match normalized.parse::<Emotion>() {
            Ok(emotion) => emotion,
            Err(_) => Self::from_facial_label(&normalized),
        }
    }
}

/// Strip the `emotion_` prefix and lower-case a vocal label
pub fn normalize_vocal_label(label: &str) -> String {
    label.to_lowercase().replace(VOCAL_LABEL_PREFIX, "")
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "angry" => Ok(Self::Angry),
            "disgusted" => Ok(Self::Disgusted),
            "fearful" => Ok(Self::Fearful),
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "surprised" => Ok(Self::Surprised),
            "neutral" => Ok(Self::Neutral),
            _ => Err(format!("Unknown emotion: {}", s)),
        }
    }
}
