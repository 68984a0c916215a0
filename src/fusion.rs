//! Weighted late fusion of the facial and vocal results.
//!
//! The fused confidence mixes the facial probability (0–100) with the vocal
//! score (0–1) without rescaling, so the facial term dominates and the
//! result sits on a 0–100 scale shifted by at most `vocal_weight`.
//! Consumers depend on these exact numbers; do not rescale here.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{FacialResult, VocalResult};
use crate::emotion::Emotion;
use crate::error::StartupError;

/// Per-modality fusion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub facial: f64,
    pub vocal: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            facial: 0.6,
            vocal: 0.4,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> Result<(), StartupError> {
        for (name, weight) in [("facial", self.facial), ("vocal", self.vocal)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(StartupError::InvalidConfig(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.facial == 0.0 && self.vocal == 0.0 {
            return Err(StartupError::InvalidConfig(
                "at least one fusion weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Which modality wins a disagreement.
    ///
    /// Equal weights resolve to facial.
    pub fn facial_wins_ties(&self) -> bool {
        self.facial >= self.vocal
    }
}

/// Final decision for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub final_emotion: Emotion,
    pub confidence: f64,
    pub facial_emotion: Emotion,
    pub vocal_emotion: Emotion,
    /// Facial dominant probability, 0–100
    pub facial_confidence: f64,
    /// Vocal score rescaled to 0–100 for display
    pub vocal_confidence: f64,
}

/// Combines two modality results with fixed weights
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionEngine {
    weights: FusionWeights,
}

impl FusionEngine {
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// Fuse a facial and a vocal result. Never fails.
    pub fn fuse(&self, facial: &FacialResult, vocal: &VocalResult) -> FusedResult {
        let facial_emotion = facial.dominant_emotion;
        let vocal_emotion = Emotion::from_vocal_label(&vocal.label);

        let final_emotion = if facial_emotion == vocal_emotion {
            facial_emotion
        } else if self.weights.facial_wins_ties() {
            facial_emotion
        } else {
            vocal_emotion
        };

        let facial_confidence = facial.dominant_probability();
        let confidence = round_to_hundredths(
            facial_confidence * self.weights.facial + vocal.score * self.weights.vocal,
        );

        debug!(
            "Fused facial={} ({:.2}) vocal={} ({:.3}) -> {} ({:.2})",
            facial_emotion, facial_confidence, vocal_emotion, vocal.score, final_emotion, confidence
        );

        FusedResult {
            final_emotion,
            confidence,
            facial_emotion,
            vocal_emotion,
            facial_confidence,
            vocal_confidence: vocal.score * 100.0,
        }
    }
}

/// Round to two decimals, half-to-even on the exact binary value.
///
/// Formatting with a fixed precision rounds the exact decimal expansion of
/// the double, so `2.675` (stored just below) becomes `2.67` rather than the
/// `2.68` that `(x * 100.0).round() / 100.0` gives.
pub fn round_to_hundredths(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.2}", value).parse().unwrap_or(value)
}
