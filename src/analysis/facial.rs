//! Facial emotion adapter.

use image::imageops::FilterType;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    argmax, softmax, Analysis, FaceExpressionModel, FacialResult, RawFacialPrediction,
};
use crate::emotion::Emotion;
use crate::error::ModelError;
use crate::media::ExtractedFrame;

/// Side length of the square grayscale input the face model expects
pub const FACE_INPUT_SIZE: u32 = 48;

/// Class order of the face model's output
pub const FACE_MODEL_LABELS: [&str; 7] =
    ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];

/// Wraps a [`FaceExpressionModel`] and never fails
#[derive(Clone)]
pub struct FacialAdapter {
    model: Arc<dyn FaceExpressionModel>,
}

impl FacialAdapter {
    pub fn new(model: Arc<dyn FaceExpressionModel>) -> Self {
        Self { model }
    }

    /// Classify the frame.
    ///
    /// Model errors, panics and malformed predictions all degrade to the
    /// neutral fallback (`neutral` at 100%).
    pub fn analyze(&self, frame: &ExtractedFrame) -> Analysis<FacialResult> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.model.predict(&frame.path)));

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return fallback(e.to_string()),
            Err(_) => return fallback("facial model panicked".to_string()),
        };

        match normalize_prediction(raw) {
            Ok(result) => {
                debug!(
                    "Facial: {} ({:.2}%)",
                    result.dominant_emotion,
                    result.dominant_probability()
                );
                Analysis::Analyzed(result)
            }
            Err(e) => fallback(e.to_string()),
        }
    }
}

fn fallback(reason: String) -> Analysis<FacialResult> {
    warn!("Facial analysis failed, using neutral: {}", reason);
    Analysis::degraded(FacialResult::default(), reason)
}

/// Map a raw prediction into the emotion vocabulary.
///
/// The dominant emotion's probability is carried over unchanged. Labels
/// outside the vocabulary are dropped from the distribution unless they are
/// the dominant one, which then counts as neutral.
pub fn normalize_prediction(raw: RawFacialPrediction) -> Result<FacialResult, ModelError> {
    let dominant_value = *raw.emotion.get(&raw.dominant_emotion).ok_or_else(|| {
        ModelError::InvalidOutput(format!(
            "dominant emotion '{}' missing from distribution",
            raw.dominant_emotion
        ))
    })?;

    if let Some((label, value)) = raw.emotion.iter().find(|(_, v)| !v.is_finite()) {
        return Err(ModelError::InvalidOutput(format!(
            "non-finite probability {} for '{}'",
            value, label
        )));
    }

    let dominant_emotion = Emotion::from_facial_label(&raw.dominant_emotion);
    let mut distribution: BTreeMap<Emotion, f64> = raw
        .emotion
        .iter()
        .filter(|(label, _)| **label != raw.dominant_emotion)
        .filter_map(|(label, &value)| Emotion::try_from_facial_label(label).map(|e| (e, value)))
        .collect();
    distribution.insert(dominant_emotion, dominant_value);

    Ok(FacialResult {
        dominant_emotion,
        distribution,
    })
}

/// Load an image as a 48x48 grayscale tensor in [0, 1], row-major
pub fn preprocess_face_image(path: &Path) -> Result<Vec<f32>, ModelError> {
    let image = image::open(path)
        .map_err(|e| ModelError::InvalidInput(format!("Failed to decode frame: {}", e)))?;
    let gray = image.to_luma8();
    let resized = image::imageops::resize(&gray, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle);
    Ok(resized.pixels().map(|p| p.0[0] as f32 / 255.0).collect())
}

/// Turn raw model scores into a percentage distribution over
/// [`FACE_MODEL_LABELS`].
///
/// Scores that already form a probability vector are used as-is, anything
/// else is treated as logits.
pub fn prediction_from_scores(scores: &[f32]) -> Result<RawFacialPrediction, ModelError> {
    if scores.len() != FACE_MODEL_LABELS.len() {
        return Err(ModelError::InvalidOutput(format!(
            "expected {} scores, got {}",
            FACE_MODEL_LABELS.len(),
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ModelError::InvalidOutput("non-finite score".to_string()));
    }

    let sum: f32 = scores.iter().sum();
    let is_probability = scores.iter().all(|&s| (0.0..=1.0).contains(&s)) && (sum - 1.0).abs() < 1e-3;
    let probabilities = if is_probability {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let total: f32 = probabilities.iter().sum();
    if total <= 0.0 {
        return Err(ModelError::InvalidOutput("all-zero probabilities".to_string()));
    }

    let (best, _) = argmax(&probabilities)
        .ok_or_else(|| ModelError::InvalidOutput("empty scores".to_string()))?;

    let emotion = FACE_MODEL_LABELS
        .iter()
        .zip(&probabilities)
        .map(|(label, &p)| (label.to_string(), 100.0 * p as f64 / total as f64))
        .collect();

    Ok(RawFacialPrediction {
        dominant_emotion: FACE_MODEL_LABELS[best].to_string(),
        emotion,
    })
}
