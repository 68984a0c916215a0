//! Facial and vocal emotion analysis.
//!
//! The classifiers themselves sit behind [`FaceExpressionModel`] and
//! [`VoiceEmotionModel`]. The adapters in [`facial`] and [`vocal`] wrap a
//! model and guarantee a result: any model failure is logged and replaced
//! by a neutral fallback marked as degraded.

pub mod facial;
pub mod onnx;
pub mod service;
pub mod vocal;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::emotion::{Emotion, VOCAL_LABEL_PREFIX};
use crate::error::ModelError;

pub use facial::FacialAdapter;
pub use service::AnalysisService;
pub use vocal::VocalAdapter;

/// Facial analysis of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacialResult {
    pub dominant_emotion: Emotion,
    /// Per-emotion probability, 0–100
    pub distribution: BTreeMap<Emotion, f64>,
}

impl FacialResult {
    /// Probability of the dominant emotion, 0 if the distribution lacks it
    pub fn dominant_probability(&self) -> f64 {
        self.distribution
            .get(&self.dominant_emotion)
            .copied()
            .unwrap_or(0.0)
    }
}

impl Default for FacialResult {
    fn default() -> Self {
        Self {
            dominant_emotion: Emotion::Neutral,
            distribution: BTreeMap::from([(Emotion::Neutral, 100.0)]),
        }
    }
}

/// Vocal analysis of one audio track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocalResult {
    /// Raw top label from the voice model, e.g. `emotion_sad`
    pub label: String,
    /// Softmax probability of `label`, 0–1
    pub score: f64,
}

impl VocalResult {
    pub fn emotion(&self) -> Emotion {
        Emotion::from_vocal_label(&self.label)
    }
}

impl Default for VocalResult {
    fn default() -> Self {
        Self {
            label: format!("{}{}", VOCAL_LABEL_PREFIX, Emotion::Neutral),
            score: 1.0,
        }
    }
}

/// Either modality's result, for code that treats them uniformly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum ModalityResult {
    Facial(FacialResult),
    Vocal(VocalResult),
}

impl ModalityResult {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Facial(_) => "facial",
            Self::Vocal(_) => "vocal",
        }
    }

    pub fn emotion(&self) -> Emotion {
        match self {
            Self::Facial(result) => result.dominant_emotion,
            Self::Vocal(result) => result.emotion(),
        }
    }

    /// Confidence on a 0–100 scale
    pub fn confidence_percent(&self) -> f64 {
        match self {
            Self::Facial(result) => result.dominant_probability(),
            Self::Vocal(result) => result.score * 100.0,
        }
    }
}

impl From<FacialResult> for ModalityResult {
    fn from(result: FacialResult) -> Self {
        Self::Facial(result)
    }
}

impl From<VocalResult> for ModalityResult {
    fn from(result: VocalResult) -> Self {
        Self::Vocal(result)
    }
}

/// A modality result, plus whether it came from the model or the fallback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Analysis<T> {
    Analyzed(T),
    Degraded { result: T, reason: String },
}

impl<T> Analysis<T> {
    pub fn degraded(result: T, reason: impl Into<String>) -> Self {
        Self::Degraded {
            result,
            reason: reason.into(),
        }
    }

    pub fn result(&self) -> &T {
        match self {
            Self::Analyzed(result) | Self::Degraded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> T {
        match self {
            Self::Analyzed(result) | Self::Degraded { result, .. } => result,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Self::Analyzed(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

/// What a facial-expression model returns for one image: the raw dominant
/// label and a label -> percentage map, in the classifier's own vocabulary
/// (`angry`, `disgust`, `fear`, `happy`, `sad`, `surprise`, `neutral`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFacialPrediction {
    pub dominant_emotion: String,
    pub emotion: BTreeMap<String, f64>,
}

/// A facial-expression classifier.
///
/// Implementations must accept images with no detectable face and still
/// answer (classifying the whole frame).
pub trait FaceExpressionModel: Send + Sync {
    fn predict(&self, image: &Path) -> Result<RawFacialPrediction, ModelError>;
}

/// An audio emotion classifier over 16kHz mono samples
pub trait VoiceEmotionModel: Send + Sync {
    /// Class labels, indexed like the logits
    fn labels(&self) -> &[String];

    /// Raw logits for a normalized waveform
    fn logits(&self, waveform: &[f32], sample_rate: u32) -> Result<Vec<f32>, ModelError>;
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest element; first one wins ties
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
