//! ONNX Runtime backed classifiers.
//!
//! The face model takes a `[1, 48, 48, 1]` grayscale tensor and returns seven
//! scores in the order of [`FACE_MODEL_LABELS`](super::facial::FACE_MODEL_LABELS).
//! The voice model takes a `[1, N]` normalized 16kHz waveform and returns one
//! logit per label.

#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::{Path, PathBuf};
#[cfg(any(feature = "onnx", test))]
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{FaceExpressionModel, RawFacialPrediction, VoiceEmotionModel};
use crate::error::{ModelError, StartupError};

#[cfg(feature = "onnx")]
use super::facial::{prediction_from_scores, preprocess_face_image, FACE_INPUT_SIZE};

/// Settings shared by both ONNX models
#[derive(Debug, Clone)]
pub struct OnnxModelConfig {
    pub model_path: PathBuf,
    /// Number of threads for ONNX inference
    pub n_threads: usize,
}

#[cfg(feature = "onnx")]
fn load_session(config: &OnnxModelConfig) -> Result<Session, StartupError> {
    if !config.model_path.exists() {
        return Err(StartupError::ModelNotFound(config.model_path.clone()));
    }

    let session = Session::builder()
        .map_err(|e: ort::Error| StartupError::ModelLoadError(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e: ort::Error| StartupError::ModelLoadError(e.to_string()))?
        .with_intra_threads(config.n_threads)
        .map_err(|e: ort::Error| StartupError::ModelLoadError(e.to_string()))?
        .commit_from_file(&config.model_path)
        .map_err(|e: ort::Error| StartupError::ModelLoadError(e.to_string()))?;

    Ok(session)
}

/// Facial expression classifier on a single ONNX session
#[cfg(feature = "onnx")]
pub struct OnnxFaceModel {
    session: Mutex<Session>,
}

#[cfg(feature = "onnx")]
impl OnnxFaceModel {
    pub fn new(config: &OnnxModelConfig) -> Result<Self, StartupError> {
        let session = load_session(config)?;
        tracing::info!("Face model initialized: {:?}", config.model_path);
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn scores(&self, input: Vec<f32>) -> Result<Vec<f32>, ModelError> {
        let size = FACE_INPUT_SIZE as usize;
        let input_tensor = Value::from_array(([1_usize, size, size, 1], input))
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let mut session = lock_session(&self.session);
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::InvalidOutput("No output from face model".to_string()))?;
        let output_tensor = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| ModelError::InvalidOutput(e.to_string()))?;

        Ok(output_tensor.1.to_vec())
    }
}

#[cfg(feature = "onnx")]
impl FaceExpressionModel for OnnxFaceModel {
    fn predict(&self, image: &Path) -> Result<RawFacialPrediction, ModelError> {
        let input = preprocess_face_image(image)?;
        let scores = self.scores(input)?;
        prediction_from_scores(&scores)
    }
}

/// Audio emotion classifier on a single ONNX session
#[cfg(feature = "onnx")]
pub struct OnnxVoiceModel {
    session: Mutex<Session>,
    labels: Vec<String>,
}

#[cfg(feature = "onnx")]
impl OnnxVoiceModel {
    pub fn new(config: &OnnxModelConfig, labels: Vec<String>) -> Result<Self, StartupError> {
        if labels.is_empty() {
            return Err(StartupError::ModelLoadError(
                "voice model needs at least one label".to_string(),
            ));
        }
        let session = load_session(config)?;
        tracing::info!(
            "Voice model initialized: {:?} ({} labels)",
            config.model_path,
            labels.len()
        );
        Ok(Self {
            session: Mutex::new(session),
            labels,
        })
    }
}

#[cfg(feature = "onnx")]
impl VoiceEmotionModel for OnnxVoiceModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn logits(&self, waveform: &[f32], sample_rate: u32) -> Result<Vec<f32>, ModelError> {
        if sample_rate != crate::audio::TARGET_SAMPLE_RATE {
            return Err(ModelError::InvalidInput(format!(
                "voice model expects {}Hz audio, got {}Hz",
                crate::audio::TARGET_SAMPLE_RATE,
                sample_rate
            )));
        }
        if waveform.is_empty() {
            return Err(ModelError::InvalidInput("empty waveform".to_string()));
        }

        // Input shape [batch, time]
        let input_tensor = Value::from_array(([1_usize, waveform.len()], waveform.to_vec()))
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let mut session = lock_session(&self.session);
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::InvalidOutput("No output from voice model".to_string()))?;
        let output_tensor = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| ModelError::InvalidOutput(e.to_string()))?;

        Ok(output_tensor.1.to_vec())
    }
}

/// Lock a session, recovering it if an earlier inference panicked mid-run.
///
/// Sessions hold no state between calls; a panic in one run must not
/// degrade every run after it.
#[cfg(any(feature = "onnx", test))]
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

// Stub implementations when the feature is not enabled
#[cfg(not(feature = "onnx"))]
pub struct OnnxFaceModel;

#[cfg(not(feature = "onnx"))]
impl OnnxFaceModel {
    pub fn new(_config: &OnnxModelConfig) -> Result<Self, StartupError> {
        Err(StartupError::FeatureNotEnabled("onnx"))
    }
}

#[cfg(not(feature = "onnx"))]
impl FaceExpressionModel for OnnxFaceModel {
    fn predict(&self, _image: &Path) -> Result<RawFacialPrediction, ModelError> {
        Err(ModelError::InferenceError("onnx feature not enabled".to_string()))
    }
}

#[cfg(not(feature = "onnx"))]
pub struct OnnxVoiceModel;

#[cfg(not(feature = "onnx"))]
impl OnnxVoiceModel {
    pub fn new(_config: &OnnxModelConfig, _labels: Vec<String>) -> Result<Self, StartupError> {
        Err(StartupError::FeatureNotEnabled("onnx"))
    }
}

#[cfg(not(feature = "onnx"))]
impl VoiceEmotionModel for OnnxVoiceModel {
    fn labels(&self) -> &[String] {
        &[]
    }

    fn logits(&self, _waveform: &[f32], _sample_rate: u32) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::InferenceError("onnx feature not enabled".to_string()))
    }
}
