//! Vocal emotion adapter.

use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{argmax, softmax, Analysis, VocalResult, VoiceEmotionModel};
use crate::audio::{load_mono_16k, read_wav, write_wav, TARGET_SAMPLE_RATE};
use crate::error::{ModelError, StartupError};
use crate::media::{ExtractedAudio, RunWorkspace};

const RESAMPLED_ARTIFACT: &str = "resampled.wav";

/// Wraps a [`VoiceEmotionModel`] and never fails
#[derive(Clone)]
pub struct VocalAdapter {
    model: Arc<dyn VoiceEmotionModel>,
}

impl VocalAdapter {
    pub fn new(model: Arc<dyn VoiceEmotionModel>) -> Self {
        Self { model }
    }

    /// Classify the audio track.
    ///
    /// The clip is resampled to 16kHz mono, written to `resampled.wav` in the
    /// run workspace and read back for feature extraction. That file is
    /// removed before returning whatever happens. Any failure degrades to
    /// `emotion_neutral` with score 1.0.
    pub fn analyze(&self, audio: &ExtractedAudio, workspace: &RunWorkspace) -> Analysis<VocalResult> {
        let resampled = workspace.artifact_path(RESAMPLED_ARTIFACT);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.classify(&audio.path, &resampled)
        }));
        workspace.remove_artifact(&resampled);

        match outcome {
            Ok(Ok(result)) => {
                debug!("Vocal: {} ({:.3})", result.label, result.score);
                Analysis::Analyzed(result)
            }
            Ok(Err(e)) => fallback(e.to_string()),
            Err(_) => fallback("vocal model panicked".to_string()),
        }
    }

    fn classify(&self, audio: &Path, resampled: &Path) -> Result<VocalResult, ModelError> {
        let samples = load_mono_16k(audio).map_err(|e| ModelError::Audio(format!("{:#}", e)))?;
        if samples.is_empty() {
            return Err(ModelError::InvalidInput("audio track is empty".to_string()));
        }

        write_wav(resampled, &samples, TARGET_SAMPLE_RATE)
            .map_err(|e| ModelError::Audio(format!("{:#}", e)))?;
        let waveform = read_wav(resampled).map_err(|e| ModelError::Audio(format!("{:#}", e)))?;
        debug!(
            "Classifying {} ms of audio",
            waveform.duration_ms()
        );

        let features = normalize_waveform(&waveform.samples);
        let logits = self.model.logits(&features, waveform.sample_rate)?;

        let labels = self.model.labels();
        if logits.len() != labels.len() {
            return Err(ModelError::InvalidOutput(format!(
                "{} logits for {} labels",
                logits.len(),
                labels.len()
            )));
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(ModelError::InvalidOutput("non-finite logits".to_string()));
        }

        let probabilities = softmax(&logits);
        let (index, score) = argmax(&probabilities)
            .ok_or_else(|| ModelError::InvalidOutput("model returned no logits".to_string()))?;

        Ok(VocalResult {
            label: labels[index].clone(),
            score: score as f64,
        })
    }
}

fn fallback(reason: String) -> Analysis<VocalResult> {
    warn!("Vocal analysis failed, using neutral: {}", reason);
    Analysis::degraded(VocalResult::default(), reason)
}

/// Zero-mean, unit-variance normalization applied before the voice model
pub fn normalize_waveform(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let scale = (variance + 1e-7).sqrt();
    samples.iter().map(|s| (s - mean) / scale).collect()
}

/// Load voice model class labels.
///
/// Accepts either a JSON array of labels or a model config object with an
/// `id2label` map keyed by class index.
pub fn load_voice_labels(path: &Path) -> Result<Vec<String>, StartupError> {
    if !path.exists() {
        return Err(StartupError::ModelNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| StartupError::ModelLoadError(format!("Failed to read {:?}: {}", path, e)))?;
    let json: Value = serde_json::from_str(&content)
        .map_err(|e| StartupError::ModelLoadError(format!("Failed to parse {:?}: {}", path, e)))?;

    let labels = parse_labels(&json).map_err(StartupError::ModelLoadError)?;
    debug!("Loaded {} voice labels from {:?}", labels.len(), path);
    Ok(labels)
}

fn parse_labels(json: &Value) -> Result<Vec<String>, String> {
    let labels = match json {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("label is not a string: {}", item))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Value::Object(map) => {
            let id2label = map
                .get("id2label")
                .and_then(Value::as_object)
                .ok_or_else(|| "missing id2label".to_string())?;

            let mut indexed = id2label
                .iter()
                .map(|(id, label)| {
                    let id = id
                        .parse::<usize>()
                        .map_err(|_| format!("label index is not a number: {}", id))?;
                    let label = label
                        .as_str()
                        .ok_or_else(|| format!("label {} is not a string", id))?;
                    Ok((id, label.to_string()))
                })
                .collect::<Result<Vec<_>, String>>()?;
            indexed.sort_by_key(|(id, _)| *id);

            if indexed.iter().enumerate().any(|(i, (id, _))| i != *id) {
                return Err("id2label indices are not contiguous from 0".to_string());
            }
            indexed.into_iter().map(|(_, label)| label).collect()
        }
        _ => return Err("expected an array or an object with id2label".to_string()),
    };

    if labels.is_empty() {
        return Err("no labels".to_string());
    }
    Ok(labels)
}
