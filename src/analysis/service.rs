//! Process-wide owner of both classifiers.
//!
//! Loads the models once at startup and runs the facial and vocal adapters
//! side by side for each run.

use std::sync::Arc;
use tracing::info;

use super::onnx::{OnnxFaceModel, OnnxModelConfig, OnnxVoiceModel};
use super::vocal::load_voice_labels;
use super::{
    Analysis, FaceExpressionModel, FacialAdapter, FacialResult, VocalAdapter, VocalResult,
    VoiceEmotionModel,
};
use crate::config::Config;
use crate::error::StartupError;
use crate::media::{ExtractedAudio, ExtractedFrame, RunWorkspace};

/// Owns both classifiers for the lifetime of the process.
///
/// Models are loaded once and shared read-only by every run.
#[derive(Clone)]
pub struct AnalysisService {
    facial: FacialAdapter,
    vocal: VocalAdapter,
}

impl AnalysisService {
    pub fn new(face: Arc<dyn FaceExpressionModel>, voice: Arc<dyn VoiceEmotionModel>) -> Self {
        Self {
            facial: FacialAdapter::new(face),
            vocal: VocalAdapter::new(voice),
        }
    }

    /// Load the ONNX models named by `config`
    pub fn load(config: &Config) -> Result<Self, StartupError> {
        let model_path = |path: anyhow::Result<std::path::PathBuf>| {
            path.map_err(|e| StartupError::InvalidConfig(format!("{:#}", e)))
        };

        let face_config = OnnxModelConfig {
            model_path: model_path(config.get_face_model_path())?,
            n_threads: config.n_threads,
        };
        let voice_config = OnnxModelConfig {
            model_path: model_path(config.get_voice_model_path())?,
            n_threads: config.n_threads,
        };
        let labels = load_voice_labels(&model_path(config.get_voice_labels_path())?)?;

        let face = OnnxFaceModel::new(&face_config)?;
        let voice = OnnxVoiceModel::new(&voice_config, labels)?;

        info!("Classifiers loaded");
        Ok(Self::new(Arc::new(face), Arc::new(voice)))
    }

    /// Run both adapters, the facial one on a scoped thread.
    pub fn analyze(
        &self,
        frame: &ExtractedFrame,
        audio: &ExtractedAudio,
        workspace: &RunWorkspace,
    ) -> (Analysis<FacialResult>, Analysis<VocalResult>) {
        std::thread::scope(|scope| {
            let facial = scope.spawn(|| self.facial.analyze(frame));
            let vocal = self.vocal.analyze(audio, workspace);
            let facial = facial.join().unwrap_or_else(|_| {
                Analysis::degraded(FacialResult::default(), "facial analysis thread panicked")
            });
            (facial, vocal)
        })
    }

    /// Release both models
    pub fn shutdown(self) {
        info!("Releasing classifiers");
        drop(self);
    }
}
