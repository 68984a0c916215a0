//! Multimodal emotion recognition for short videos.
//!
//! One frame from the middle of the video goes to a facial-expression model,
//! the audio track goes to a vocal-emotion model, and the two answers are
//! fused with fixed weights into a single emotion and confidence.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod emotion;
pub mod error;
pub mod fusion;
pub mod media;
pub mod pipeline;

#[cfg(all(test, unix))]
mod pipeline_tests;

pub use analysis::{
    Analysis, AnalysisService, FaceExpressionModel, FacialResult, ModalityResult,
    RawFacialPrediction, VocalResult, VoiceEmotionModel,
};
pub use config::Config;
pub use emotion::Emotion;
pub use error::{ExtractionError, ModelError, PipelineError, StartupError};
pub use fusion::{FusedResult, FusionEngine, FusionWeights};
pub use media::{ExtractedAudio, ExtractedFrame, MediaExtractor, MediaTools, RunWorkspace};
pub use pipeline::{Orchestrator, PipelineOutcome, PipelineState, RunReport};
