//! Error taxonomy for the emotion pipeline.
//!
//! Only [`StartupError`] and [`ExtractionError`] ever reach a caller.
//! [`ModelError`] stays inside the modality adapters, which turn it into a
//! degraded neutral result.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal conditions detected before any run starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Required tool '{0}' not found in PATH")]
    ToolNotFound(String),

    #[error("Model file not found: {0:?}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to prepare temp directory {path:?}: {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(&'static str),
}

/// Failures while pulling the frame or audio out of a video
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Video file not found: {0:?}")]
    InputNotFound(PathBuf),

    #[error("Failed to create run workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect {tool} output: {source}")]
    ToolOutput {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} error: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },

    #[error("{tool} ran but did not produce {path:?}")]
    MissingOutput { tool: String, path: PathBuf },

    #[error("Failed to probe video: {0}")]
    Probe(String),

    #[error("Video reports zero frames: {0:?}")]
    NoFrames(PathBuf),

    #[error("Failed to read middle frame {index}: {reason}")]
    FrameDecode { index: u64, reason: String },
}

/// Internal classifier failures; never surfaced past an adapter
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Audio error: {0}")]
    Audio(String),
}

/// The only error a run can end with
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
