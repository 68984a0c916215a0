use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StartupError;
use crate::fusion::FusionWeights;

/// Default face model filename inside the models directory
pub const FACE_MODEL_FILENAME: &str = "face_emotion.onnx";
/// Default voice model filename inside the models directory
pub const VOICE_MODEL_FILENAME: &str = "voice_emotion.onnx";
/// Default voice label file inside the models directory
pub const VOICE_LABELS_FILENAME: &str = "voice_labels.json";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // External tools (looked up on PATH when unset)
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,

    // Model paths (default to the models directory when unset)
    pub face_model_path: Option<PathBuf>,
    pub voice_model_path: Option<PathBuf>,
    pub voice_labels_path: Option<PathBuf>,

    /// Root for per-run workspaces (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    pub fusion_weights: FusionWeights,

    /// Threads for ONNX inference
    pub n_threads: usize,

    /// Upper bound for a single ffmpeg/ffprobe invocation
    pub extraction_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            ffmpeg_path: None,
            ffprobe_path: None,
            face_model_path: None,
            voice_model_path: None,
            voice_labels_path: None,
            temp_dir: None,
            fusion_weights: FusionWeights::default(),
            n_threads: 1,
            extraction_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".video-emotion"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Get the default models directory
    pub fn default_models_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("models"))
    }

    pub fn get_face_model_path(&self) -> Result<PathBuf> {
        self.model_path_or_default(&self.face_model_path, FACE_MODEL_FILENAME)
    }

    pub fn get_voice_model_path(&self) -> Result<PathBuf> {
        self.model_path_or_default(&self.voice_model_path, VOICE_MODEL_FILENAME)
    }

    pub fn get_voice_labels_path(&self) -> Result<PathBuf> {
        self.model_path_or_default(&self.voice_labels_path, VOICE_LABELS_FILENAME)
    }

    fn model_path_or_default(&self, path: &Option<PathBuf>, filename: &str) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::default_models_dir()?.join(filename)),
        }
    }

    /// Root directory under which each run creates its own workspace
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout_secs.map(Duration::from_secs)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), StartupError> {
        self.fusion_weights.validate()?;
        if self.n_threads == 0 {
            return Err(StartupError::InvalidConfig(
                "n_threads must be at least 1".to_string(),
            ));
        }
        if self.extraction_timeout_secs == Some(0) {
            return Err(StartupError::InvalidConfig(
                "extraction_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
