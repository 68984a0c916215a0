//! Run orchestration: extract, analyze, fuse, clean up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{Analysis, AnalysisService, FacialResult, VocalResult};
use crate::config::Config;
use crate::error::{ExtractionError, PipelineError, StartupError};
use crate::fusion::{FusedResult, FusionEngine};
use crate::media::{ExtractedAudio, ExtractedFrame, MediaExtractor, MediaTools, RunWorkspace};

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Extracting,
    Analyzing,
    Fusing,
    CleaningUp,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Analyzing)
                | (Extracting, CleaningUp)
                | (Analyzing, Fusing)
                | (Fusing, CleaningUp)
                | (CleaningUp, Succeeded)
                | (CleaningUp, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Tracks and logs state transitions for one run
struct RunState {
    run_id: Uuid,
    state: PipelineState,
}

impl RunState {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: PipelineState::Idle,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Run {}: {:?} -> {:?}", self.run_id, self.state, next);
        self.state = next;
    }
}

/// Everything known about a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub video: PathBuf,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub facial: Analysis<FacialResult>,
    pub vocal: Analysis<VocalResult>,
    pub fused: FusedResult,
}

/// Caller-facing outcome: either a result or one error message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FusedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineOutcome {
    pub fn succeeded(result: FusedResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<FusedResult, PipelineError>> for PipelineOutcome {
    fn from(result: Result<FusedResult, PipelineError>) -> Self {
        match result {
            Ok(fused) => Self::succeeded(fused),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Drives one video at a time through extraction, analysis and fusion.
///
/// Holds no per-run state, so one instance can serve concurrent runs.
pub struct Orchestrator {
    extractor: MediaExtractor,
    analysis: AnalysisService,
    fusion: FusionEngine,
    temp_root: PathBuf,
}

impl Orchestrator {
    /// Locate the media tools, load both models and validate the config.
    pub fn new(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;

        let tools = MediaTools::locate(
            config.ffmpeg_path.as_deref(),
            config.ffprobe_path.as_deref(),
            config.extraction_timeout(),
        )?;
        let analysis = AnalysisService::load(config)?;

        Self::with_components(
            MediaExtractor::new(tools),
            analysis,
            FusionEngine::new(config.fusion_weights),
            config.temp_root(),
        )
    }

    /// Assemble from already-built parts
    pub fn with_components(
        extractor: MediaExtractor,
        analysis: AnalysisService,
        fusion: FusionEngine,
        temp_root: PathBuf,
    ) -> Result<Self, StartupError> {
        fusion.weights().validate()?;
        std::fs::create_dir_all(&temp_root).map_err(|source| StartupError::TempDir {
            path: temp_root.clone(),
            source,
        })?;

        Ok(Self {
            extractor,
            analysis,
            fusion,
            temp_root,
        })
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Analyze one video
    pub fn run(&self, video: &Path) -> Result<FusedResult, PipelineError> {
        self.run_detailed(video).map(|report| report.fused)
    }

    /// Analyze one video, folding any failure into the outcome
    pub fn run_outcome(&self, video: &Path) -> PipelineOutcome {
        self.run(video).into()
    }

    /// Analyze one video and report per-modality detail.
    ///
    /// Every artifact the run created is gone by the time this returns,
    /// on success and on failure.
    pub fn run_detailed(&self, video: &Path) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut state = RunState::new(run_id);

        info!("Run {}: analyzing {:?}", run_id, video);
        state.enter(PipelineState::Extracting);

        if !video.is_file() {
            return Err(fail(
                &mut state,
                None,
                ExtractionError::InputNotFound(video.to_path_buf()),
            ));
        }

        let mut workspace = match RunWorkspace::create(&self.temp_root, run_id) {
            Ok(workspace) => workspace,
            Err(e) => return Err(fail(&mut state, None, ExtractionError::Workspace(e))),
        };

        let (frame, audio) = match self.extract(video, &workspace) {
            Ok(extracted) => extracted,
            Err(e) => return Err(fail(&mut state, Some(&mut workspace), e)),
        };

        state.enter(PipelineState::Analyzing);
        let (facial, vocal) = self.analysis.analyze(&frame, &audio, &workspace);
        if facial.is_degraded() || vocal.is_degraded() {
            info!(
                "Run {}: degraded modalities (facial: {}, vocal: {})",
                run_id,
                facial.is_degraded(),
                vocal.is_degraded()
            );
        }

        state.enter(PipelineState::Fusing);
        let fused = self.fusion.fuse(facial.result(), vocal.result());

        state.enter(PipelineState::CleaningUp);
        workspace.cleanup();
        state.enter(PipelineState::Succeeded);

        let elapsed_ms = timer.elapsed().as_millis() as u64;
        info!(
            "Run {}: {} ({:.2}) in {}ms",
            run_id, fused.final_emotion, fused.confidence, elapsed_ms
        );

        Ok(RunReport {
            run_id,
            video: video.to_path_buf(),
            started_at,
            elapsed_ms,
            facial,
            vocal,
            fused,
        })
    }

    fn extract(
        &self,
        video: &Path,
        workspace: &RunWorkspace,
    ) -> Result<(ExtractedFrame, ExtractedAudio), ExtractionError> {
        let frame = self.extractor.extract_frame(video, workspace)?;
        let audio = self.extractor.extract_audio(video, workspace)?;
        Ok((frame, audio))
    }

    /// Release the models
    pub fn shutdown(self) {
        self.analysis.shutdown();
    }
}

fn fail(
    state: &mut RunState,
    workspace: Option<&mut RunWorkspace>,
    error: ExtractionError,
) -> PipelineError {
    state.enter(PipelineState::CleaningUp);
    if let Some(workspace) = workspace {
        workspace.cleanup();
    }
    state.enter(PipelineState::Failed);
    warn!("Run {} failed: {}", state.run_id, error);
    error.into()
}
