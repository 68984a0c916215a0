//! End-to-end runs against scripted stand-ins for ffmpeg/ffprobe and mock
//! classifiers.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::analysis::{AnalysisService, FaceExpressionModel, RawFacialPrediction, VoiceEmotionModel};
use crate::audio::write_wav;
use crate::emotion::Emotion;
use crate::error::{ExtractionError, ModelError, PipelineError};
use crate::fusion::{round_to_hundredths, FusionEngine, FusionWeights};
use crate::media::{MediaExtractor, MediaTools};
use crate::pipeline::Orchestrator;

const FRAME_COUNT: u64 = 10;

/// How the scripted ffmpeg behaves when asked for the audio track
#[derive(Clone, Copy)]
enum AudioBehavior {
    Copy,
    Fail,
    ProduceNothing,
    Hang,
}

/// What the scripted ffmpeg writes when asked for the frame
#[derive(Clone, Copy)]
enum FrameBehavior {
    Copy,
    Garbage,
}

struct Fixture {
    dir: TempDir,
    video: PathBuf,
    temp_root: PathBuf,
    log: PathBuf,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Fixture {
    fn new(audio_samples: &[f32], audio: AudioBehavior, frames: u64) -> Self {
        Self::build(audio_samples, audio, FrameBehavior::Copy, frames)
    }

    fn build(audio_samples: &[f32], audio: AudioBehavior, frame: FrameBehavior, frames: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let video = root.join("clip.mp4");
        fs::write(&video, b"not really a video").unwrap();

        let png = root.join("fixture.png");
        image::RgbImage::from_pixel(16, 12, image::Rgb([120, 80, 40]))
            .save(&png)
            .unwrap();

        let wav = root.join("fixture.wav");
        write_wav(&wav, audio_samples, 16000).unwrap();

        let log = root.join("calls.log");
        let audio_branch = match audio {
            AudioBehavior::Copy => format!("cp \"{}\" \"$last\"", wav.display()),
            AudioBehavior::Fail => {
                "echo \"Output file #0 does not contain any stream\" >&2; exit 1".to_string()
            }
            AudioBehavior::ProduceNothing => "exit 0".to_string(),
            AudioBehavior::Hang => "exec sleep 10".to_string(),
        };

        let frame_branch = match frame {
            FrameBehavior::Copy => format!("cp \"{}\" \"$last\"", png.display()),
            FrameBehavior::Garbage => "echo junk > \"$last\"".to_string(),
        };

        let ffmpeg = root.join("ffmpeg");
        write_script(
            &ffmpeg,
            &format!(
                "printf '%s\\n' \"$*\" >> \"{log}\"\n\
                 for last; do :; done\n\
                 case \"$last\" in\n\
                 *.wav) {audio_branch} ;;\n\
                 *) {frame_branch} ;;\n\
                 esac\n",
                log = log.display(),
            ),
        );

        let ffprobe = root.join("ffprobe");
        write_script(
            &ffprobe,
            &format!(
                "echo '{{\"streams\":[{{\"nb_read_packets\":\"{frames}\",\"nb_frames\":\"{frames}\"}}]}}'\n"
            ),
        );

        Self {
            temp_root: root.join("runs"),
            dir,
            video,
            log,
            ffmpeg,
            ffprobe,
        }
    }

    fn standard() -> Self {
        Self::new(&tone(16000), AudioBehavior::Copy, FRAME_COUNT)
    }

    fn orchestrator(&self, service: AnalysisService) -> Orchestrator {
        self.orchestrator_with(service, FusionWeights::default(), None)
    }

    fn orchestrator_with(
        &self,
        service: AnalysisService,
        weights: FusionWeights,
        timeout: Option<Duration>,
    ) -> Orchestrator {
        let tools = MediaTools::new(self.ffmpeg.clone(), self.ffprobe.clone(), timeout);
        Orchestrator::with_components(
            MediaExtractor::new(tools),
            service,
            FusionEngine::new(weights),
            self.temp_root.clone(),
        )
        .unwrap()
    }

    fn leftover_entries(&self) -> usize {
        fs::read_dir(&self.temp_root).map(|d| d.count()).unwrap_or(0)
    }

    fn calls(&self) -> String {
        fs::read_to_string(&self.log).unwrap_or_default()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * 180.0 * i as f32 / 16000.0).sin() * 0.4)
        .collect()
}

struct FixedFace {
    dominant: &'static str,
    probability: f64,
}

impl FaceExpressionModel for FixedFace {
    fn predict(&self, image: &Path) -> Result<RawFacialPrediction, ModelError> {
        // The frame handed over must be a real decodable image
        image::image_dimensions(image).map_err(|e| ModelError::InvalidInput(e.to_string()))?;
        let mut emotion = BTreeMap::from([(self.dominant.to_string(), self.probability)]);
        if self.dominant != "neutral" {
            emotion.insert("neutral".to_string(), 100.0 - self.probability);
        }
        Ok(RawFacialPrediction {
            dominant_emotion: self.dominant.to_string(),
            emotion,
        })
    }
}

struct BrokenFace;

impl FaceExpressionModel for BrokenFace {
    fn predict(&self, _image: &Path) -> Result<RawFacialPrediction, ModelError> {
        Err(ModelError::InferenceError("no backend".to_string()))
    }
}

/// Always puts `probability` on `label`, spreading the rest evenly
struct FixedVoice {
    labels: Vec<String>,
    winner: usize,
    probability: f64,
}

impl FixedVoice {
    fn new(label: &str, probability: f64) -> Self {
        let mut labels: Vec<String> = ["emotion_angry", "emotion_happy", "emotion_neutral", "emotion_sad"]
            .iter()
            .map(|l| l.to_string())
            .collect();
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
        let winner = labels.iter().position(|l| l == label).unwrap();
        Self {
            labels,
            winner,
            probability,
        }
    }
}

impl VoiceEmotionModel for FixedVoice {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn logits(&self, waveform: &[f32], _sample_rate: u32) -> Result<Vec<f32>, ModelError> {
        if waveform.iter().all(|s| *s == 0.0) {
            return Err(ModelError::InvalidInput("silent waveform".to_string()));
        }
        // Logits whose softmax gives `probability` to the winner
        let others = (self.labels.len() - 1) as f64;
        let rest = (1.0 - self.probability) / others;
        Ok((0..self.labels.len())
            .map(|i| {
                if i == self.winner {
                    self.probability.ln() as f32
                } else {
                    rest.ln() as f32
                }
            })
            .collect())
    }
}

fn service(face: impl FaceExpressionModel + 'static, voice: FixedVoice) -> AnalysisService {
    AnalysisService::new(Arc::new(face), Arc::new(voice))
}

fn happy_sad() -> AnalysisService {
    service(
        FixedFace {
            dominant: "happy",
            probability: 80.0,
        },
        FixedVoice::new("emotion_sad", 0.75),
    )
}

#[test]
fn test_worked_example_end_to_end() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(happy_sad());

    let result = orchestrator.run(&fixture.video).unwrap();
    assert_eq!(result.final_emotion, Emotion::Happy);
    assert_eq!(result.facial_emotion, Emotion::Happy);
    assert_eq!(result.vocal_emotion, Emotion::Sad);
    assert_eq!(result.facial_confidence, 80.0);
    assert!((result.vocal_confidence - 75.0).abs() < 1e-3);
    assert!((result.confidence - 48.3).abs() < 1e-9);
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_middle_frame_and_audio_format_requested() {
    let fixture = Fixture::standard();
    fixture.orchestrator(happy_sad()).run(&fixture.video).unwrap();

    let calls = fixture.calls();
    assert!(calls.contains("select=eq(n\\,5)"), "calls: {}", calls);
    assert!(calls.contains("-vn -acodec pcm_s16le -ar 16000 -ac 1"), "calls: {}", calls);
}

#[test]
fn test_agreement_returns_shared_label() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(service(
        FixedFace {
            dominant: "sad",
            probability: 64.0,
        },
        FixedVoice::new("emotion_sad", 0.9),
    ));

    let result = orchestrator.run(&fixture.video).unwrap();
    assert_eq!(result.final_emotion, Emotion::Sad);
    let expected = round_to_hundredths(0.6 * 64.0 + 0.4 * 0.9);
    assert!((result.confidence - expected).abs() < 1e-9);
}

#[test]
fn test_vocal_weight_decides_disagreement() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator_with(
        happy_sad(),
        FusionWeights {
            facial: 0.3,
            vocal: 0.7,
        },
        None,
    );

    let result = orchestrator.run(&fixture.video).unwrap();
    assert_eq!(result.final_emotion, Emotion::Sad);
}

#[test]
fn test_repeated_runs_are_identical() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(happy_sad());

    let first = orchestrator.run(&fixture.video).unwrap();
    let second = orchestrator.run(&fixture.video).unwrap();
    assert_eq!(first, second);
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_missing_input_fails_without_artifacts() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(happy_sad());
    let missing = fixture.dir.path().join("nope.mp4");

    let outcome = orchestrator.run_outcome(&missing);
    assert!(!outcome.success);
    assert!(outcome.result.is_none());
    assert!(outcome.error.unwrap().contains("nope.mp4"));
    assert_eq!(fixture.leftover_entries(), 0);
    assert!(fixture.calls().is_empty());
}

#[test]
fn test_audio_failure_reports_tool_stderr_and_cleans_frame() {
    let fixture = Fixture::new(&tone(16000), AudioBehavior::Fail, FRAME_COUNT);
    let orchestrator = fixture.orchestrator(happy_sad());

    let err = orchestrator.run(&fixture.video).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractionError::ToolFailed { .. })
    ));
    assert_eq!(
        err.to_string(),
        "ffmpeg error: Output file #0 does not contain any stream"
    );
    // The frame had already been written
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_missing_audio_output_fails() {
    let fixture = Fixture::new(&tone(16000), AudioBehavior::ProduceNothing, FRAME_COUNT);
    let err = fixture.orchestrator(happy_sad()).run(&fixture.video).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractionError::MissingOutput { .. })
    ));
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_zero_frames_fails() {
    let fixture = Fixture::new(&tone(16000), AudioBehavior::Copy, 0);
    let err = fixture.orchestrator(happy_sad()).run(&fixture.video).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractionError::NoFrames(_))
    ));
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_undecodable_frame_fails() {
    let fixture = Fixture::build(&tone(16000), AudioBehavior::Copy, FrameBehavior::Garbage, FRAME_COUNT);
    let err = fixture.orchestrator(happy_sad()).run(&fixture.video).unwrap_err();
    assert!(err.to_string().starts_with("Failed to read middle frame 5"));
    match err {
        PipelineError::Extraction(ExtractionError::FrameDecode { index, .. }) => {
            assert_eq!(index, FRAME_COUNT / 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fixture.leftover_entries(), 0);
    // Audio is never requested once the frame fails
    assert!(!fixture.calls().contains("pcm_s16le"));
}

#[test]
fn test_hung_extraction_times_out() {
    let fixture = Fixture::new(&tone(16000), AudioBehavior::Hang, FRAME_COUNT);
    let orchestrator = fixture.orchestrator_with(
        happy_sad(),
        FusionWeights::default(),
        Some(Duration::from_millis(500)),
    );

    let err = orchestrator.run(&fixture.video).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractionError::TimedOut { .. })
    ));
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_silent_audio_degrades_to_neutral() {
    let fixture = Fixture::new(&vec![0.0; 16000], AudioBehavior::Copy, FRAME_COUNT);
    let orchestrator = fixture.orchestrator(happy_sad());

    let report = orchestrator.run_detailed(&fixture.video).unwrap();
    assert!(report.vocal.is_degraded());
    assert!(!report.facial.is_degraded());
    assert_eq!(report.vocal.result().label, "emotion_neutral");
    assert_eq!(report.fused.vocal_emotion, Emotion::Neutral);
    assert_eq!(report.fused.final_emotion, Emotion::Happy);
    assert_eq!(report.fused.confidence, 48.4);
    assert_eq!(fixture.leftover_entries(), 0);
}

#[test]
fn test_empty_audio_track_still_succeeds() {
    let fixture = Fixture::new(&[], AudioBehavior::Copy, FRAME_COUNT);
    let report = fixture
        .orchestrator(happy_sad())
        .run_detailed(&fixture.video)
        .unwrap();
    assert!(report.vocal.is_degraded());
    assert_eq!(report.fused.vocal_confidence, 100.0);
}

#[test]
fn test_both_modalities_degraded() {
    let fixture = Fixture::new(&vec![0.0; 800], AudioBehavior::Copy, FRAME_COUNT);
    let orchestrator = fixture.orchestrator(service(BrokenFace, FixedVoice::new("emotion_sad", 0.75)));

    let report = orchestrator.run_detailed(&fixture.video).unwrap();
    assert!(report.facial.is_degraded() && report.vocal.is_degraded());
    assert_eq!(report.fused.final_emotion, Emotion::Neutral);
    // 100 * 0.6 + 1.0 * 0.4
    assert_eq!(report.fused.confidence, 60.4);
}

#[test]
fn test_report_and_outcome_agree() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(happy_sad());

    let report = orchestrator.run_detailed(&fixture.video).unwrap();
    assert_eq!(report.video, fixture.video);
    assert!(report.started_at <= chrono::Utc::now());

    let outcome = orchestrator.run_outcome(&fixture.video);
    assert!(outcome.success);
    assert_eq!(outcome.result.as_ref(), Some(&report.fused));
}

#[test]
fn test_report_serializes_run_detail() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(service(BrokenFace, FixedVoice::new("emotion_sad", 0.75)));

    let report = orchestrator.run_detailed(&fixture.video).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["run_id"], report.run_id.to_string());
    assert!(json["started_at"].is_string());
    assert_eq!(json["facial"]["status"], "degraded");
    assert_eq!(json["facial"]["result"]["dominant_emotion"], "neutral");
    assert_eq!(json["vocal"]["status"], "analyzed");
    assert_eq!(json["vocal"]["label"], "emotion_sad");
    assert_eq!(json["fused"]["final_emotion"], "neutral");
}

#[test]
fn test_concurrent_runs_do_not_collide() {
    let fixture = Fixture::standard();
    let orchestrator = fixture.orchestrator(happy_sad());

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| orchestrator.run(&fixture.video)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(fixture.leftover_entries(), 0);
}
