use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use video_emotion::{Config, ModalityResult, Orchestrator, PipelineError, PipelineOutcome, RunReport};

/// Detect the dominant emotion in short videos from face and voice
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video files to analyze
    #[arg(required = true)]
    videos: Vec<PathBuf>,

    /// Config file (defaults to ~/.video-emotion/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the face expression ONNX model
    #[arg(long)]
    face_model: Option<PathBuf>,

    /// Path to the voice emotion ONNX model
    #[arg(long)]
    voice_model: Option<PathBuf>,

    /// Path to the voice model labels (JSON array or config with id2label)
    #[arg(long)]
    voice_labels: Option<PathBuf>,

    /// ffmpeg executable (looked up on PATH by default)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// ffprobe executable (looked up on PATH by default)
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Directory for per-run scratch files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Number of threads for ONNX inference
    #[arg(long)]
    threads: Option<usize>,

    /// Kill ffmpeg/ffprobe after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Videos processed at the same time
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Print one JSON object per video (outcome plus full run report)
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One line of `--json` output
#[derive(Serialize)]
struct VideoOutcome<'a> {
    video: &'a Path,
    #[serde(flatten)]
    outcome: PipelineOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    degraded: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<RunReport>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(&args)?;
    info!("Video emotion CLI starting...");
    info!("Fusion weights: {:?}", config.fusion_weights);

    let orchestrator = Arc::new(Orchestrator::new(&config).context("Startup failed")?);
    info!("Models loaded successfully");

    // Stop picking up new videos on Ctrl+C; runs in flight finish and clean up
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_ctrlc = stop_flag.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Received Ctrl+C, finishing runs in progress...");
        stop_flag_ctrlc.store(true, Ordering::SeqCst);
    });

    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut handles = Vec::with_capacity(args.videos.len());
    let mut skipped = Vec::new();

    for video in args.videos.iter().cloned() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Job limiter closed")?;

        if stop_flag.load(Ordering::SeqCst) {
            skipped.push(video);
            continue;
        }

        let orchestrator = orchestrator.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = orchestrator.run_detailed(&video);
            (video, result)
        }));
    }

    let mut failures = 0;
    for handle in handles {
        let (video, result) = handle.await.context("Run task panicked")?;
        if result.is_err() {
            failures += 1;
        }
        print_result(&video, result, args.json)?;
    }

    for video in &skipped {
        failures += 1;
        print_outcome(video, PipelineOutcome::failed("interrupted before start"), args.json)?;
    }

    if let Ok(orchestrator) = Arc::try_unwrap(orchestrator) {
        orchestrator.shutdown();
    }

    if failures > 0 {
        error!("{} of {} videos failed", failures, args.videos.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&path)?;

    if args.face_model.is_some() {
        config.face_model_path = args.face_model.clone();
    }
    if args.voice_model.is_some() {
        config.voice_model_path = args.voice_model.clone();
    }
    if args.voice_labels.is_some() {
        config.voice_labels_path = args.voice_labels.clone();
    }
    if args.ffmpeg.is_some() {
        config.ffmpeg_path = args.ffmpeg.clone();
    }
    if args.ffprobe.is_some() {
        config.ffprobe_path = args.ffprobe.clone();
    }
    if args.temp_dir.is_some() {
        config.temp_dir = args.temp_dir.clone();
    }
    if let Some(threads) = args.threads {
        config.n_threads = threads;
    }
    if args.timeout_secs.is_some() {
        config.extraction_timeout_secs = args.timeout_secs;
    }

    Ok(config)
}

fn print_result(
    video: &Path,
    result: Result<RunReport, PipelineError>,
    json: bool,
) -> Result<()> {
    match result {
        Ok(report) => {
            let degraded = degraded_modalities(&report);
            if json {
                let degraded = (!degraded.is_empty()).then_some(degraded);
                let outcome = PipelineOutcome::succeeded(report.fused.clone());
                print_json(video, outcome, degraded, Some(report))
            } else {
                print_report(&report);
                Ok(())
            }
        }
        Err(e) => print_outcome(video, PipelineOutcome::failed(e.to_string()), json),
    }
}

fn print_outcome(video: &Path, outcome: PipelineOutcome, json: bool) -> Result<()> {
    if json {
        print_json(video, outcome, None, None)
    } else {
        if let Some(message) = outcome.error {
            println!("{}: failed: {}", video.display(), message);
        }
        Ok(())
    }
}

fn print_json(
    video: &Path,
    outcome: PipelineOutcome,
    degraded: Option<Vec<&'static str>>,
    report: Option<RunReport>,
) -> Result<()> {
    let line = serde_json::to_string(&VideoOutcome {
        video,
        outcome,
        degraded,
        report,
    })
    .context("Failed to serialize outcome")?;
    println!("{}", line);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{}: {} (confidence {:.2})",
        report.video.display(),
        report.fused.final_emotion,
        report.fused.confidence
    );

    let modalities = [
        (
            ModalityResult::from(report.facial.result().clone()),
            report.facial.degraded_reason(),
        ),
        (
            ModalityResult::from(report.vocal.result().clone()),
            report.vocal.degraded_reason(),
        ),
    ];
    for (modality, degraded) in modalities {
        let note = degraded
            .map(|reason| format!(" [fallback: {}]", reason))
            .unwrap_or_default();
        println!(
            "  {:<6} {} {:.2}%{}",
            modality.name(),
            modality.emotion(),
            modality.confidence_percent(),
            note
        );
    }
}

fn degraded_modalities(report: &RunReport) -> Vec<&'static str> {
    let mut degraded = Vec::new();
    if report.facial.is_degraded() {
        degraded.push("facial");
    }
    if report.vocal.is_degraded() {
        degraded.push("vocal");
    }
    degraded
}
