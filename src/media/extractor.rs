//! Middle-frame and audio-track extraction.

use serde_json::Value;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::tools::MediaTools;
use super::workspace::RunWorkspace;
use crate::error::ExtractionError;

const FRAME_ARTIFACT: &str = "frame.png";
const AUDIO_ARTIFACT: &str = "audio.wav";

/// Sample rate of the extracted audio track
pub const EXTRACTED_SAMPLE_RATE: u32 = 16000;

/// The decoded middle frame, written as an image inside the run workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub path: PathBuf,
    /// Zero-based frame index (`frame_count / 2`)
    pub index: u64,
    pub width: u32,
    pub height: u32,
}

/// The audio track as 16-bit PCM, mono, 16kHz WAV inside the run workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAudio {
    pub path: PathBuf,
}

pub struct MediaExtractor {
    tools: MediaTools,
}

impl MediaExtractor {
    pub fn new(tools: MediaTools) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &MediaTools {
        &self.tools
    }

    /// Decode the frame at index `frame_count / 2` and write it to the workspace.
    pub fn extract_frame(
        &self,
        video: &Path,
        workspace: &RunWorkspace,
    ) -> Result<ExtractedFrame, ExtractionError> {
        ensure_input(video)?;

        let frame_count = self.count_frames(video)?;
        if frame_count == 0 {
            return Err(ExtractionError::NoFrames(video.to_path_buf()));
        }
        let index = frame_count / 2;
        debug!("Video has {} frames, taking index {}", frame_count, index);

        let output = workspace.artifact_path(FRAME_ARTIFACT);
        let select = format!("select=eq(n\\,{})", index);
        let args: [&OsStr; 13] = [
            "-hide_banner".as_ref(),
            "-loglevel".as_ref(),
            "error".as_ref(),
            "-i".as_ref(),
            video.as_os_str(),
            "-vf".as_ref(),
            select.as_ref(),
            "-vsync".as_ref(),
            "0".as_ref(),
            "-frames:v".as_ref(),
            "1".as_ref(),
            "-y".as_ref(),
            output.as_os_str(),
        ];
        self.tools.run_ffmpeg(args)?;

        if !output.exists() {
            return Err(ExtractionError::FrameDecode {
                index,
                reason: "decoder produced no image".to_string(),
            });
        }

        let (width, height) =
            image::image_dimensions(&output).map_err(|e| ExtractionError::FrameDecode {
                index,
                reason: e.to_string(),
            })?;

        info!("Extracted frame {} ({}x{})", index, width, height);
        Ok(ExtractedFrame {
            path: output,
            index,
            width,
            height,
        })
    }

    /// Convert the audio track to 16-bit PCM, mono, 16kHz WAV.
    pub fn extract_audio(
        &self,
        video: &Path,
        workspace: &RunWorkspace,
    ) -> Result<ExtractedAudio, ExtractionError> {
        ensure_input(video)?;

        let output = workspace.artifact_path(AUDIO_ARTIFACT);
        let sample_rate = EXTRACTED_SAMPLE_RATE.to_string();
        let args: [&OsStr; 14] = [
            "-hide_banner".as_ref(),
            "-loglevel".as_ref(),
            "error".as_ref(),
            "-i".as_ref(),
            video.as_os_str(),
            "-vn".as_ref(),
            "-acodec".as_ref(),
            "pcm_s16le".as_ref(),
            "-ar".as_ref(),
            sample_rate.as_ref(),
            "-ac".as_ref(),
            "1".as_ref(),
            "-y".as_ref(),
            output.as_os_str(),
        ];
        self.tools.run_ffmpeg(args)?;

        if !output.exists() {
            return Err(ExtractionError::MissingOutput {
                tool: "ffmpeg".to_string(),
                path: output,
            });
        }

        info!("Extracted audio track to {:?}", output);
        Ok(ExtractedAudio { path: output })
    }

    /// Number of frames in the first video stream
    pub fn count_frames(&self, video: &Path) -> Result<u64, ExtractionError> {
        let args: [&OsStr; 10] = [
            "-v".as_ref(),
            "error".as_ref(),
            "-select_streams".as_ref(),
            "v:0".as_ref(),
            "-count_packets".as_ref(),
            "-show_entries".as_ref(),
            "stream=nb_read_packets,nb_frames".as_ref(),
            "-of".as_ref(),
            "json".as_ref(),
            video.as_os_str(),
        ];
        let output = self.tools.run_ffprobe(args)?;

        parse_frame_count(&output.stdout)
    }
}

fn ensure_input(video: &Path) -> Result<(), ExtractionError> {
    if video.is_file() {
        Ok(())
    } else {
        Err(ExtractionError::InputNotFound(video.to_path_buf()))
    }
}

/// Read the frame count out of ffprobe's JSON.
///
/// Counted packets are preferred over the container's `nb_frames`, which
/// some muxers leave out. No video stream at all counts as zero frames.
fn parse_frame_count(stdout: &[u8]) -> Result<u64, ExtractionError> {
    let json: Value = serde_json::from_slice(stdout)
        .map_err(|e| ExtractionError::Probe(format!("unreadable ffprobe output: {}", e)))?;

    let Some(stream) = json
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|streams| streams.first())
    else {
        return Ok(0);
    };

    ["nb_read_packets", "nb_frames"]
        .iter()
        .filter_map(|key| stream.get(*key))
        .find_map(|value| match value {
            Value::String(s) => s.trim().parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        })
        .ok_or_else(|| ExtractionError::Probe("frame count unavailable".to_string()))
}
