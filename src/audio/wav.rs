use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use super::resampler::{resample_to_target, TARGET_SAMPLE_RATE};

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Read a WAV file as mono f32 in [-1, 1], averaging channels
pub fn read_wav(path: &Path) -> Result<Waveform> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("Failed to open WAV {:?}", path))?;
    let spec = reader.spec();

    debug!(
        "WAV spec: {}Hz, {} channels, {} bits, {:?}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?,
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(Waveform {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono samples as 16-bit PCM
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV {:?}", path))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).context("Failed to write sample")?;
    }
    writer.finalize().context("Failed to finalize WAV")?;
    Ok(())
}

/// Load any WAV as 16kHz mono
pub fn load_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let waveform = read_wav(path)?;
    resample_to_target(&waveform.samples, waveform.sample_rate)
}
