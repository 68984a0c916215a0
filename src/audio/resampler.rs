use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

/// Sample rate the voice model expects
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Input chunk size fed to the FFT resampler
const CHUNK_FRAMES: usize = 1024;

/// Audio resampler wrapper for converting a source sample rate to 16kHz
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    input_frames: usize,
}

impl AudioResampler {
    /// Create a new mono resampler from `source_sample_rate` to 16kHz
    pub fn new(source_sample_rate: u32) -> Result<Self> {
        if source_sample_rate == 0 {
            anyhow::bail!("Source sample rate must be non-zero");
        }

        let ratio = TARGET_SAMPLE_RATE as f64 / source_sample_rate as f64;
        debug!(
            "Creating resampler: {} Hz -> {} Hz (ratio: {:.4})",
            source_sample_rate, TARGET_SAMPLE_RATE, ratio
        );

        let channels = 1;
        let resampler = FftFixedIn::new(
            source_sample_rate as usize,
            TARGET_SAMPLE_RATE as usize,
            CHUNK_FRAMES,
            2, // sub_chunks for quality
            channels,
        )
        .context("Failed to create resampler")?;

        let input_buffer = vec![vec![0.0f32; CHUNK_FRAMES]; channels];
        let output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            resampler,
            input_buffer,
            output_buffer,
            input_frames: CHUNK_FRAMES,
        })
    }

    /// Get the number of input frames needed for the next process call
    pub fn input_frames_next(&self) -> usize {
        self.input_frames
    }

    /// Number of leading output frames that are filter latency
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Process exactly `input_frames_next()` samples and return resampled output
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_frames {
            anyhow::bail!(
                "Input length {} doesn't match expected {}",
                input.len(),
                self.input_frames
            );
        }

        self.input_buffer[0].copy_from_slice(input);

        let (_, output_frames) = self
            .resampler
            .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
            .context("Resampling failed")?;

        Ok(self.output_buffer[0][..output_frames].to_vec())
    }
}

/// Resample a whole mono clip to 16kHz.
///
/// A clip already at 16kHz is returned unchanged. The output is trimmed of
/// the resampler's latency and has `ceil(len * 16000 / source_rate)` samples.
pub fn resample_to_target(samples: &[f32], source_sample_rate: u32) -> Result<Vec<f32>> {
    if source_sample_rate == TARGET_SAMPLE_RATE || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = AudioResampler::new(source_sample_rate)?;
    let chunk = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * TARGET_SAMPLE_RATE as f64
        / source_sample_rate as f64)
        .ceil() as usize;

    let mut output = Vec::with_capacity(expected + delay);
    let mut padded = vec![0.0f32; chunk];
    let mut offset = 0;
    // Zero padding past the end flushes the filter; this bounds it
    let max_offset = samples.len() + chunk * (8 + delay / chunk.max(1));

    while output.len() < expected + delay {
        if offset > max_offset {
            anyhow::bail!("Resampler stalled after {} output samples", output.len());
        }

        padded.fill(0.0);
        if offset < samples.len() {
            let end = (offset + chunk).min(samples.len());
            padded[..end - offset].copy_from_slice(&samples[offset..end]);
        }
        offset += chunk;

        output.extend(resampler.process(&padded)?);
    }

    Ok(output.into_iter().skip(delay).take(expected).collect())
}
