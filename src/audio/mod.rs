pub mod resampler;
pub mod wav;

pub use resampler::{resample_to_target, AudioResampler, TARGET_SAMPLE_RATE};
pub use wav::{load_mono_16k, read_wav, write_wav, Waveform};
