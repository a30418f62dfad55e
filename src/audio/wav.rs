use super::AudioBuffer;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Write audio as 16-bit PCM WAV at its original rate and channel count
pub fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: audio.channels.max(1),
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in &audio.samples {
        writer.write_sample(to_i16(sample))?;
    }
    writer.finalize()
}

fn to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_finite() { sample.clamp(-1.0, 1.0) } else { 0.0 };
    (clamped * i16::MAX as f32) as i16
}
