use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported or corrupt audio: {0}")]
    Format(#[from] SymphoniaError),
    #[error("No audio track found")]
    NoTrack,
    #[error("Sample rate not specified")]
    NoSampleRate,
    #[error("Decoded audio is empty")]
    Empty,
}

/// Decoded PCM audio, interleaved, normalized to [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio file of any supported container to interleaved f32
pub fn decode_file(path: &Path) -> Result<AudioBuffer, DecodeError> {
    let file = File::open(path)?;
    let mut format = probe(Box::new(file), extension_of(path))?;
    decode_all(&mut *format)
}

/// Decode an in-memory encoded payload (wav, flac, mp3...)
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let mut format = probe(Box::new(Cursor::new(bytes)), extension)?;
    decode_all(&mut *format)
}

/// Duration of an audio file in seconds
///
/// Uses the container's frame count when it declares one and falls back to
/// a full decode otherwise.
pub fn probe_duration(path: &Path) -> Result<f64, DecodeError> {
    let file = File::open(path)?;
    let mut format = probe(Box::new(file), extension_of(path))?;

    let params = first_audio_track(&*format)?.1;
    if let (Some(n_frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 {
            return Ok(n_frames as f64 / rate as f64);
        }
    }

    Ok(decode_all(&mut *format)?.duration_secs())
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn probe(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<Box<dyn FormatReader>, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn first_audio_track(format: &dyn FormatReader) -> Result<(u32, CodecParameters), DecodeError> {
    format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| (t.id, t.codec_params.clone()))
        .ok_or(DecodeError::NoTrack)
}

fn decode_all(format: &mut dyn FormatReader) -> Result<AudioBuffer, DecodeError> {
    let (track_id, params) = first_audio_track(format)?;
    let mut sample_rate = params.sample_rate.ok_or(DecodeError::NoSampleRate)?;
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(1);

    let mut decoder =
        symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A single bad packet is skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(err.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels: channels.max(1),
    })
}
