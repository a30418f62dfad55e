//! Locating the audio payload inside records whose shape varies by source.
//!
//! An adapter is detected once per language job from the first record that
//! resolves, then reused for every following record of that job.

use crate::audio::{AudioBuffer, DecodeError, decode_bytes, decode_file};
use crate::source::{AudioLocator, Record, SourceError};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Audio field names in priority order; only the first usable one counts
pub const CANDIDATE_FIELDS: [&str; 4] = ["audio", "audio_filepath", "sound", "wav"];

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No candidate audio field present")]
    NoAudioField,
    #[error("Field '{field}' is not usable audio: {reason}")]
    Unusable { field: &'static str, reason: String },
    #[error("Failed to fetch '{field}': {source}")]
    Fetch {
        field: &'static str,
        #[source]
        source: SourceError,
    },
    #[error("Failed to decode '{field}': {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: DecodeError,
    },
}

/// Known record shapes for the audio cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAdapter {
    /// `{"array": [...], "sampling_rate": 16000}` already decoded rows
    InlineArray { field: &'static str },
    /// `[{"src": "https://...", "type": "audio/wav"}]` datasets-server cells
    HostedAsset { field: &'static str },
    /// A bare path or URL string
    FileReference { field: &'static str },
    /// `{"bytes": [...], "path": "x.flac"}` encoded payloads
    EncodedBytes { field: &'static str },
}

impl SchemaAdapter {
    pub fn field(&self) -> &'static str {
        match self {
            SchemaAdapter::InlineArray { field }
            | SchemaAdapter::HostedAsset { field }
            | SchemaAdapter::FileReference { field }
            | SchemaAdapter::EncodedBytes { field } => field,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchemaAdapter::InlineArray { .. } => "inline-array",
            SchemaAdapter::HostedAsset { .. } => "hosted-asset",
            SchemaAdapter::FileReference { .. } => "file-reference",
            SchemaAdapter::EncodedBytes { .. } => "encoded-bytes",
        }
    }

    fn classify(field: &'static str, value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(SchemaAdapter::FileReference { field }),
            Value::Object(map) if map.contains_key("array") => {
                Some(SchemaAdapter::InlineArray { field })
            }
            Value::Object(map)
                if map.get("bytes").is_some_and(|b| !b.is_null())
                    || map.get("path").is_some_and(Value::is_string) =>
            {
                Some(SchemaAdapter::EncodedBytes { field })
            }
            Value::Object(map) if map.get("src").is_some_and(Value::is_string) => {
                Some(SchemaAdapter::HostedAsset { field })
            }
            Value::Array(items) if items.first().and_then(|i| i.get("src")).is_some() => {
                Some(SchemaAdapter::HostedAsset { field })
            }
            _ => None,
        }
    }

    /// Find the adapter for a source by walking the candidate fields in
    /// order; the first field that yields audio wins.
    pub fn detect<L: AudioLocator + ?Sized>(
        record: &Record,
        locator: &L,
    ) -> Result<(Self, AudioBuffer), ResolveError> {
        let mut last_error = ResolveError::NoAudioField;

        for field in CANDIDATE_FIELDS {
            let Some(value) = record.get(field) else {
                continue;
            };
            let Some(adapter) = Self::classify(field, value) else {
                last_error = ResolveError::Unusable {
                    field,
                    reason: "unrecognized value shape".into(),
                };
                continue;
            };
            match adapter.resolve(record, locator) {
                Ok(audio) => return Ok((adapter, audio)),
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    /// Extract the audio of one record with this adapter
    pub fn resolve<L: AudioLocator + ?Sized>(
        &self,
        record: &Record,
        locator: &L,
    ) -> Result<AudioBuffer, ResolveError> {
        let field = self.field();
        let value = record.get(field).ok_or(ResolveError::NoAudioField)?;
        let unusable = |reason: &str| ResolveError::Unusable {
            field,
            reason: reason.to_string(),
        };

        match self {
            SchemaAdapter::InlineArray { .. } => inline_array(field, value),
            SchemaAdapter::HostedAsset { .. } => {
                let src = hosted_src(value).ok_or_else(|| unusable("no 'src' url"))?;
                decode_reference(field, src, locator)
            }
            SchemaAdapter::FileReference { .. } => {
                let reference = value.as_str().ok_or_else(|| unusable("not a string"))?;
                decode_reference(field, reference, locator)
            }
            SchemaAdapter::EncodedBytes { .. } => {
                let path = value.get("path").and_then(Value::as_str);
                match value.get("bytes").and_then(byte_payload) {
                    Some(bytes) => {
                        let extension = path
                            .and_then(|p| Path::new(p).extension())
                            .and_then(|e| e.to_str());
                        decode_bytes(bytes, extension)
                            .map_err(|source| ResolveError::Decode { field, source })
                    }
                    None => {
                        let path = path.ok_or_else(|| unusable("neither bytes nor path"))?;
                        decode_reference(field, path, locator)
                    }
                }
            }
        }
    }
}

fn decode_reference<L: AudioLocator + ?Sized>(
    field: &'static str,
    reference: &str,
    locator: &L,
) -> Result<AudioBuffer, ResolveError> {
    let path = locator
        .materialize(reference)
        .map_err(|source| ResolveError::Fetch { field, source })?;
    decode_file(&path).map_err(|source| ResolveError::Decode { field, source })
}

fn hosted_src(value: &Value) -> Option<&str> {
    match value {
        Value::Array(items) => items.first()?.get("src")?.as_str(),
        other => other.get("src")?.as_str(),
    }
}

fn byte_payload(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect::<Option<Vec<u8>>>()
        .filter(|bytes| !bytes.is_empty())
}

/// Mono `[f, f, ...]` or per-frame `[[l, r], ...]` arrays
fn inline_array(field: &'static str, value: &Value) -> Result<AudioBuffer, ResolveError> {
    let unusable = |reason: &str| ResolveError::Unusable {
        field,
        reason: reason.to_string(),
    };

    let sample_rate = value
        .get("sampling_rate")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok())
        .filter(|r| *r > 0)
        .ok_or_else(|| unusable("missing or invalid sampling_rate"))?;
    let frames = value
        .get("array")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| unusable("empty or missing array"))?;

    let as_sample = |v: &Value| v.as_f64().map(|s| s as f32);

    if let Some(first) = frames[0].as_array() {
        let channels = first.len();
        if channels == 0 || channels > u16::MAX as usize {
            return Err(unusable("invalid channel count"));
        }
        let mut samples = Vec::with_capacity(frames.len() * channels);
        for frame in frames {
            let frame = frame
                .as_array()
                .filter(|f| f.len() == channels)
                .ok_or_else(|| unusable("ragged frames"))?;
            for v in frame {
                samples.push(as_sample(v).ok_or_else(|| unusable("non-numeric sample"))?);
            }
        }
        return Ok(AudioBuffer::new(samples, sample_rate, channels as u16));
    }

    let samples = frames
        .iter()
        .map(as_sample)
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| unusable("non-numeric sample"))?;
    Ok(AudioBuffer::new(samples, sample_rate, 1))
}
