//! Speaker buckets and corpus entry commits.
//!
//! One bucket directory exists per (language, speaker) pair:
//! `<root>/<language>_<speaker>/<start>-<end>.{wav,lab}`.

use super::sanitize::sanitize_speaker_id;
use crate::audio::{AudioBuffer, write_wav};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const AUDIO_EXTENSION: &str = "wav";
pub const LABEL_EXTENSION: &str = "lab";

/// Spacing of the synthetic start offsets, in seconds
const SLOT_SECS: f64 = 10.0;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write audio {path:?}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("Entry {0:?} is missing or empty after writing")]
    Incomplete(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CorpusError + '_ {
    move |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A committed audio + label pair
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub audio_path: PathBuf,
    pub label_path: PathBuf,
    pub duration_secs: f64,
}

/// Base file name for the `n`th entry of a bucket.
///
/// Not a real timestamp: each entry gets a 10 second slot so names stay
/// unique and sort in commit order.
pub fn entry_base_name(n: u64, duration_secs: f64) -> String {
    let start = n as f64 * SLOT_SECS;
    format!("{:.2}-{:.2}", start, start + duration_secs)
}

pub fn bucket_dir_name(language: &str, sanitized_speaker: &str) -> String {
    format!("{language}_{sanitized_speaker}")
}

/// Output directory and file counter for one (language, speaker) pair
#[derive(Debug)]
pub struct SpeakerBucket {
    dir_name: String,
    dir: PathBuf,
    counter: u64,
}

impl SpeakerBucket {
    fn open(root: &Path, language: &str, speaker: &str) -> Result<Self, CorpusError> {
        let dir_name = bucket_dir_name(language, speaker);
        let dir = root.join(&dir_name);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let counter = highest_existing_index(&dir);
        if counter > 0 {
            debug!("Bucket {} resumes after entry {}", dir_name, counter);
        }

        Ok(Self {
            dir_name,
            dir,
            counter,
        })
    }

    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of the last committed entry
    #[cfg(test)]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Write an audio/label pair under the next base name.
    ///
    /// Either both files end up in the bucket or neither does. The counter
    /// only advances when the pair is committed.
    pub fn commit(&mut self, audio: &AudioBuffer, label: &str) -> Result<CorpusEntry, CorpusError> {
        let index = self.counter + 1;
        let duration_secs = audio.duration_secs();
        let base = entry_base_name(index, duration_secs);

        let audio_path = self.dir.join(format!("{base}.{AUDIO_EXTENSION}"));
        let label_path = self.dir.join(format!("{base}.{LABEL_EXTENSION}"));

        write_pair(&audio_path, &label_path, audio, label)?;
        self.counter = index;

        Ok(CorpusEntry {
            audio_path,
            label_path,
            duration_secs,
        })
    }
}

/// Buckets of a single language, keyed by sanitized speaker id
#[derive(Debug)]
pub struct BucketRegistry {
    root: PathBuf,
    language: String,
    buckets: HashMap<String, SpeakerBucket>,
}

impl BucketRegistry {
    pub fn new(root: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            language: language.into(),
            buckets: HashMap::new(),
        }
    }

    /// Bucket for a raw speaker id, creating its directory on first use
    pub fn bucket_for(&mut self, raw_speaker: &str) -> Result<&mut SpeakerBucket, CorpusError> {
        let speaker = sanitize_speaker_id(raw_speaker);
        match self.buckets.entry(speaker) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let bucket = SpeakerBucket::open(&self.root, &self.language, entry.key())?;
                Ok(entry.insert(bucket))
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

}

/// Highest entry index already present in a bucket directory
fn highest_existing_index(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(AUDIO_EXTENSION))
        .filter_map(|p| {
            let stem = p.file_stem()?.to_str()?.to_string();
            let start: f64 = stem.split_once('-')?.0.parse().ok()?;
            let index = (start / SLOT_SECS).round();
            // Names like `inf-...` or `1e30-...` parse but are not ours
            (index.is_finite() && (0.0..=u32::MAX as f64).contains(&index))
                .then_some(index as u64)
        })
        .max()
        .unwrap_or(0)
}

/// Hidden staging name next to the final path
fn part_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.part"))
}

fn discard(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial entry {:?}: {}", path, e);
            }
        }
    }
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn write_pair(
    audio_path: &Path,
    label_path: &Path,
    audio: &AudioBuffer,
    label: &str,
) -> Result<(), CorpusError> {
    let audio_tmp = part_path(audio_path);
    let label_tmp = part_path(label_path);

    let staged = write_wav(&audio_tmp, audio)
        .map_err(|source| CorpusError::Wav {
            path: audio_path.to_path_buf(),
            source,
        })
        .and_then(|_| fs::write(&label_tmp, label.as_bytes()).map_err(io_err(label_path)));
    if let Err(e) = staged {
        discard(&[&audio_tmp, &label_tmp]);
        return Err(e);
    }

    if let Err(source) = fs::rename(&label_tmp, label_path) {
        discard(&[&audio_tmp, &label_tmp]);
        return Err(io_err(label_path)(source));
    }
    if let Err(source) = fs::rename(&audio_tmp, audio_path) {
        discard(&[&audio_tmp, label_path]);
        return Err(io_err(audio_path)(source));
    }

    if !is_non_empty(audio_path) || !is_non_empty(label_path) {
        discard(&[audio_path, label_path]);
        return Err(CorpusError::Incomplete(audio_path.to_path_buf()));
    }

    Ok(())
}
