//! Per-language acquisition state and the per-record pipeline.

use super::quota::{Admission, QuotaTracker};
use super::schema::{ResolveError, SchemaAdapter};
use crate::audio::AudioBuffer;
use crate::config::{AcquireSettings, LanguageSpec};
use crate::corpus::{BucketRegistry, CorpusEntry, CorpusError, speaker_id_text};
use crate::source::{AudioLocator, Record};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

const SPEAKER_FIELD: &str = "speaker_id";
const TEXT_FIELD: &str = "text";

/// Why a single record was not turned into a corpus entry
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Unresolved audio: {0}")]
    Unresolved(#[from] ResolveError),
    #[error("Write failed: {0}")]
    Write(#[from] CorpusError),
}

/// What happened to one record
#[derive(Debug)]
pub enum RecordOutcome {
    Saved(CorpusEntry),
    TooShort,
    /// The quota policy ended the current split; the record was not used
    AbandonSplit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounters {
    pub unresolved: u64,
    pub too_short: u64,
    pub write_failed: u64,
}

impl SkipCounters {
    pub fn total(&self) -> u64 {
        self.unresolved + self.too_short + self.write_failed
    }

    pub fn merge(&mut self, other: &SkipCounters) {
        self.unresolved += other.unresolved;
        self.too_short += other.too_short;
        self.write_failed += other.write_failed;
    }
}

/// Transient view of one record, alive only while it is processed
struct Sample {
    audio: AudioBuffer,
    text: String,
    speaker: String,
}

pub struct LanguageJob<'a> {
    language: &'a LanguageSpec,
    settings: &'a AcquireSettings,
    quota: QuotaTracker,
    buckets: BucketRegistry,
    speakers: BTreeSet<String>,
    adapter: Option<SchemaAdapter>,
    skips: SkipCounters,
    files_saved: u64,
}

impl<'a> LanguageJob<'a> {
    pub fn new(language: &'a LanguageSpec, settings: &'a AcquireSettings) -> Self {
        Self {
            language,
            settings,
            quota: QuotaTracker::new(language.target_secs(), settings.quota_margin_secs),
            buckets: BucketRegistry::new(&settings.corpus_root, language.name.as_str()),
            speakers: BTreeSet::new(),
            adapter: None,
            skips: SkipCounters::default(),
            files_saved: 0,
        }
    }

    pub fn language(&self) -> &LanguageSpec {
        self.language
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn files_saved(&self) -> u64 {
        self.files_saved
    }

    pub fn skips(&self) -> &SkipCounters {
        &self.skips
    }

    pub fn adapter(&self) -> Option<SchemaAdapter> {
        self.adapter
    }

    /// Run one record through resolve, gate and commit.
    ///
    /// `index` is the record's position in its split and only feeds the
    /// fallback speaker id. Skips are counted here, so callers only need to
    /// log the error.
    pub fn process<L: AudioLocator + ?Sized>(
        &mut self,
        record: &Record,
        index: u64,
        locator: &L,
    ) -> Result<RecordOutcome, SampleError> {
        let audio = match self.resolve(record, locator) {
            Ok(audio) => audio,
            Err(e) => {
                self.skips.unresolved += 1;
                return Err(e.into());
            }
        };

        let duration = audio.duration_secs();
        if duration < self.settings.min_sample_secs {
            self.skips.too_short += 1;
            return Ok(RecordOutcome::TooShort);
        }
        if self.quota.admit(duration) == Admission::AbandonSplit {
            return Ok(RecordOutcome::AbandonSplit);
        }

        let sample = Sample {
            audio,
            text: record
                .get(TEXT_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            speaker: record
                .get(SPEAKER_FIELD)
                .and_then(speaker_id_text)
                .unwrap_or_else(|| format!("{}_unknown_{}", self.language.name, index)),
        };

        match self.commit(sample) {
            Ok(entry) => Ok(RecordOutcome::Saved(entry)),
            Err(e) => {
                self.skips.write_failed += 1;
                Err(e.into())
            }
        }
    }

    fn resolve<L: AudioLocator + ?Sized>(
        &mut self,
        record: &Record,
        locator: &L,
    ) -> Result<AudioBuffer, ResolveError> {
        if let Some(adapter) = self.adapter {
            return adapter.resolve(record, locator);
        }

        // Detection repeats on later records until one succeeds
        let (adapter, audio) = SchemaAdapter::detect(record, locator)?;
        info!(
            "{}: audio found as {} in field '{}'",
            self.language.name,
            adapter.name(),
            adapter.field()
        );
        self.adapter = Some(adapter);
        Ok(audio)
    }

    fn commit(&mut self, sample: Sample) -> Result<CorpusEntry, CorpusError> {
        let label = self
            .settings
            .label_format
            .render(&self.language.code, &sample.text);

        let bucket = self.buckets.bucket_for(&sample.speaker)?;
        let entry = bucket.commit(&sample.audio, &label)?;
        let dir_name = bucket.dir_name().to_string();

        self.quota.commit(entry.duration_secs);
        self.speakers.insert(dir_name);
        self.files_saved += 1;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelFormat;
    use crate::source::SourceError;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    struct NoFiles;

    impl AudioLocator for NoFiles {
        fn materialize(&self, reference: &str) -> Result<PathBuf, SourceError> {
            Err(SourceError::Resource(reference.to_string()))
        }
    }

    fn inline(secs: f64, speaker: Option<&str>, text: &str) -> Record {
        let rate = 100;
        let samples = vec![0.1; (secs * rate as f64) as usize];
        let mut value = json!({
            "audio": {"array": samples, "sampling_rate": rate},
            "text": text,
        });
        if let Some(speaker) = speaker {
            value["speaker_id"] = json!(speaker);
        }
        value.as_object().unwrap().clone()
    }

    fn settings(root: &std::path::Path) -> AcquireSettings {
        AcquireSettings::new(root)
    }

    #[test]
    fn test_commits_until_margin() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let hindi = LanguageSpec::new("Hindi", "hi", 20.0 / 3600.0);
        let mut job = LanguageJob::new(&hindi, &settings);

        let record = inline(8.0, Some("spk_01"), " namaste ");
        assert!(matches!(job.process(&record, 0, &NoFiles), Ok(RecordOutcome::Saved(_))));
        assert!(matches!(job.process(&record, 1, &NoFiles), Ok(RecordOutcome::Saved(_))));
        assert!(matches!(job.process(&record, 2, &NoFiles), Ok(RecordOutcome::AbandonSplit)));

        assert!((job.quota().accumulated() - 16.0).abs() < 1e-9);
        assert_eq!(job.files_saved(), 2);
        assert_eq!(job.speaker_count(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("Hindi_spk_01/10.00-18.00.lab")).unwrap(),
            "<hi>namaste</hi>"
        );
    }

    #[test]
    fn test_short_and_unresolved_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let tamil = LanguageSpec::new("Tamil", "ta", 1.0);
        let mut job = LanguageJob::new(&tamil, &settings);

        let short = inline(0.3, Some("a"), "x");
        assert!(matches!(job.process(&short, 0, &NoFiles), Ok(RecordOutcome::TooShort)));

        let broken = json!({"audio": "nowhere.wav"}).as_object().unwrap().clone();
        assert!(matches!(
            job.process(&broken, 1, &NoFiles),
            Err(SampleError::Unresolved(_))
        ));

        assert_eq!(job.skips().too_short, 1);
        assert_eq!(job.skips().unresolved, 1);
        assert_eq!(job.files_saved(), 0);
        assert_eq!(job.quota().accumulated(), 0.0);
    }

    #[test]
    fn test_missing_speaker_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.label_format = LabelFormat::Spaced;
        let telugu = LanguageSpec::new("Telugu", "te", 1.0);
        let mut job = LanguageJob::new(&telugu, &settings);

        let Ok(RecordOutcome::Saved(entry)) = job.process(&inline(1.0, None, "t"), 7, &NoFiles)
        else {
            panic!("expected a saved entry");
        };
        assert!(entry.audio_path.starts_with(dir.path().join("Telugu_Telugu_unknown_7")));
        assert_eq!(fs::read_to_string(&entry.label_path).unwrap(), "<te> t </te>");
    }

    #[test]
    fn test_adapter_locked_after_detection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let kannada = LanguageSpec::new("Kannada", "kn", 1.0);
        let mut job = LanguageJob::new(&kannada, &settings);

        let broken = json!({"wav": "gone.wav"}).as_object().unwrap().clone();
        assert!(job.process(&broken, 0, &NoFiles).is_err());
        assert_eq!(job.adapter(), None);

        job.process(&inline(1.0, Some("s"), "a"), 1, &NoFiles).unwrap();
        assert_eq!(job.adapter(), Some(SchemaAdapter::InlineArray { field: "audio" }));
    }
}
