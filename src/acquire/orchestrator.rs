//! Drives acquisition: languages in caller order, splits with `train` first,
//! records in source order, one at a time.

use super::cache::CacheRegion;
use super::job::{LanguageJob, RecordOutcome, SkipCounters};
use crate::config::{AcquireSettings, LanguageSpec};
use crate::corpus::{self, BucketInventory};
use crate::source::{DatasetSource, OpenedDataset, SourceError, ordered_splits};
use crate::sys;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub split: String,
    pub files_saved: u64,
    pub seconds: f64,
    /// Ended early by the quota margin rather than by exhaustion
    pub abandoned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LanguageOutcome {
    Completed,
    QuotaReached,
    SourceFailed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageReport {
    pub name: String,
    pub code: String,
    pub target_secs: f64,
    pub accumulated_secs: f64,
    pub files_saved: u64,
    pub speakers: usize,
    pub skips: SkipCounters,
    pub splits: Vec<SplitReport>,
    /// Audio layout detected for this language, if any record resolved
    pub schema: Option<String>,
    pub outcome: LanguageOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub total_files: u64,
    pub total_speakers: usize,
    pub skips: SkipCounters,
    pub languages: Vec<LanguageReport>,
    pub inventory: Vec<BucketInventory>,
}

impl RunSummary {
    pub fn log(&self) {
        info!("=== Acquisition complete ===");
        info!("Total files saved: {}", self.total_files);
        info!("Total speakers: {}", self.total_speakers);
        info!(
            "Skipped samples: {} (unresolved {}, too short {}, write failed {})",
            self.skips.total(),
            self.skips.unresolved,
            self.skips.too_short,
            self.skips.write_failed
        );
        info!("Elapsed: {:.1} minutes", self.elapsed_secs / 60.0);

        for language in &self.languages {
            info!(
                "  {}: {} files, {:.2}h of {:.2}h, {} speakers ({:?})",
                language.name,
                language.files_saved,
                language.accumulated_secs / 3600.0,
                language.target_secs / 3600.0,
                language.speakers,
                language.outcome
            );
        }

        info!("Speaker directories: {}", self.inventory.len());
        for bucket in &self.inventory {
            info!("  {}: {} audio files", bucket.name, bucket.audio_files);
        }
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }
}

pub struct Orchestrator<'a> {
    source: &'a dyn DatasetSource,
    cache: &'a CacheRegion,
    settings: &'a AcquireSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn DatasetSource,
        cache: &'a CacheRegion,
        settings: &'a AcquireSettings,
    ) -> Self {
        Self {
            source,
            cache,
            settings,
        }
    }

    /// Acquire every language in order. Never fails: language and sample
    /// level problems end up in the summary.
    pub fn run(&self, languages: &[LanguageSpec]) -> RunSummary {
        let started_at = Utc::now();
        let start = Instant::now();
        self.cache.clear();

        let mut reports = Vec::with_capacity(languages.len());
        for (i, language) in languages.iter().enumerate() {
            info!(
                "=== Processing language {}/{}: {} ({}) ===",
                i + 1,
                languages.len(),
                language.name,
                language.code
            );
            self.log_headroom();

            let report = self.run_language(language);
            info!(
                "{} done: {} files, {:.2}h, {} speakers",
                report.name,
                report.files_saved,
                report.accumulated_secs / 3600.0,
                report.speakers
            );
            reports.push(report);

            self.cache.clear();
        }

        let inventory = corpus::inventory(&self.settings.corpus_root).unwrap_or_else(|e| {
            warn!("Failed to list corpus root {:?}: {}", self.settings.corpus_root, e);
            Vec::new()
        });

        let mut skips = SkipCounters::default();
        for report in &reports {
            skips.merge(&report.skips);
        }

        RunSummary {
            started_at,
            elapsed_secs: start.elapsed().as_secs_f64(),
            total_files: reports.iter().map(|r| r.files_saved).sum(),
            total_speakers: reports.iter().map(|r| r.speakers).sum(),
            skips,
            languages: reports,
            inventory,
        }
    }

    fn log_headroom(&self) {
        match sys::available_disk_bytes(&self.settings.corpus_root) {
            Some(bytes) => info!("Available disk space: {:.2} GB", bytes as f64 / BYTES_PER_GB),
            None => debug!("Disk headroom unavailable for {:?}", self.settings.corpus_root),
        }
    }

    fn run_language(&self, language: &LanguageSpec) -> LanguageReport {
        let mut job = LanguageJob::new(language, self.settings);
        let mut splits = Vec::new();

        let outcome = match self.source.open(language) {
            Ok(dataset) => match self.run_splits(&mut job, &*dataset, &mut splits) {
                Ok(()) if job.quota().is_reached() => LanguageOutcome::QuotaReached,
                Ok(()) => LanguageOutcome::Completed,
                Err(e) => {
                    warn!("Source error for {}, moving on: {}", language.name, e);
                    LanguageOutcome::SourceFailed {
                        error: e.to_string(),
                    }
                }
            },
            Err(e) => {
                warn!("Failed to open {}: {}", language.name, e);
                LanguageOutcome::SourceFailed {
                    error: e.to_string(),
                }
            }
        };

        LanguageReport {
            name: language.name.clone(),
            code: language.code.clone(),
            target_secs: job.quota().target(),
            accumulated_secs: job.quota().accumulated(),
            files_saved: job.files_saved(),
            speakers: job.speaker_count(),
            skips: *job.skips(),
            splits,
            schema: job
                .adapter()
                .map(|a| format!("{} ({})", a.name(), a.field())),
            outcome,
        }
    }

    fn run_splits(
        &self,
        job: &mut LanguageJob<'_>,
        dataset: &dyn OpenedDataset,
        reports: &mut Vec<SplitReport>,
    ) -> Result<(), SourceError> {
        let splits = ordered_splits(dataset.splits());
        info!("Splits for {}: {:?}", job.language().name, splits);

        for split in splits {
            if job.quota().is_reached() {
                info!("Quota reached for {}", job.language().name);
                break;
            }
            let report = self.run_split(job, dataset, &split)?;
            info!(
                "Split {} finished: {} files, {:.2}h{}",
                report.split,
                report.files_saved,
                report.seconds / 3600.0,
                if report.abandoned { " (quota margin)" } else { "" }
            );
            reports.push(report);
        }
        Ok(())
    }

    fn run_split(
        &self,
        job: &mut LanguageJob<'_>,
        dataset: &dyn OpenedDataset,
        split: &str,
    ) -> Result<SplitReport, SourceError> {
        let rows = dataset.rows(split)?;
        let name = job.language().name.clone();

        let pb = match rows.len_hint() {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        pb.set_style(
            ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        pb.set_prefix(format!("{name}-{split}"));

        let mut report = SplitReport {
            split: split.to_string(),
            files_saved: 0,
            seconds: 0.0,
            abandoned: false,
        };

        for (index, row) in rows.enumerate() {
            if job.quota().is_reached() {
                break;
            }
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            };

            match job.process(&record, index as u64, dataset) {
                Ok(RecordOutcome::Saved(entry)) => {
                    report.files_saved += 1;
                    report.seconds += entry.duration_secs;
                    pb.set_message(format!(
                        "saved={} split={:.2}h total={:.2}h speakers={}",
                        report.files_saved,
                        report.seconds / 3600.0,
                        job.quota().accumulated() / 3600.0,
                        job.speaker_count()
                    ));
                }
                Ok(RecordOutcome::TooShort) => {}
                Ok(RecordOutcome::AbandonSplit) => {
                    report.abandoned = true;
                    break;
                }
                Err(e) => warn!("{}-{} record {} skipped: {}", name, split, index, e),
            }
            pb.inc(1);
        }

        pb.finish();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::JsonlSource;
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;

    fn inline_line(secs: f64, speaker: &str, text: &str) -> String {
        let rate = 100;
        let samples = vec![0.25; (secs * rate as f64) as usize];
        json!({
            "audio": {"array": samples, "sampling_rate": rate},
            "text": text,
            "speaker_id": speaker,
        })
        .to_string()
    }

    fn write_split(root: &Path, language: &str, split: &str, lines: &[String]) {
        let dir = root.join(language);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{split}.jsonl")), lines.join("\n")).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        source_root: PathBuf,
        corpus_root: PathBuf,
        cache: CacheRegion,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source_root = dir.path().join("source");
        let corpus_root = dir.path().join("data-raw");
        fs::create_dir_all(&source_root).unwrap();
        fs::create_dir_all(&corpus_root).unwrap();
        let cache = CacheRegion::create(dir.path().join("cache")).unwrap();
        Fixture {
            _dir: dir,
            source_root,
            corpus_root,
            cache,
        }
    }

    #[test]
    fn test_quota_margin_stops_split() {
        let fx = fixture();
        let line = inline_line(8.0, "spk_01", "namaste");
        write_split(&fx.source_root, "Hindi", "train", &[line.clone(), line.clone(), line]);

        let source = JsonlSource::new(&fx.source_root);
        let settings = AcquireSettings::new(&fx.corpus_root);
        let hindi = LanguageSpec::new("Hindi", "hi", 20.0 / 3600.0);
        let summary = Orchestrator::new(&source, &fx.cache, &settings).run(&[hindi]);

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_speakers, 1);
        let report = &summary.languages[0];
        assert!((report.accumulated_secs - 16.0).abs() < 1e-9);
        assert!(report.splits[0].abandoned);
        assert_eq!(report.outcome, LanguageOutcome::Completed);

        let bucket = fx.corpus_root.join("Hindi_spk_01");
        assert_eq!(
            fs::read_to_string(bucket.join("10.00-18.00.lab")).unwrap(),
            "<hi>namaste</hi>"
        );
        assert!(bucket.join("20.00-28.00.wav").is_file());
        assert!(!bucket.join("30.00-38.00.wav").exists());
        assert_eq!(
            summary.inventory,
            vec![BucketInventory {
                name: "Hindi_spk_01".into(),
                audio_files: 2,
            }]
        );
        assert_eq!(report.schema.as_deref(), Some("inline-array (audio)"));
    }

    #[test]
    fn test_every_audio_file_has_a_label() {
        let fx = fixture();
        let lines: Vec<String> = (0..6)
            .map(|i| inline_line(1.0 + i as f64 * 0.25, &format!("s{}", i % 3), "t"))
            .collect();
        write_split(&fx.source_root, "Tamil", "valid", &lines[..2]);
        write_split(&fx.source_root, "Tamil", "train", &lines[2..]);

        let source = JsonlSource::new(&fx.source_root);
        let settings = AcquireSettings::new(&fx.corpus_root);
        let tamil = LanguageSpec::new("Tamil", "ta", 1.0);
        let summary = Orchestrator::new(&source, &fx.cache, &settings).run(&[tamil]);

        assert_eq!(summary.languages[0].files_saved, 6);

        for entry in walkdir::WalkDir::new(&fx.corpus_root) {
            let path = entry.unwrap().into_path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("wav") => assert!(path.with_extension("lab").is_file()),
                Some("lab") => assert!(path.with_extension("wav").is_file()),
                _ => {}
            }
        }
    }

    #[test]
    fn test_failed_language_is_skipped() {
        let fx = fixture();
        write_split(&fx.source_root, "Marathi", "train", &[inline_line(2.0, "m", "x")]);

        let source = JsonlSource::new(&fx.source_root);
        let settings = AcquireSettings::new(&fx.corpus_root);
        let languages = [
            LanguageSpec::new("Klingon", "tlh", 1.0),
            LanguageSpec::new("Marathi", "mr", 1.0),
        ];
        let summary = Orchestrator::new(&source, &fx.cache, &settings).run(&languages);

        assert!(matches!(
            summary.languages[0].outcome,
            LanguageOutcome::SourceFailed { .. }
        ));
        assert_eq!(summary.languages[1].files_saved, 1);
        assert!(fx.corpus_root.join("Marathi_m").is_dir());
        assert!(fx.cache.path().is_dir());
    }

    #[test]
    fn test_margin_abandon_moves_to_next_split() {
        let fx = fixture();
        let long = inline_line(8.0, "spk", "long");
        write_split(&fx.source_root, "Hindi", "train", &[long.clone(), long.clone(), long]);
        write_split(&fx.source_root, "Hindi", "valid", &[inline_line(3.0, "spk", "short")]);

        let source = JsonlSource::new(&fx.source_root);
        let settings = AcquireSettings::new(&fx.corpus_root);
        let hindi = LanguageSpec::new("Hindi", "hi", 20.0 / 3600.0);
        let summary = Orchestrator::new(&source, &fx.cache, &settings).run(&[hindi]);

        let report = &summary.languages[0];
        let order: Vec<&str> = report.splits.iter().map(|s| s.split.as_str()).collect();
        assert_eq!(order, vec!["train", "valid"]);
        assert!(report.splits[0].abandoned);
        assert_eq!(report.splits[0].files_saved, 2);
        assert!(!report.splits[1].abandoned);
        assert_eq!(report.splits[1].files_saved, 1);
        assert!((report.accumulated_secs - 19.0).abs() < 1e-9);
        assert_eq!(report.outcome, LanguageOutcome::Completed);
    }

    /// Drops a file into the cache on every open, noting whether the cache
    /// was empty at that point
    struct CacheFilling<'a> {
        inner: JsonlSource,
        cache: &'a Path,
        empty_on_open: RefCell<Vec<(String, bool)>>,
    }

    impl DatasetSource for CacheFilling<'_> {
        fn open(
            &self,
            language: &LanguageSpec,
        ) -> Result<Box<dyn OpenedDataset + '_>, SourceError> {
            let empty = fs::read_dir(self.cache).unwrap().next().is_none();
            self.empty_on_open
                .borrow_mut()
                .push((language.name.clone(), empty));
            fs::write(self.cache.join(format!("{}.part", language.name)), b"partial").unwrap();
            self.inner.open(language)
        }
    }

    #[test]
    fn test_cache_cleared_around_every_language() {
        let fx = fixture();
        write_split(&fx.source_root, "Marathi", "train", &[inline_line(2.0, "m", "x")]);
        fs::write(fx.cache.path().join("stale.bin"), b"left over").unwrap();

        let source = CacheFilling {
            inner: JsonlSource::new(&fx.source_root),
            cache: fx.cache.path(),
            empty_on_open: RefCell::new(Vec::new()),
        };
        let settings = AcquireSettings::new(&fx.corpus_root);
        let languages = [
            LanguageSpec::new("Klingon", "tlh", 1.0),
            LanguageSpec::new("Marathi", "mr", 1.0),
        ];
        Orchestrator::new(&source, &fx.cache, &settings).run(&languages);

        // stale data is gone before the first language, the failed
        // language's leftovers are gone before the next one
        assert_eq!(
            source.empty_on_open.borrow().as_slice(),
            &[("Klingon".to_string(), true), ("Marathi".to_string(), true)]
        );
        assert_eq!(fs::read_dir(fx.cache.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cache_cleared_after_lone_failed_language() {
        let fx = fixture();
        fs::write(fx.cache.path().join("stale.bin"), b"left over").unwrap();

        let source = CacheFilling {
            inner: JsonlSource::new(&fx.source_root),
            cache: fx.cache.path(),
            empty_on_open: RefCell::new(Vec::new()),
        };
        let settings = AcquireSettings::new(&fx.corpus_root);
        let summary = Orchestrator::new(&source, &fx.cache, &settings)
            .run(&[LanguageSpec::new("Klingon", "tlh", 1.0)]);

        assert!(matches!(
            summary.languages[0].outcome,
            LanguageOutcome::SourceFailed { .. }
        ));
        assert!(fx.cache.path().is_dir());
        assert_eq!(fs::read_dir(fx.cache.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_skips_reach_summary() {
        let fx = fixture();
        let lines = vec![
            inline_line(0.2, "a", "short"),
            json!({"audio": "missing.wav", "text": "x"}).to_string(),
            inline_line(1.0, "a", "ok"),
        ];
        write_split(&fx.source_root, "Kannada", "train", &lines);

        let source = JsonlSource::new(&fx.source_root);
        let settings = AcquireSettings::new(&fx.corpus_root);
        let summary = Orchestrator::new(&source, &fx.cache, &settings)
            .run(&[LanguageSpec::new("Kannada", "kn", 1.0)]);

        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.skips.too_short, 1);
        assert_eq!(summary.skips.unresolved, 1);

        let json_path = fx.corpus_root.join("summary.json");
        summary.write_json(&json_path).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(written["total_files"], 1);
        assert_eq!(written["languages"][0]["outcome"]["status"], "completed");
    }
}
