//! Removal of short utterances from a finished corpus tree.

use crate::audio::probe_duration;
use crate::corpus::LABEL_EXTENSION;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions considered audio when pruning
pub const AUDIO_EXTENSIONS: [&str; 3] = ["wav", "mp3", "flac"];

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("Corpus root {0:?} does not exist")]
    MissingRoot(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub scanned: u64,
    /// Files that failed to decode; these are kept
    pub undecodable: u64,
    pub short_files: u64,
    pub deleted_audio: u64,
    pub deleted_labels: u64,
    pub failed_deletes: u64,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn log(&self) {
        info!("=== Pruning complete ===");
        info!("Audio files scanned: {}", self.scanned);
        info!("Undecodable (kept): {}", self.undecodable);
        if self.dry_run {
            info!("Short files found (dry run, nothing deleted): {}", self.short_files);
            return;
        }
        info!("Audio files deleted: {}", self.deleted_audio);
        info!("Lab files deleted: {}", self.deleted_labels);
        if self.failed_deletes > 0 {
            warn!("Failed deletions: {}", self.failed_deletes);
        }
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e))
}

fn audio_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_audio(p))
}

/// Delete every audio file under `root` shorter than `min_secs`, along with
/// its `.lab` label when one exists.
///
/// Files that cannot be decoded are left in place. Labels without audio are
/// not touched.
pub fn prune_short_files(
    root: &Path,
    min_secs: f64,
    dry_run: bool,
) -> Result<PruneReport, PruneError> {
    if !root.is_dir() {
        return Err(PruneError::MissingRoot(root.to_path_buf()));
    }

    let total = audio_files(root).count() as u64;
    info!("Found {} audio files under {:?}. Analyzing length...", total, root);

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut report = PruneReport {
        dry_run,
        ..Default::default()
    };
    let mut short = Vec::new();
    for path in audio_files(root) {
        report.scanned += 1;
        match probe_duration(&path) {
            Ok(duration) if duration < min_secs => short.push(path),
            Ok(_) => {}
            Err(e) => {
                debug!("Cannot decode {:?}, keeping it: {}", path, e);
                report.undecodable += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish();

    report.short_files = short.len() as u64;
    info!("Found {} short files (< {} seconds)", short.len(), min_secs);
    if dry_run {
        for path in &short {
            info!("Would delete {:?}", path);
        }
        return Ok(report);
    }

    for (i, path) in short.iter().enumerate() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to delete {:?}: {}", path, e);
            report.failed_deletes += 1;
            continue;
        }
        report.deleted_audio += 1;
        info!("[{}/{}] Deleted audio: {:?}", i + 1, short.len(), path);

        let label = path.with_extension(LABEL_EXTENSION);
        if label.exists() {
            match fs::remove_file(&label) {
                Ok(()) => {
                    report.deleted_labels += 1;
                    info!("    Deleted lab: {:?}", label);
                }
                Err(e) => {
                    warn!("Failed to delete {:?}: {}", label, e);
                    report.failed_deletes += 1;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, write_wav};

    fn write_clip(path: &Path, secs: f64) {
        let rate = 8000;
        let audio = AudioBuffer::new(vec![0.1; (secs * rate as f64) as usize], rate, 1);
        write_wav(path, &audio).unwrap();
    }

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("Hindi_spk");
        fs::create_dir_all(&bucket).unwrap();

        write_clip(&bucket.join("10.00-10.50.wav"), 0.5);
        fs::write(bucket.join("10.00-10.50.lab"), "<hi>a</hi>").unwrap();
        write_clip(&bucket.join("20.00-22.00.wav"), 2.0);
        fs::write(bucket.join("20.00-22.00.lab"), "<hi>b</hi>").unwrap();
        // short clip without a label
        write_clip(&bucket.join("30.00-30.20.wav"), 0.2);
        fs::write(bucket.join("broken.flac"), b"not audio").unwrap();
        fs::write(bucket.join("orphan.lab"), "<hi>c</hi>").unwrap();
        dir
    }

    #[test]
    fn test_prunes_short_pairs() {
        let dir = corpus();
        let bucket = dir.path().join("Hindi_spk");

        let report = prune_short_files(dir.path(), 1.0, false).unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.undecodable, 1);
        assert_eq!(report.short_files, 2);
        assert_eq!(report.deleted_audio, 2);
        assert_eq!(report.deleted_labels, 1);
        assert_eq!(report.failed_deletes, 0);

        assert!(!bucket.join("10.00-10.50.wav").exists());
        assert!(!bucket.join("10.00-10.50.lab").exists());
        assert!(!bucket.join("30.00-30.20.wav").exists());
        assert!(bucket.join("20.00-22.00.wav").exists());
        assert!(bucket.join("20.00-22.00.lab").exists());
        assert!(bucket.join("broken.flac").exists());
        assert!(bucket.join("orphan.lab").exists());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let dir = corpus();
        let report = prune_short_files(dir.path(), 1.0, true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.short_files, 2);
        assert_eq!(report.deleted_audio, 0);
        assert!(dir.path().join("Hindi_spk/10.00-10.50.wav").exists());
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            prune_short_files(&dir.path().join("nope"), 1.0, false),
            Err(PruneError::MissingRoot(_))
        ));
    }
}
