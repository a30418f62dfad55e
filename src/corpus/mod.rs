pub mod bucket;
pub mod sanitize;

pub use bucket::{
    AUDIO_EXTENSION, BucketRegistry, CorpusEntry, CorpusError, LABEL_EXTENSION, SpeakerBucket,
    entry_base_name,
};
pub use sanitize::{is_path_safe, sanitize_speaker_id, speaker_id_text};

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

const WRITE_CHECK_FILE: &str = "test_write.txt";

/// Create the corpus root and confirm it is writable
pub fn prepare_root(root: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let root = root.canonicalize()?;
    info!("Created directory: {}", root.display());

    let check = root.join(WRITE_CHECK_FILE);
    fs::write(&check, b"test")?;
    fs::remove_file(&check)?;
    info!("Write permissions confirmed");

    Ok(root)
}

/// Audio file count of one bucket directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketInventory {
    pub name: String,
    pub audio_files: usize,
}

/// List bucket directories under the corpus root, sorted by name
pub fn inventory(root: &Path) -> io::Result<Vec<BucketInventory>> {
    let mut buckets = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let audio_files = fs::read_dir(entry.path())?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some(AUDIO_EXTENSION)
            })
            .count();
        buckets.push(BucketInventory {
            name: entry.file_name().to_string_lossy().into_owned(),
            audio_files,
        });
    }
    buckets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(buckets)
}
