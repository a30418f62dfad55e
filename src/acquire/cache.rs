use crate::sys;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Scratch directory for downloaded source data, wiped between languages
#[derive(Debug)]
pub struct CacheRegion {
    path: PathBuf,
}

impl CacheRegion {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty the cache directory and hand freed heap back to the OS.
    ///
    /// Failures are logged, never returned; the directory exists afterwards
    /// whenever it can be recreated.
    pub fn clear(&self) {
        if self.path.exists() {
            let bytes = dir_size(&self.path);
            info!(
                "Clearing cache {:?} ({:.2} MB)",
                self.path,
                bytes as f64 / (1024.0 * 1024.0)
            );
            if let Err(e) = fs::remove_dir_all(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to clear cache {:?}: {}", self.path, e);
                }
            }
        }

        if let Err(e) = fs::create_dir_all(&self.path) {
            warn!("Failed to recreate cache {:?}: {}", self.path, e);
        }
        sys::release_memory();
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
