//! Streaming dataset sources.
//!
//! A source opens one language at a time. An opened dataset lists its splits,
//! streams each split's records lazily in source order, and can make audio
//! resources referenced by a record available as local files.

pub mod hub;
pub mod jsonl;

pub use hub::HubSource;
pub use jsonl::JsonlSource;

use crate::config::LanguageSpec;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// One raw record; its shape depends on the source
pub type Record = serde_json::Map<String, Value>;

/// Split that is always streamed first when present
pub const PRIMARY_SPLIT: &str = "train";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Config {config} not found in {dataset}")]
    ConfigNotFound { dataset: String, config: String },
    #[error("Unsupported split: {0}")]
    UnknownSplit(String),
    #[error("Cannot resolve resource {0}")]
    Resource(String),
}

impl SourceError {
    /// Failures worth retrying: timeouts, dropped connections, throttling
    /// and server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => e.is_timeout() || e.is_connect(),
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Turns a resource reference found in a record into a local file
pub trait AudioLocator {
    fn materialize(&self, reference: &str) -> Result<PathBuf, SourceError>;
}

pub trait DatasetSource {
    /// Open the dataset config for one language
    fn open(&self, language: &LanguageSpec) -> Result<Box<dyn OpenedDataset + '_>, SourceError>;
}

pub trait OpenedDataset: AudioLocator {
    /// Split names in discovery order
    fn splits(&self) -> &[String];

    /// Start streaming a split from its beginning
    fn rows(&self, split: &str) -> Result<RowStream<'_>, SourceError>;
}

/// Lazy, finite, non-restartable sequence of records
pub struct RowStream<'a> {
    len_hint: Option<u64>,
    rows: Box<dyn Iterator<Item = Result<Record, SourceError>> + 'a>,
}

impl<'a> RowStream<'a> {
    pub fn new(
        len_hint: Option<u64>,
        rows: impl Iterator<Item = Result<Record, SourceError>> + 'a,
    ) -> Self {
        Self {
            len_hint,
            rows: Box::new(rows),
        }
    }

    /// Total number of records when the source reports it
    pub fn len_hint(&self) -> Option<u64> {
        self.len_hint
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// `train` first, then every other split in discovery order
pub fn ordered_splits(discovered: &[String]) -> Vec<String> {
    let mut ordered = Vec::with_capacity(discovered.len());
    if discovered.iter().any(|s| s == PRIMARY_SPLIT) {
        ordered.push(PRIMARY_SPLIT.to_string());
    }
    for split in discovered {
        if split != PRIMARY_SPLIT && !ordered.contains(split) {
            ordered.push(split.clone());
        }
    }
    ordered
}
