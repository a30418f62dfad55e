//! Hugging Face datasets-server source.
//!
//! Splits come from the `/splits` endpoint and records are paged through
//! `/rows`, so nothing is downloaded ahead of consumption. Audio cells point
//! at hosted assets which are fetched into the cache region on demand.

use super::{AudioLocator, DatasetSource, OpenedDataset, Record, RowStream, SourceError};
use crate::config::LanguageSpec;
use reqwest::blocking::Client;
use serde_json::Value;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DATASETS_SERVER: &str = "https://datasets-server.huggingface.co";

/// Largest page the rows endpoint serves
const PAGE_LENGTH: u64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Extra attempts for a page fetch that failed transiently
const PAGE_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct HubSource {
    client: Client,
    dataset: String,
    token: String,
    cache_dir: PathBuf,
}

impl HubSource {
    pub fn new(
        dataset: impl Into<String>,
        token: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("speakerbank/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            dataset: dataset.into(),
            token: token.into(),
            cache_dir: cache_dir.into(),
        })
    }

    fn get_json(&self, route: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{DATASETS_SERVER}/{route}");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json()?)
    }

    fn fetch_page(
        &self,
        config: &str,
        split: &str,
        offset: u64,
    ) -> Result<(Vec<Record>, Option<u64>), SourceError> {
        let body = self.get_json(
            "rows",
            &[
                ("dataset", self.dataset.clone()),
                ("config", config.to_string()),
                ("split", split.to_string()),
                ("offset", offset.to_string()),
                ("length", PAGE_LENGTH.to_string()),
            ],
        )?;
        parse_rows_page(&body)
    }

    /// Download a hosted asset into the cache, reusing an earlier download
    fn download(&self, url: &str) -> Result<PathBuf, SourceError> {
        let path = self.cache_dir.join("assets").join(asset_file_name(url));
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let response = self.client.get(url).bearer_auth(&self.token).send()?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes()?;

        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        fs::rename(&temp_path, &path)?;

        debug!("Fetched {} bytes into {:?}", bytes.len(), path);
        Ok(path)
    }
}

impl DatasetSource for HubSource {
    fn open(&self, language: &LanguageSpec) -> Result<Box<dyn OpenedDataset + '_>, SourceError> {
        let body = self.get_json("splits", &[("dataset", self.dataset.clone())])?;
        let splits = parse_splits(&body, &language.name)?;
        if splits.is_empty() {
            return Err(SourceError::ConfigNotFound {
                dataset: self.dataset.clone(),
                config: language.name.clone(),
            });
        }

        Ok(Box::new(HubDataset {
            source: self,
            config: language.name.clone(),
            splits,
        }))
    }
}

struct HubDataset<'a> {
    source: &'a HubSource,
    config: String,
    splits: Vec<String>,
}

impl AudioLocator for HubDataset<'_> {
    fn materialize(&self, reference: &str) -> Result<PathBuf, SourceError> {
        if reference.starts_with("https://") || reference.starts_with("http://") {
            return self.source.download(reference);
        }
        let path = Path::new(reference);
        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(SourceError::Resource(reference.to_string()))
        }
    }
}

impl OpenedDataset for HubDataset<'_> {
    fn splits(&self) -> &[String] {
        &self.splits
    }

    fn rows(&self, split: &str) -> Result<RowStream<'_>, SourceError> {
        if !self.splits.iter().any(|s| s == split) {
            return Err(SourceError::UnknownSplit(split.to_string()));
        }

        let mut pages = RowPages {
            source: self.source,
            config: &self.config,
            split: split.to_string(),
            offset: 0,
            total: None,
            buffer: VecDeque::new(),
            done: false,
        };
        // The first page is fetched eagerly so a broken split fails here
        pages.fetch()?;
        info!(
            "Streaming {}/{} ({} rows)",
            self.config,
            split,
            pages.total.map_or("unknown".to_string(), |t| t.to_string())
        );

        Ok(RowStream::new(pages.total, pages))
    }
}

struct RowPages<'a> {
    source: &'a HubSource,
    config: &'a str,
    split: String,
    offset: u64,
    total: Option<u64>,
    buffer: VecDeque<Record>,
    done: bool,
}

impl RowPages<'_> {
    fn fetch(&mut self) -> Result<(), SourceError> {
        let (rows, total) = with_retries(PAGE_RETRIES, RETRY_DELAY, || {
            self.source.fetch_page(self.config, &self.split, self.offset)
        })?;
        if total.is_some() {
            self.total = total;
        }

        self.offset += rows.len() as u64;
        if rows.is_empty() || self.total.is_some_and(|t| self.offset >= t) {
            self.done = true;
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for RowPages<'_> {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// Run `op`, retrying transient failures up to `retries` more times with a
/// doubling delay
fn with_retries<T>(
    retries: u32,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    let mut retries_left = retries;
    let mut delay = delay;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if retries_left > 0 && e.is_transient() => {
                retries_left -= 1;
                warn!(
                    "Page fetch failed ({}), retrying in {}ms ({} retries left)",
                    e,
                    delay.as_millis(),
                    retries_left
                );
                thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Split names of one config from a `/splits` response, in response order
fn parse_splits(body: &Value, config: &str) -> Result<Vec<String>, SourceError> {
    let entries = body
        .get("splits")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("missing 'splits' array".into()))?;

    let mut splits: Vec<String> = Vec::new();
    for entry in entries {
        if entry.get("config").and_then(Value::as_str) != Some(config) {
            continue;
        }
        if let Some(split) = entry.get("split").and_then(Value::as_str) {
            if !splits.iter().any(|s| s == split) {
                splits.push(split.to_string());
            }
        }
    }
    Ok(splits)
}

/// Records and total row count from a `/rows` response
fn parse_rows_page(body: &Value) -> Result<(Vec<Record>, Option<u64>), SourceError> {
    let rows = body
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("missing 'rows' array".into()))?;

    let records = rows
        .iter()
        .map(|item| match item.get("row") {
            Some(Value::Object(row)) => Ok(row.clone()),
            _ => Err(SourceError::Malformed("row entry without 'row' object".into())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let total = body.get("num_rows_total").and_then(Value::as_u64);
    Ok((records, total))
}

/// Stable cache file name for an asset URL, keeping its extension
fn asset_file_name(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");

    format!("{:016x}.{}", hasher.finish(), extension)
}
