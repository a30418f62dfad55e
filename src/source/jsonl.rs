//! Local JSON-lines datasets laid out as `<root>/<config>/<split>.jsonl`.

use super::{AudioLocator, DatasetSource, OpenedDataset, Record, RowStream, SourceError};
use crate::config::LanguageSpec;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

const SPLIT_EXTENSION: &str = "jsonl";

pub struct JsonlSource {
    root: PathBuf,
}

impl JsonlSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DatasetSource for JsonlSource {
    fn open(&self, language: &LanguageSpec) -> Result<Box<dyn OpenedDataset + '_>, SourceError> {
        let dir = self.root.join(&language.name);
        if !dir.is_dir() {
            return Err(SourceError::ConfigNotFound {
                dataset: self.root.display().to_string(),
                config: language.name.clone(),
            });
        }

        let mut splits: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(SPLIT_EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        splits.sort();

        Ok(Box::new(JsonlDataset { dir, splits }))
    }
}

struct JsonlDataset {
    dir: PathBuf,
    splits: Vec<String>,
}

impl AudioLocator for JsonlDataset {
    /// Relative references resolve against the language directory
    fn materialize(&self, reference: &str) -> Result<PathBuf, SourceError> {
        let path = Path::new(reference);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        };
        if path.is_file() {
            Ok(path)
        } else {
            Err(SourceError::Resource(reference.to_string()))
        }
    }
}

impl OpenedDataset for JsonlDataset {
    fn splits(&self) -> &[String] {
        &self.splits
    }

    fn rows(&self, split: &str) -> Result<RowStream<'_>, SourceError> {
        if !self.splits.iter().any(|s| s == split) {
            return Err(SourceError::UnknownSplit(split.to_string()));
        }

        let path = self.dir.join(format!("{split}.{SPLIT_EXTENSION}"));
        let reader = BufReader::new(File::open(&path)?);

        let rows = reader
            .lines()
            .enumerate()
            .filter_map(move |(line_num, line)| match line {
                Err(e) => Some(Err(SourceError::Io(e))),
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match serde_json::from_str::<Record>(&line) {
                    Ok(record) => Some(Ok(record)),
                    Err(e) => {
                        warn!("Skipping malformed record at {:?}:{}: {}", path, line_num + 1, e);
                        None
                    }
                },
            });

        Ok(RowStream::new(None, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language(name: &str) -> LanguageSpec {
        LanguageSpec::new(name, "xx", 1.0)
    }

    #[test]
    fn test_open_lists_splits() {
        let dir = tempfile::tempdir().unwrap();
        let hindi = dir.path().join("Hindi");
        fs::create_dir_all(&hindi).unwrap();
        fs::write(hindi.join("valid.jsonl"), "").unwrap();
        fs::write(hindi.join("train.jsonl"), "").unwrap();
        fs::write(hindi.join("notes.txt"), "").unwrap();

        let source = JsonlSource::new(dir.path());
        let dataset = source.open(&language("Hindi")).unwrap();
        assert_eq!(dataset.splits(), ["train", "valid"]);

        assert!(matches!(
            source.open(&language("Tamil")),
            Err(SourceError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_rows_skip_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let hindi = dir.path().join("Hindi");
        fs::create_dir_all(&hindi).unwrap();
        fs::write(
            hindi.join("train.jsonl"),
            "{\"text\": \"a\"}\n\nnot json\n{\"text\": \"b\"}\n",
        )
        .unwrap();

        let source = JsonlSource::new(dir.path());
        let dataset = source.open(&language("Hindi")).unwrap();
        let texts: Vec<String> = dataset
            .rows("train")
            .unwrap()
            .map(|r| r.unwrap()["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(dataset.rows("test").is_err());
    }

    #[test]
    fn test_materialize_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let hindi = dir.path().join("Hindi");
        fs::create_dir_all(hindi.join("clips")).unwrap();
        fs::write(hindi.join("clips/one.wav"), b"x").unwrap();

        let source = JsonlSource::new(dir.path());
        let dataset = source.open(&language("Hindi")).unwrap();
        assert_eq!(
            dataset.materialize("clips/one.wav").unwrap(),
            hindi.join("clips/one.wav")
        );
        assert!(dataset.materialize("clips/two.wav").is_err());
    }
}
