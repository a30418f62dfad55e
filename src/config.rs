use crate::corpus::is_path_safe;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the Hugging Face access token
pub const TOKEN_ENV_VAR: &str = "HUGGINGFACE_TOKEN";

/// Default dataset on the Hugging Face hub
pub const DEFAULT_DATASET: &str = "ai4bharat/indicvoices_r";

/// Samples shorter than this are never ingested (in seconds)
pub const MIN_SAMPLE_SECS: f64 = 0.5;
/// Pruning removes utterances shorter than this (in seconds)
pub const MIN_PRUNE_SECS: f64 = 1.0;
/// Once less than this remains toward a quota, the current split is abandoned
pub const QUOTA_MARGIN_SECS: f64 = 10.0;
pub const DEFAULT_TARGET_HOURS: f64 = 200.0;

/// Display name to language code, in processing order
pub const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("Hindi", "hi"),
    ("Marathi", "mr"),
    ("Tamil", "ta"),
    ("Telugu", "te"),
    ("Malayalam", "ml"),
    ("Kannada", "kn"),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not found in environment; add it to .env as {0}=your_token_here")]
    MissingCredential(&'static str),
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),
    #[error("Invalid language {field} {value:?}: {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("Invalid target of {hours}h for {language}")]
    InvalidTarget { language: String, hours: f64 },
    #[error("Failed to read languages file {path:?}: {source}")]
    LanguagesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse languages file: {0}")]
    LanguagesParse(#[from] serde_json::Error),
}

/// One language to acquire, as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Display name, also used as the dataset config name and bucket prefix
    pub name: String,
    /// Short code used in the label markup
    pub code: String,
    pub target_hours: f64,
}

impl LanguageSpec {
    pub fn new(name: impl Into<String>, code: impl Into<String>, target_hours: f64) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            target_hours,
        }
    }

    pub fn target_secs(&self) -> f64 {
        self.target_hours * 3600.0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, value: &str, reason| ConfigError::InvalidName {
            field,
            value: value.to_string(),
            reason,
        };
        if !is_path_safe(&self.name) {
            return Err(invalid("name", &self.name, "must be a non-empty path-safe token"));
        }
        // `_` separates language and speaker in bucket names
        if self.name.contains('_') {
            return Err(invalid("name", &self.name, "must not contain '_'"));
        }
        if !is_path_safe(&self.code) {
            return Err(invalid("code", &self.code, "must be a non-empty path-safe token"));
        }
        if !self.target_hours.is_finite() || self.target_hours <= 0.0 {
            return Err(ConfigError::InvalidTarget {
                language: self.name.clone(),
                hours: self.target_hours,
            });
        }
        Ok(())
    }
}

/// How the transcript is wrapped in the language-code markup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    /// `<hi>text</hi>`
    #[default]
    Compact,
    /// `<hi> text </hi>`
    Spaced,
}

impl LabelFormat {
    pub fn render(&self, code: &str, text: &str) -> String {
        match self {
            LabelFormat::Compact => format!("<{code}>{text}</{code}>"),
            LabelFormat::Spaced => format!("<{code}> {text} </{code}>"),
        }
    }
}

/// Everything the orchestrator needs besides the source itself
#[derive(Debug, Clone)]
pub struct AcquireSettings {
    pub corpus_root: PathBuf,
    pub min_sample_secs: f64,
    pub quota_margin_secs: f64,
    pub label_format: LabelFormat,
}

impl AcquireSettings {
    pub fn new(corpus_root: impl Into<PathBuf>) -> Self {
        Self {
            corpus_root: corpus_root.into(),
            min_sample_secs: MIN_SAMPLE_SECS,
            quota_margin_secs: QUOTA_MARGIN_SECS,
            label_format: LabelFormat::default(),
        }
    }
}

/// Read the access token, failing if it is missing or blank
pub fn load_token() -> Result<String, ConfigError> {
    token_from(std::env::var(TOKEN_ENV_VAR).ok())
}

fn token_from(value: Option<String>) -> Result<String, ConfigError> {
    match value.map(|v| v.trim().to_string()) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ConfigError::MissingCredential(TOKEN_ENV_VAR)),
    }
}

/// Short prefix of a token that is safe to log
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(10).collect();
    format!("{prefix}...")
}

/// Build language specs from the built-in table
///
/// An empty selection means every built-in language, in table order.
/// Otherwise the selection order is kept.
pub fn builtin_languages(
    selection: &[String],
    target_hours: f64,
) -> Result<Vec<LanguageSpec>, ConfigError> {
    let languages: Vec<LanguageSpec> = if selection.is_empty() {
        DEFAULT_LANGUAGES
            .iter()
            .map(|(name, code)| LanguageSpec::new(*name, *code, target_hours))
            .collect()
    } else {
        selection
            .iter()
            .map(|wanted| {
                DEFAULT_LANGUAGES
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(wanted.trim()))
                    .map(|(name, code)| LanguageSpec::new(*name, *code, target_hours))
                    .ok_or_else(|| ConfigError::UnknownLanguage(wanted.clone()))
            })
            .collect::<Result<_, _>>()?
    };

    for language in &languages {
        language.validate()?;
    }
    Ok(languages)
}

/// Load language specs from a JSON array of `{name, code, target_hours}`
pub fn languages_from_file(path: &Path) -> Result<Vec<LanguageSpec>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::LanguagesFile {
        path: path.to_path_buf(),
        source,
    })?;
    let languages: Vec<LanguageSpec> = serde_json::from_reader(BufReader::new(file))?;
    for language in &languages {
        language.validate()?;
    }
    Ok(languages)
}
