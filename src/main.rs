mod acquire;
mod audio;
mod config;
mod corpus;
mod prune;
mod source;
mod sys;

use acquire::{CacheRegion, Orchestrator};
use anyhow::{Context as _, Result, ensure};
use clap::{Parser, Subcommand, ValueEnum};
use config::{AcquireSettings, LabelFormat, LanguageSpec};
use dotenvy::dotenv;
use source::{DatasetSource, HubSource, JsonlSource};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Speakerbank - multilingual speech corpus builder
///
/// Streams transcribed speech from a dataset source into per-speaker
/// directories of `.wav`/`.lab` pairs, bounded by an hours quota per language.
#[derive(Parser, Debug)]
#[command(name = "speakerbank", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a corpus from a dataset source
    Acquire(AcquireArgs),
    /// Delete utterances shorter than a threshold, with their labels
    Prune(PruneArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    /// Hugging Face datasets-server (needs HUGGINGFACE_TOKEN)
    Hub,
    /// Local `<root>/<Language>/<split>.jsonl` files
    Jsonl,
}

#[derive(clap::Args, Debug)]
struct AcquireArgs {
    #[arg(long, value_enum, default_value_t = SourceKind::Hub)]
    source: SourceKind,

    /// Dataset id on the hub
    #[arg(long, default_value = config::DEFAULT_DATASET)]
    dataset: String,

    /// Root of the local JSONL dataset (required with --source jsonl)
    #[arg(long, value_name = "DIR")]
    jsonl_root: Option<PathBuf>,

    /// Output corpus root
    #[arg(long, default_value = "./data-raw")]
    corpus_root: PathBuf,

    /// Scratch directory for downloaded data
    #[arg(long, default_value = "./dataset_cache")]
    cache_dir: PathBuf,

    /// Built-in languages to process, in order (default: all)
    #[arg(long, value_delimiter = ',', conflicts_with = "languages_file")]
    languages: Vec<String>,

    /// JSON array of {name, code, target_hours}
    #[arg(long, value_name = "PATH")]
    languages_file: Option<PathBuf>,

    /// Quota per built-in language, in hours
    #[arg(long, default_value_t = config::DEFAULT_TARGET_HOURS)]
    target_hours: f64,

    /// Samples shorter than this are skipped
    #[arg(long, default_value_t = config::MIN_SAMPLE_SECS)]
    min_sample_secs: f64,

    /// Remaining quota below which an overshooting sample ends the split
    #[arg(long, default_value_t = config::QUOTA_MARGIN_SECS)]
    quota_margin_secs: f64,

    #[arg(long, value_enum, default_value_t = LabelFormat::Compact)]
    label_format: LabelFormat,

    /// Write the run summary as JSON to this path
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct PruneArgs {
    #[arg(long, default_value = "./data-raw")]
    corpus_root: PathBuf,

    #[arg(long, default_value_t = config::MIN_PRUNE_SECS)]
    min_duration_secs: f64,

    /// Report what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,
}

impl AcquireArgs {
    fn language_specs(&self) -> Result<Vec<LanguageSpec>> {
        let languages = match &self.languages_file {
            Some(path) => config::languages_from_file(path)?,
            None => config::builtin_languages(&self.languages, self.target_hours)?,
        };
        ensure!(!languages.is_empty(), "No languages to process");
        Ok(languages)
    }

    fn settings(&self, corpus_root: PathBuf) -> Result<AcquireSettings> {
        ensure!(
            self.min_sample_secs >= 0.0,
            "Minimum sample length must not be negative"
        );
        ensure!(
            self.quota_margin_secs >= 0.0,
            "Quota margin must not be negative"
        );
        Ok(AcquireSettings {
            corpus_root,
            min_sample_secs: self.min_sample_secs,
            quota_margin_secs: self.quota_margin_secs,
            label_format: self.label_format,
        })
    }
}

fn main() -> Result<()> {
    dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Acquire(args) => run_acquire(args),
        Command::Prune(args) => run_prune(args),
    }
}

fn run_acquire(args: AcquireArgs) -> Result<()> {
    let languages = args.language_specs()?;
    let token = match args.source {
        SourceKind::Hub => {
            let token = config::load_token()?;
            info!("Token loaded: {}", config::token_preview(&token));
            Some(token)
        }
        SourceKind::Jsonl => None,
    };

    let cache = CacheRegion::create(&args.cache_dir)
        .with_context(|| format!("Failed to create cache directory {:?}", args.cache_dir))?;
    // The hub source downloads into the same directory the cache region wipes
    let source: Box<dyn DatasetSource> = match token {
        Some(token) => Box::new(HubSource::new(&args.dataset, token, cache.path())?),
        None => {
            let root = args
                .jsonl_root
                .as_ref()
                .context("--jsonl-root is required with --source jsonl")?;
            Box::new(JsonlSource::new(root))
        }
    };

    let corpus_root = corpus::prepare_root(&args.corpus_root)
        .with_context(|| format!("Corpus root {:?} is not writable", args.corpus_root))?;
    let settings = args.settings(corpus_root)?;

    info!(
        "Acquiring {} language(s) into {:?}",
        languages.len(),
        settings.corpus_root
    );
    let summary = Orchestrator::new(&*source, &cache, &settings).run(&languages);
    summary.log();

    if let Some(path) = &args.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write summary to {path:?}"))?;
        info!("Summary written to {:?}", path);
    }
    Ok(())
}

fn run_prune(args: PruneArgs) -> Result<()> {
    ensure!(
        args.min_duration_secs > 0.0,
        "Minimum duration must be positive, got: {}",
        args.min_duration_secs
    );
    let report =
        prune::prune_short_files(&args.corpus_root, args.min_duration_secs, args.dry_run)?;
    report.log();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_acquire() {
        let cli = Cli::try_parse_from([
            "speakerbank",
            "acquire",
            "--source",
            "jsonl",
            "--jsonl-root",
            "/tmp/src",
            "--languages",
            "Hindi,Tamil",
            "--target-hours",
            "2",
            "--label-format",
            "spaced",
        ])
        .unwrap();

        let Command::Acquire(args) = cli.command else {
            panic!("expected acquire");
        };
        assert_eq!(args.source, SourceKind::Jsonl);
        assert_eq!(args.label_format, LabelFormat::Spaced);
        let languages = args.language_specs().unwrap();
        assert_eq!(languages.len(), 2);
        assert_eq!(languages[1].code, "ta");
        assert_eq!(languages[0].target_secs(), 7200.0);
    }

    #[test]
    fn test_cli_prune_defaults() {
        let cli = Cli::try_parse_from(["speakerbank", "prune", "--dry-run"]).unwrap();
        let Command::Prune(args) = cli.command else {
            panic!("expected prune");
        };
        assert!(args.dry_run);
        assert_eq!(args.min_duration_secs, 1.0);
        assert_eq!(args.corpus_root, PathBuf::from("./data-raw"));
    }
}
