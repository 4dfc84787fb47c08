use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xliff_translate::model::config::DEFAULT_CONTEXT_FILE;
use xliff_translate::services::batcher::DEFAULT_BATCH_SIZE;
use xliff_translate::services::pipeline::log_summary;
use xliff_translate::{
    AppContext, ChatClient, LlmSettings, Pipeline, PromptTemplates, Provider, RunConfig,
    RunSummary, SelectionMode, TranslateOptions,
};

#[derive(Parser)]
#[command(
    name = "xliff-translate",
    version,
    about = "Fill missing XLIFF translations with an LLM"
)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "folder"])))]
struct Cli {
    /// Single XLIFF file to translate in place
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Export folder holding one `<lang>.xcloc` bundle per language
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Target language of `--input`
    #[arg(short, long, required_unless_present = "folder")]
    target_language: Option<String>,

    /// Only these languages of `--folder` (comma separated)
    #[arg(short, long, value_delimiter = ',', requires = "folder")]
    languages: Option<Vec<String>>,

    /// App context YAML [default: app_context.yaml]
    #[arg(short, long)]
    context_file: Option<PathBuf>,

    /// Prompt templates YAML [default: prompts.yaml, then prompts.example.yaml]
    #[arg(short, long)]
    prompts_file: Option<PathBuf>,

    /// Retranslate every unit, not only missing or flagged ones
    #[arg(short = 'a', long)]
    translate_all: bool,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, value_enum, default_value_t = Provider::Anthropic)]
    provider: Provider,

    /// Model name [default: depends on the provider]
    #[arg(long)]
    model: Option<String>,

    /// API key [default: read from the provider's environment variable]
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    max_retries: Option<usize>,

    /// Write a JSON report of every file's outcome here
    #[arg(long)]
    report: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let templates = PromptTemplates::load(cli.prompts_file.as_deref())?;

    let context = match &cli.context_file {
        Some(path) => AppContext::load(path, true)?,
        None => AppContext::load(Path::new(DEFAULT_CONTEXT_FILE), false)?,
    };

    let options = TranslateOptions {
        mode: if cli.translate_all {
            SelectionMode::TranslateAll
        } else {
            SelectionMode::Default
        },
        batch_size: cli.batch_size,
        ..TranslateOptions::default()
    };

    Ok(RunConfig::new(templates, context, options)?)
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let config = load_config(cli)?;

    let mut settings = LlmSettings::new(cli.provider, cli.model.clone(), cli.api_key.clone())?;
    if let Some(n) = cli.max_retries {
        settings.max_retries = n;
    }
    info!(provider = %settings.provider, model = %settings.model, "using translation backend");

    let client = ChatClient::new(settings)?;
    let mut pipeline = Pipeline::new(&config, &client);

    if let Some(folder) = &cli.folder {
        let summary = pipeline
            .translate_export(folder, cli.languages.as_deref())
            .with_context(|| format!("cannot process export folder {}", folder.display()))?;
        return Ok(summary);
    }

    let input = cli.input.as_deref().context("either --input or --folder is required")?;
    let language = cli
        .target_language
        .as_deref()
        .context("--target-language is required with --input")?;

    let summary = RunSummary {
        results: vec![pipeline.translate_file(input, language)],
    };
    log_summary(&summary);
    Ok(summary)
}

fn write_report(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("cannot write report {}", path.display()))?;
    info!(report = %path.display(), "report written");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let summary = match run(&cli) {
        Ok(s) => s,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &cli.report {
        if let Err(e) = write_report(path, &summary) {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    }

    if summary.any_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
