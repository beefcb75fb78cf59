use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use lumen_core::GenerationRequest;
use lumen_generation::{DegradationController, EngineConfig, GenerationEngine, OpenAiCompatEngine};
use lumen_imaging::ImageResizer;
use lumen_report::{display_banner, echo_chunk, print_batch_totals};

mod inputs;
mod pipeline;

use inputs::{DEFAULT_PROMPT, collect_image_files, load_prompt_template};
use pipeline::Pipeline;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Aesthetic evaluation of photographs with a local vision-language model", long_about = None)]
struct Cli {
    /// Image file or directory of images to evaluate
    image_path: PathBuf,

    /// Base URL of the OpenAI-compatible API (overrides LUMEN_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Model identifier (overrides LUMEN_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Prompt text sent with every image
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// File holding the prompt between <prompt> and </prompt>
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Directory for reports
    #[arg(short, long, default_value = "./output")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = GenerationRequest::DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Longest image side handed to the model
    #[arg(long, default_value_t = GenerationRequest::DEFAULT_MAX_IMAGE_DIMENSION)]
    max_image_dimension: u32,

    /// Identical consecutive chunks that count as a stuck generation
    #[arg(long, default_value_t = GenerationRequest::DEFAULT_REPEAT_THRESHOLD)]
    repeat_threshold: usize,

    /// Images evaluated at the same time
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Do not echo generated text while it streams
    #[arg(long)]
    no_stream_echo: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install log subscriber: {}", e);
    }

    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "❌".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Run the whole batch and return the number of failed images
async fn run(cli: Cli) -> Result<usize> {
    if cli.concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let images = collect_image_files(&cli.image_path)?;
    if images.is_empty() {
        bail!("No supported images found in {}", cli.image_path.display());
    }

    let prompt = match (&cli.prompt, &cli.prompt_file) {
        (Some(prompt), _) => prompt.clone(),
        (None, Some(file)) => load_prompt_template(file)?,
        (None, None) => DEFAULT_PROMPT.to_string(),
    };

    let mut config = EngineConfig::from_env()?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    let endpoint = config.endpoint.clone();
    let engine = OpenAiCompatEngine::new(config)?;

    let template = GenerationRequest::new(PathBuf::new(), prompt)
        .with_max_tokens(cli.max_tokens)
        .with_temperature(cli.temperature)
        .with_max_image_dimension(cli.max_image_dimension)
        .with_repeat_threshold(cli.repeat_threshold);
    template.validate()?;

    display_banner(engine.model_id(), &endpoint);
    info!(images = images.len(), concurrency = cli.concurrency, "starting analysis");

    let mut controller = DegradationController::new(engine, ImageResizer::new());
    // Echo only when evaluations run one at a time.
    let echo = !cli.no_stream_echo && cli.concurrency == 1;
    if echo {
        controller = controller.with_chunk_observer(Arc::new(echo_chunk));
    }

    let pipeline = Pipeline::new(controller, template, cli.output_dir.clone()).with_progress(true);
    let summary = pipeline.run_batch(&images, cli.concurrency).await?;

    for failed in summary.evaluations.iter().filter(|e| !e.succeeded()) {
        println!("{} {}: {}", "⚠️".yellow(), failed.image.display(), failed.outcome);
    }
    println!("{} Reports saved to {}", "📄".cyan(), pipeline.output_dir().display());
    if let Some(path) = &summary.summary_path {
        println!("{} Summary saved to {}", "📄".cyan(), path.display());
    }
    print_batch_totals(summary.succeeded, summary.failed);

    Ok(summary.failed)
}
