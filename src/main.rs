use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use manim_heal::config::{Config, ENV_RENDER_URL};
use manim_heal::job::GenerationOptions;
use manim_heal::llm::OpenAiProvider;
use manim_heal::pipeline::validate::{validate, SeverityCounts};
use manim_heal::render::HttpRenderExecutor;
use manim_heal::store::{JobStore, MemoryJobStore, RestJobStore};
use manim_heal::{create_safe_fallback_scene, SelfHealingPipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "manim-heal",
    about = "Generate render-verified Manim scenes with automatic repair",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one generation job against the configured services
    Run(RunArgs),
    /// Print the dependency-free fallback scene for a prompt
    Fallback(OptionArgs),
    /// Show the config file, updating any settings given
    Config(ConfigArgs),
    /// Statically check a Manim source file
    Validate {
        file: PathBuf,
        /// Treat the scene as narrated with this voice style
        #[arg(long)]
        voice_style: Option<String>,
    },
}

#[derive(Args, Debug)]
struct OptionArgs {
    /// Free-text animation request
    #[arg(short, long)]
    prompt: String,

    #[arg(short, long)]
    title: Option<String>,

    /// Target duration in seconds
    #[arg(short, long, default_value = "8")]
    duration: u32,

    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,

    #[arg(long, default_value = "720p")]
    resolution: String,

    #[arg(long, default_value = "auto")]
    style: String,

    /// Request narration
    #[arg(long)]
    voiceover: bool,

    #[arg(long)]
    voice_style: Option<String>,
}

impl OptionArgs {
    fn into_options(self) -> GenerationOptions {
        let mut options = GenerationOptions::new(self.prompt)
            .with_duration(self.duration)
            .with_voiceover(self.voiceover);
        if let Some(title) = self.title {
            options = options.with_title(title);
        }
        options.aspect_ratio = self.aspect_ratio;
        options.resolution = self.resolution;
        options.style = self.style;
        if self.voice_style.is_some() {
            options.voice_style = self.voice_style;
        }
        options
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    options: OptionArgs,

    /// Job id (generated when omitted)
    #[arg(long)]
    job_id: Option<String>,

    /// Where the renderer uploads the video
    #[arg(long)]
    upload_target: String,

    /// Overrides the configured retry budget
    #[arg(long)]
    max_retries: Option<usize>,

    /// Keep job updates in memory instead of the configured store
    #[arg(long)]
    dry_store: bool,

    /// Also write the JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Non-secret settings; keys and tokens come from the environment.
#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    render_url: Option<String>,

    #[arg(long)]
    store_url: Option<String>,

    #[arg(long)]
    store_table: Option<String>,

    #[arg(long)]
    primary_model: Option<String>,

    #[arg(long)]
    fallback_model: Option<String>,

    #[arg(long)]
    max_retries: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manim_heal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Fallback(args) => {
            print!("{}", create_safe_fallback_scene(&args.into_options()));
            Ok(())
        }
        Command::Config(args) => update_config(args),
        Command::Validate { file, voice_style } => validate_file(&file, voice_style.as_deref()),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = Config::load();
    let options = args.options.into_options();
    options.validate().context("invalid generation options")?;

    let Some(render_url) = config.render_url.clone() else {
        bail!(
            "no render endpoint configured (set {} or render_url in {})",
            ENV_RENDER_URL,
            Config::config_location()
        );
    };

    let provider = Arc::new(OpenAiProvider::new(config.openai_settings())?);
    let renderer = Arc::new(HttpRenderExecutor::new(
        render_url,
        config.render_token.clone(),
        config.connect_timeout(),
    )?);
    let store: Arc<dyn JobStore> = match config.rest_store_settings() {
        Some(settings) if !args.dry_store => Arc::new(RestJobStore::new(settings)?),
        _ => {
            tracing::info!("using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    let job_id = args
        .job_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let max_retries = args.max_retries.unwrap_or(config.max_retries);

    let pipeline = SelfHealingPipeline::new(provider, renderer, store);
    let report = pipeline
        .run_job(&options, &job_id, &args.upload_target, max_retries)
        .await;

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = args.report {
        std::fs::write(&path, &json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    println!("{}", json);

    if !report.result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn update_config(args: ConfigArgs) -> Result<()> {
    let mut config = Config::load_file();
    let mut changed = false;
    let mut set = |field: &mut String, value: Option<String>| {
        if let Some(value) = value {
            *field = value;
            changed = true;
        }
    };
    set(&mut config.store_table, args.store_table);
    set(&mut config.primary_model, args.primary_model);
    set(&mut config.fallback_model, args.fallback_model);
    if args.render_url.is_some() {
        config.render_url = args.render_url;
        changed = true;
    }
    if args.store_url.is_some() {
        config.store_url = args.store_url;
        changed = true;
    }
    if let Some(max_retries) = args.max_retries {
        if max_retries == 0 {
            bail!("max retries must be at least 1");
        }
        config.max_retries = max_retries;
        changed = true;
    }

    if changed {
        config.save().context("failed to save config")?;
        eprintln!("Saved {}", Config::config_location());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn validate_file(file: &Path, voice_style: Option<&str>) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let issues = validate(&code, voice_style);
    for issue in &issues {
        println!("{}", issue);
    }
    let counts = SeverityCounts::from_issues(&issues);
    println!("{}", counts);
    if counts.critical > 0 {
        std::process::exit(2);
    }
    Ok(())
}
