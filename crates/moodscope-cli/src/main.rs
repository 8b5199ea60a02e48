use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use moodscope_cache::open_cache;
use moodscope_core::{Analyzer, AppConfig};
use moodscope_model::create_classifier;
use moodscope_schema::AnalyzeRequest;
use moodscope_server::state::AppState;

#[derive(Parser)]
#[command(name = "moodscope", version, about = "Conversation semantic-analysis service")]
struct Cli {
    #[arg(
        long,
        default_value = "moodscope.yaml",
        help = "Config file (defaults are used when missing)"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP analysis server")]
    Start {
        #[arg(long, help = "Override the configured port")]
        port: Option<u16>,
        #[arg(long, help = "Load models before accepting traffic")]
        warmup: bool,
    },
    #[command(about = "Analyze one conversation from a JSON file (or stdin) and print the result")]
    Analyze {
        #[arg(help = "Request file; stdin when omitted")]
        file: Option<PathBuf>,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Start { port, warmup } => start(config, port, warmup).await,
        Commands::Analyze { file } => analyze_once(config, file).await,
        Commands::Validate => {
            config.validate()?;
            println!("config ok");
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
    } else {
        tracing::info!("no config at {}, using defaults", path.display());
        Ok(AppConfig::default())
    }
}

fn build_analyzer(config: &AppConfig) -> Result<Analyzer> {
    let classifier = create_classifier(&config.model)?;
    let cache = open_cache(&config.cache);
    Ok(Analyzer::new(classifier, cache, config))
}

async fn start(config: AppConfig, port: Option<u16>, warmup: bool) -> Result<()> {
    let analyzer = Arc::new(build_analyzer(&config)?);

    if warmup {
        analyzer
            .warm_up()
            .await
            .context("warm-up failed, refusing to serve")?;
    } else {
        tracing::info!("models load lazily on first request");
    }

    let port = port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    moodscope_server::serve(AppState::new(analyzer), &addr).await
}

async fn analyze_once(config: AppConfig, file: Option<PathBuf>) -> Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading request {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading request from stdin")?;
            buffer
        }
    };
    let request: AnalyzeRequest =
        serde_json::from_str(&raw).context("parsing analysis request")?;

    let analyzer = build_analyzer(&config)?;
    let response = analyzer.analyze(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
