use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use storyreel::{server, FfmpegRunner, RenderConfig, RenderPipeline, RenderRequest};

#[derive(Debug, Parser)]
#[command(name = "storyreel", version)]
#[command(about = "Render scene stills, voice-over and timing into a crossfaded slideshow video")]
struct Cli {
    /// YAML render configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding per-session workspaces.
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,
    /// Explicit ffmpeg binary, overriding the configured mode.
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one request file and print the response JSON.
    Render {
        #[arg(long)]
        request: PathBuf,
    },
    /// Serve the render and download API over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3001")]
        bind: SocketAddr,
    },
    /// Check that the encoder binary can run.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storyreel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref(), cli.output_root, cli.ffmpeg)?;
    let runner = FfmpegRunner::resolve(config.ffmpeg.mode, config.ffmpeg.path.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("STORYREEL_GIT_HASH").unwrap_or("unknown"),
        ffmpeg = %runner.binary().display(),
        "storyreel starting"
    );
    let pipeline = RenderPipeline::new(config, runner)?;

    match cli.command {
        Commands::Render { request } => run_render(&pipeline, &request).await,
        Commands::Serve { bind } => {
            server::serve(Arc::new(pipeline), bind).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => run_check(&pipeline).await,
    }
}

fn load_config(
    path: Option<&Path>,
    output_root: Option<PathBuf>,
    ffmpeg: Option<PathBuf>,
) -> Result<RenderConfig> {
    let mut config = match path {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(root) = output_root {
        config.output_root = root;
    }
    if let Some(binary) = ffmpeg {
        config.ffmpeg.path = Some(binary);
    }
    config.validate()?;
    Ok(config)
}

async fn run_render(pipeline: &RenderPipeline<FfmpegRunner>, request_path: &Path) -> Result<ExitCode> {
    let raw = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("failed to read request {}", request_path.display()))?;
    let request: RenderRequest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse request {}", request_path.display()))?;

    match pipeline.render(request).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            println!("{}", serde_json::to_string_pretty(&error.envelope())?);
            Ok(if error.is_rejection() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn run_check(pipeline: &RenderPipeline<FfmpegRunner>) -> Result<ExitCode> {
    let status = pipeline.encoder_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(if status.installed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
