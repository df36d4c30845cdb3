use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deskrelay::app::{self, AppState};
use deskrelay::config::{Config, Settings};
use deskrelay::server::Server;

/// Relay desktop-assistant requests to chat and text-to-image providers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider settings (API keys, endpoints, model, temperature)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// System prompt used for desktop-organize requests
    #[arg(long, default_value = "classify_prompt.txt")]
    prompt_file: PathBuf,

    /// Directory generated images are saved to
    #[arg(long, default_value = ".")]
    image_dir: PathBuf,

    /// Timeout for each provider call, in seconds
    #[arg(long, default_value_t = 120)]
    upstream_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(?config, "config loaded");

    if !args.prompt_file.exists() {
        warn!(
            path = %args.prompt_file.display(),
            "prompt file not found, organize requests will fail until it exists"
        );
    }

    let settings = Settings {
        prompt_path: args.prompt_file,
        image_dir: args.image_dir,
        upstream_timeout: Duration::from_secs(args.upstream_timeout),
    };
    let state = AppState::new(&config, &settings).context("building provider clients")?;

    let server = Server::bind(&args.bind).await?;
    server
        .run_until(app::router(Arc::new(state)), shutdown_signal())
        .await?;

    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
