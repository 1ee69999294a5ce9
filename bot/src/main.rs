//! briefbot binary: load config, build the Gemini backend, run the configured chat platform.

use std::path::PathBuf;
use std::process::ExitCode;

use briefbot_core::app::App;
use briefbot_core::config::{Config, Overrides};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "briefbot", version, about = "Chat bot relaying to Gemini, with a daily investment briefing")]
struct Cli {
    /// Path to settings.json (default: ./settings.json, optional).
    #[arg(long, env = "BRIEFBOT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Chat platform to connect to: discord or telegram.
    #[arg(long)]
    platform: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let overrides = Overrides { platform: cli.platform };

    let config = match Config::load(cli.settings.as_deref(), &overrides) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise Gemini backend");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Gemini backend initialised");

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "bot stopped");
            ExitCode::FAILURE
        }
    }
}
