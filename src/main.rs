//! perpbot - headless derivatives trading pipeline.
//!
//! Metrics are pushed via structured JSON logs to stdout, no HTTP
//! server, no incoming connections.
//!
//! # Usage
//! ```sh
//! perpbot start --env .env --config config.toml
//! ```
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! startup error.

use clap::{Parser, Subcommand};
use perpbot::application::system::Application;
use perpbot::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "perpbot", version, about = "Derivatives trading pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load configuration and run the pipeline until SIGINT/SIGTERM.
    Start {
        /// Path to a dotenv file (defaults to `.env` in the working directory).
        #[arg(long)]
        env: Option<PathBuf>,
        /// Path to a TOML config file, layered under environment variables.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let Command::Start { env, config } = cli.command;

    info!(version = env!("CARGO_PKG_VERSION"), "perpbot starting");

    let config = match Config::load(env.as_deref(), config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };
    info!(mode = ?config.mode, symbols = ?config.symbols, "configuration loaded");

    let observability_enabled = config.observability_enabled;

    let app = match Application::build(config).await {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to build application");
            return ExitCode::from(2);
        }
    };
    let metrics = app.metrics();

    let running = match app.start().await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to start application");
            return ExitCode::from(2);
        }
    };
    info!("pipeline running, press Ctrl+C to shut down");

    if observability_enabled {
        running.spawn_metrics_reporter(metrics, 60);
        info!("metrics reporter started (interval: 60s)");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return ExitCode::from(2);
    }
    info!("shutdown signal received");

    if let Err(e) = running.shutdown().await {
        error!(error = %e, "error during shutdown");
        return ExitCode::from(2);
    }

    ExitCode::from(0)
}
