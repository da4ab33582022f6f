//! CMS session client
//!
//! Command-line front end for the authenticated request pipeline:
//! 1. Loads config and the persisted credential pair
//! 2. Revalidates the stored session against the backend
//! 3. Runs one command (login, register, whoami, get, logout)

mod cli;
mod commands;
mod config;
mod error;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            cli.json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.backend.base_url,
        timeout_secs = config.backend.timeout_secs,
        credentials = %config.session.credentials_path.display(),
        "configuration loaded"
    );

    commands::run(config, cli.command).await
}
