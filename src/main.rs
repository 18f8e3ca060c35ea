use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories_next::ProjectDirs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pinbin::commands::{purge_expired, serve};
use pinbin::config::Config;
use pinbin::App;

#[derive(Debug, Parser)]
#[command(version, about = "A pastebin for one or more text files")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the web interface.
    Serve,
    /// Delete every paste past its expiry date. Meant to be run from cron.
    PurgeExpired,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    info!("using config file {}", config_path.display());

    let config = Config::load(&config_path)
        .await
        .context("failed to load config")?;
    let app = App::new(config).await.context("failed to start")?;

    match args.command {
        Command::Serve => serve::run(app).await,
        Command::PurgeExpired => purge_expired::run(app).await,
    }
}

/// `config.toml` in the platform config directory if one exists there,
/// otherwise in the working directory.
fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "pinbin")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
