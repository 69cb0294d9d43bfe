mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use fetchledger::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    fetchledger::observability::init(&config.telemetry)?;

    commands::run(cli.command, config).await
}
