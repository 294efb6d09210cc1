use anyhow::Context;
use arena::cli::Cli;
use arena::config::AppConfig;
use clap::Parser;

mod main_dispatch;
mod main_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    main_dispatch::run(&cli, &config).await
}
