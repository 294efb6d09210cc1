use anyhow::Context;
use arena::cli::{self, Cli, Commands, OutputMode};
use arena::config::AppConfig;
use tracing::info;

pub(crate) async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let mode = OutputMode::from_json_flag(cli.json);
    match &cli.command {
        Commands::Run { once, model } => {
            crate::main_runtime::init_logging(&config.logging);
            ensure_valid(config)?;
            cli::run_arena(config, *once, *model, mode)
                .await
                .context("arena run failed")?;
        }
        Commands::Backtest {
            bars,
            responses,
            decisions,
            capital,
            trades,
        } => {
            crate::main_runtime::init_logging_simple();
            ensure_valid(config)?;
            cli::run_backtest(
                config,
                bars,
                responses.as_deref(),
                decisions.as_deref(),
                *capital,
                *trades,
                mode,
            )
            .with_context(|| format!("backtest over {}", bars.display()))?;
        }
        Commands::Analyze { model, limit } => {
            crate::main_runtime::init_logging_simple();
            cli::analyze(config, *model, *limit, mode)
                .await
                .with_context(|| format!("analyzing model {}", model))?;
        }
        Commands::Leaderboard => {
            crate::main_runtime::init_logging_simple();
            cli::leaderboard(config, mode)
                .await
                .context("building leaderboard")?;
        }
        Commands::CheckConfig => {
            crate::main_runtime::init_logging_simple();
            ensure_valid(config)?;
            println!(
                "config ok: {} models, {} coins, interval {}s",
                config.models.len(),
                config.trading.coins.len(),
                config.trading.interval_secs
            );
        }
    }
    Ok(())
}

fn ensure_valid(config: &AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("  - {}", e);
        }
        anyhow::bail!("{} configuration problem(s)", errors.len());
    }
    info!(models = config.models.len(), "configuration validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ensure_valid(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_problems_are_counted() {
        let mut config = AppConfig::default();
        config.trading.coins.clear();
        config.gateway.max_attempts = 0;
        let err = ensure_valid(&config).unwrap_err();
        assert_eq!(err.to_string(), "2 configuration problem(s)");
    }
}
