//! Command line surface: `arena run`, `arena backtest`, `arena analyze`,
//! `arena leaderboard` and `arena check-config`.
//!
//! Every command prints a table by default and JSON with `--json`.

use clap::{Parser, Subcommand};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{info, warn};

use crate::agent::OpenAiCompatibleGateway;
use crate::analytics::{EquityPoint, PerformanceAnalyzer, PerformanceMetrics};
use crate::backtest::{
    load_bars_csv, BacktestReport, Backtester, DecisionSource, RecordedDecisions,
    ReplayedResponses,
};
use crate::config::AppConfig;
use crate::domain::{Decision, ModelId, Trade};
use crate::error::{ArenaError, Result};
use crate::market::cache::CachePolicy;
use crate::market::{BinanceMarketData, CachedMarketData};
use crate::persistence::{InMemoryStore, PostgresStore, TradeStore};
use crate::scheduler::{CycleOutcome, CycleServices, LeaderboardEntry, Scheduler};

#[derive(Parser)]
#[command(name = "arena")]
#[command(version)]
#[command(about = "Simulated crypto trading arena for LLM-driven agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config", env = "ARENA_CONFIG_DIR")]
    pub config: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured model on its schedule until Ctrl-C
    Run {
        /// Run one cycle per model and exit
        #[arg(long)]
        once: bool,
        /// Only run this model
        #[arg(long)]
        model: Option<ModelId>,
    },
    /// Replay recorded decisions or responses over historical bars
    Backtest {
        /// CSV with timestamp,coin,open,high,low,close,volume
        #[arg(long)]
        bars: PathBuf,
        /// JSON array of raw model responses, one per bar
        #[arg(long, conflicts_with = "decisions")]
        responses: Option<PathBuf>,
        /// JSON array of decision lists, one per bar
        #[arg(long)]
        decisions: Option<PathBuf>,
        #[arg(long, default_value = "10000")]
        capital: Decimal,
        /// Also print the trade ledger
        #[arg(long)]
        trades: bool,
    },
    /// Performance metrics of a model from the store
    Analyze {
        #[arg(long)]
        model: ModelId,
        /// Most recent trades and snapshots to include
        #[arg(long, default_value = "10000")]
        limit: usize,
    },
    /// Configured models ranked by total return
    Leaderboard,
    /// Validate configuration and exit
    CheckConfig,
}

/// Output mode for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub model_id: ModelId,
    pub name: String,
    pub total_value: String,
    pub return_pct: String,
    pub realized_pnl: String,
    pub positions: usize,
}

impl From<&LeaderboardEntry> for LeaderboardRow {
    fn from(e: &LeaderboardEntry) -> Self {
        Self {
            rank: e.rank,
            model_id: e.model_id,
            name: e.name.clone(),
            total_value: format!("{:.2}", e.total_value),
            return_pct: format!("{:+.2}%", e.total_return_pct),
            realized_pnl: format!("{:.2}", e.realized_pnl),
            positions: e.open_positions,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct MetricRow {
    pub metric: &'static str,
    pub value: String,
}

pub fn metric_rows(m: &PerformanceMetrics) -> Vec<MetricRow> {
    let row = |metric, value: String| MetricRow { metric, value };
    vec![
        row("initial capital", format!("{:.2}", m.initial_capital)),
        row("final value", format!("{:.2}", m.final_value)),
        row("total pnl", format!("{:.2}", m.total_pnl)),
        row("total return", format!("{:+.2}%", m.total_return_pct)),
        row("fees", format!("{:.2}", m.total_fees)),
        row("closed trades", m.total_trades.to_string()),
        row("win rate", format!("{:.1}%", m.win_rate_pct)),
        row("avg win", format!("{:.2}", m.avg_win)),
        row("avg loss", format!("{:.2}", m.avg_loss)),
        row("largest win", format!("{:.2}", m.largest_win)),
        row("largest loss", format!("{:.2}", m.largest_loss)),
        row("profit factor", format!("{:.2}", m.profit_factor)),
        row("max drawdown", format!("{:.2}%", m.max_drawdown_pct)),
        row("annualized return", format!("{:.2}%", m.annualized_return_pct)),
        row("annualized volatility", format!("{:.2}%", m.annualized_volatility_pct)),
        row("sharpe", format!("{:.3}", m.sharpe_ratio)),
        row("sortino", format!("{:.3}", m.sortino_ratio)),
        row("calmar", format!("{:.3}", m.calmar_ratio)),
    ]
}

#[derive(Debug, Serialize, Tabled)]
pub struct TradeRow {
    pub id: u64,
    pub time: String,
    pub coin: String,
    pub kind: String,
    pub quantity: String,
    pub price: String,
    pub leverage: u32,
    pub fee: String,
    pub pnl: String,
    pub reason: String,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        Self {
            id: t.id,
            time: t.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            coin: t.coin.clone(),
            kind: t.kind.to_string(),
            quantity: t.quantity.normalize().to_string(),
            price: format!("{:.2}", t.price),
            leverage: t.leverage,
            fee: format!("{:.4}", t.fee),
            pnl: t.realized_pnl.map(|p| format!("{:.2}", p)).unwrap_or_default(),
            reason: t.close_reason.map(|r| r.as_str().to_string()).unwrap_or_default(),
        }
    }
}

/// Open the configured store: PostgreSQL when `database.url` is set,
/// otherwise a process-local store that is lost on exit
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn TradeStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("database.url not set, trades are kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Scheduler wired to Binance prices, the shared cache and the
/// OpenAI-compatible gateway
pub fn build_scheduler(config: &AppConfig, store: Arc<dyn TradeStore>) -> Result<Scheduler> {
    let binance = Arc::new(BinanceMarketData::new(&config.market)?);
    let market = Arc::new(CachedMarketData::new(binance, CachePolicy::from(&config.market)));
    let gateway = Arc::new(OpenAiCompatibleGateway::new(&config.gateway)?);
    let services = CycleServices::from_config(config, market, gateway, store);
    Ok(Scheduler::new(
        services,
        Duration::from_secs(config.trading.interval_secs),
    ))
}

async fn register_models(
    config: &AppConfig,
    scheduler: &Scheduler,
    only: Option<ModelId>,
) -> Result<()> {
    let models: Vec<_> = config
        .models
        .iter()
        .filter(|m| only.map(|id| id == m.id).unwrap_or(true))
        .collect();
    if models.is_empty() {
        return Err(match only {
            Some(id) => ArenaError::ModelNotFound(id),
            None => ArenaError::Validation("no models configured".into()),
        });
    }
    for model in models {
        scheduler.register_restored(model.to_model()).await?;
    }
    Ok(())
}

pub async fn run_arena(
    config: &AppConfig,
    once: bool,
    model: Option<ModelId>,
    mode: OutputMode,
) -> Result<()> {
    let store = open_store(config).await?;
    let scheduler = build_scheduler(config, store)?;
    register_models(config, &scheduler, model).await?;

    if once {
        let ids = scheduler.model_ids();
        let outcomes = join_all(ids.iter().map(|id| scheduler.run_once(*id))).await;
        for (id, outcome) in ids.iter().zip(outcomes) {
            match outcome? {
                CycleOutcome::Completed(report) => info!(
                    model_id = id,
                    trades = report.outcome.trades.len(),
                    tier = report.tier.as_str(),
                    "cycle completed"
                ),
                CycleOutcome::Skipped(reason) => warn!(model_id = id, "cycle skipped: {}", reason),
            }
        }
    } else {
        scheduler.start_all();
        info!(models = scheduler.model_ids().len(), "arena running, Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown requested, waiting for in-flight cycles");
        scheduler.stop_all().await;
    }

    let rows: Vec<LeaderboardRow> = scheduler.leaderboard().await.iter().map(Into::into).collect();
    print_items(&rows, mode)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn run_backtest(
    config: &AppConfig,
    bars: &Path,
    responses: Option<&Path>,
    decisions: Option<&Path>,
    capital: Decimal,
    show_trades: bool,
    mode: OutputMode,
) -> Result<BacktestReport> {
    let series = load_bars_csv(bars)?;
    let mut source: Box<dyn DecisionSource> = match (responses, decisions) {
        (Some(path), _) => {
            let raw: Vec<String> = read_json(path)?;
            Box::new(ReplayedResponses::new(raw, &config.trading.coins))
        }
        (None, Some(path)) => {
            let steps: Vec<Vec<Decision>> = read_json(path)?;
            Box::new(RecordedDecisions::new(steps))
        }
        (None, None) => {
            return Err(ArenaError::Validation(
                "backtest needs --responses or --decisions".into(),
            ))
        }
    };

    let report = Backtester::from_config(config).run(0, capital, &series, source.as_mut())?;
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputMode::Table => {
            if show_trades {
                let rows: Vec<TradeRow> = report.trades.iter().map(Into::into).collect();
                print_items(&rows, mode)?;
            }
            print_items(&metric_rows(&report.metrics), mode)?;
        }
    }
    Ok(report)
}

pub async fn analyze(
    config: &AppConfig,
    model_id: ModelId,
    limit: usize,
    mode: OutputMode,
) -> Result<PerformanceMetrics> {
    let model = config
        .models
        .iter()
        .find(|m| m.id == model_id)
        .ok_or(ArenaError::ModelNotFound(model_id))?;
    if config.database.url.is_none() {
        return Err(ArenaError::Validation(
            "analyze reads persisted history and needs database.url".into(),
        ));
    }

    let store = open_store(config).await?;
    let trades = store.recent_trades(model_id, limit).await?;
    let snapshots = store.recent_snapshots(model_id, limit).await?;
    let curve: Vec<EquityPoint> = snapshots.iter().map(EquityPoint::from).collect();

    let metrics = PerformanceAnalyzer::from(&config.analytics).analyze(
        model.initial_capital,
        &trades,
        &curve,
    );
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&metrics)?),
        OutputMode::Table => print_items(&metric_rows(&metrics), mode)?,
    }
    Ok(metrics)
}

pub async fn leaderboard(config: &AppConfig, mode: OutputMode) -> Result<Vec<LeaderboardEntry>> {
    let store = open_store(config).await?;
    let scheduler = build_scheduler(config, store)?;
    register_models(config, &scheduler, None).await?;
    let board = scheduler.leaderboard().await;
    let rows: Vec<LeaderboardRow> = board.iter().map(Into::into).collect();
    print_items(&rows, mode)?;
    Ok(board)
}
