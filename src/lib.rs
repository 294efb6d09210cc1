pub mod agent;
pub mod analytics;
pub mod backtest;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod market;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod scheduler;

pub use agent::{AiGateway, OpenAiCompatibleGateway, ParseTier, ResponseInterpreter};
pub use analytics::{EquityPoint, PerformanceAnalyzer, PerformanceMetrics};
pub use backtest::{BacktestReport, Backtester, BarSeries, DecisionSource};
pub use config::AppConfig;
pub use domain::{Decision, Model, ModelId, PortfolioSnapshot, Signal, Trade};
pub use error::{ArenaError, GatewayError, MarketDataError, Result};
pub use market::{BinanceMarketData, CachedMarketData, MarketDataProvider};
pub use persistence::{InMemoryStore, PostgresStore, TradeStore};
pub use portfolio::{Portfolio, TradingState, TradingStep};
pub use risk::{RiskManager, RiskSnapshot};
pub use scheduler::{CycleOutcome, LeaderboardEntry, PortfolioView, Scheduler};
