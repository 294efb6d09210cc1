//! Historical replay of the trading step.
//!
//! Each bar timestamp is one step: quotes and indicators are rebuilt from
//! the bars seen so far, the decision source is asked for decisions, and
//! the same `TradingStep` the live scheduler uses books them at the bar
//! close. Identical bars, decisions and parameters give the live ledger and
//! equity trace element for element.

mod data;
mod source;

pub use data::{load_bars_csv, BarSeries};
pub use source::{DecisionSource, PromptResponder, RecordedDecisions, ReplayedResponses, StepContext};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::agent::CoinMarket;
use crate::analytics::{EquityPoint, PerformanceAnalyzer, PerformanceMetrics};
use crate::config::{AppConfig, IndicatorConfig};
use crate::domain::{ModelId, PortfolioSnapshot, PriceQuote, Trade};
use crate::error::{ArenaError, Result};
use crate::indicators;
use crate::portfolio::{ExecutionAdjustment, TradingState, TradingStep};
use crate::risk::RiskSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub model_id: ModelId,
    pub initial_capital: Decimal,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: usize,
    pub trades: Vec<Trade>,
    /// Total value after every step
    pub equity_curve: Vec<EquityPoint>,
    pub adjustments: Vec<ExecutionAdjustment>,
    pub final_snapshot: PortfolioSnapshot,
    pub final_risk: RiskSnapshot,
    pub metrics: PerformanceMetrics,
}

pub struct Backtester {
    step: TradingStep,
    analyzer: PerformanceAnalyzer,
    /// Bars handed to the indicator engine at each step
    lookback: usize,
    indicators: IndicatorConfig,
}

impl Backtester {
    pub fn new(step: TradingStep, analyzer: PerformanceAnalyzer, lookback: usize) -> Self {
        Self {
            step,
            analyzer,
            lookback: lookback.max(1),
            indicators: IndicatorConfig::default(),
        }
    }

    /// Use these indicator windows instead of the defaults
    pub fn with_indicators(mut self, indicators: IndicatorConfig) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            TradingStep::from_config(config),
            PerformanceAnalyzer::from(&config.analytics),
            config.trading.history_days as usize,
        )
        .with_indicators(config.indicators.clone())
    }

    pub fn run(
        &self,
        model_id: ModelId,
        initial_capital: Decimal,
        series: &BarSeries,
        source: &mut dyn DecisionSource,
    ) -> Result<BacktestReport> {
        self.run_until(model_id, initial_capital, series, source, &AtomicBool::new(false))
    }

    /// Like `run`, checking `cancel` before every step
    pub fn run_until(
        &self,
        model_id: ModelId,
        initial_capital: Decimal,
        series: &BarSeries,
        source: &mut dyn DecisionSource,
        cancel: &AtomicBool,
    ) -> Result<BacktestReport> {
        let timestamps = series.timestamps();
        let (Some(&start), Some(&end)) = (timestamps.first(), timestamps.last()) else {
            return Err(ArenaError::Validation("backtest needs at least one bar".into()));
        };
        if initial_capital <= Decimal::ZERO {
            return Err(ArenaError::Validation(format!(
                "initial capital must be positive, got {}",
                initial_capital
            )));
        }

        info!(
            model_id,
            steps = timestamps.len(),
            %start,
            %end,
            "backtest started"
        );

        let mut state = TradingState::new(model_id, initial_capital, self.step.risk().config());
        let mut trades = Vec::new();
        let mut adjustments = Vec::new();
        let mut equity_curve = Vec::with_capacity(timestamps.len());
        let mut last = None;

        for (index, &timestamp) in timestamps.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(model_id, step = index, "backtest cancelled");
                return Err(ArenaError::Cancelled);
            }

            let markets = self.markets_at(series, timestamp);
            let prices: BTreeMap<String, Decimal> = markets
                .iter()
                .map(|m| (m.quote.coin.clone(), m.quote.price))
                .collect();
            for (coin, price) in &prices {
                state.portfolio.update_mark(coin, *price);
            }

            let decisions = source.decisions(&StepContext {
                index,
                timestamp,
                markets: &markets,
                portfolio: &state.portfolio,
            });
            let outcome = self.step.run(&mut state, &prices, &decisions, timestamp);
            debug!(
                step = index,
                trades = outcome.trades.len(),
                total_value = %outcome.snapshot.total_value,
                "backtest step"
            );

            equity_curve.push(EquityPoint::from(&outcome.snapshot));
            trades.extend(outcome.trades);
            adjustments.extend(outcome.adjustments);
            last = Some((outcome.snapshot, outcome.risk));
        }

        let Some((final_snapshot, final_risk)) = last else {
            return Err(ArenaError::Internal("backtest produced no steps".into()));
        };
        let metrics = self.analyzer.analyze(initial_capital, &trades, &equity_curve);

        info!(
            model_id,
            trades = trades.len(),
            final_value = %final_snapshot.total_value,
            return_pct = metrics.total_return_pct,
            "backtest finished"
        );

        Ok(BacktestReport {
            model_id,
            initial_capital,
            start,
            end,
            steps: timestamps.len(),
            trades,
            equity_curve,
            adjustments,
            final_snapshot,
            final_risk,
            metrics,
        })
    }

    /// Quotes and indicators from the bars known at `timestamp`
    fn markets_at(&self, series: &BarSeries, timestamp: DateTime<Utc>) -> Vec<CoinMarket> {
        series
            .coins()
            .filter_map(|coin| {
                let window = series.window(coin, timestamp, self.lookback);
                let (bar, earlier) = window.split_last()?;
                Some(CoinMarket {
                    quote: PriceQuote::from_bar(coin, bar, earlier.last()),
                    indicators: indicators::compute(window, &self.indicators),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Decision, Signal};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn series(closes: &[Decimal]) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: dec!(1),
            })
            .collect();
        let mut series = BarSeries::new();
        series.insert("BTC", bars);
        series
    }

    fn backtester() -> Backtester {
        Backtester::from_config(&AppConfig::default())
    }

    #[test]
    fn test_recorded_round_trip_books_profit() {
        let series = series(&[dec!(50000), dec!(52000), dec!(55000)]);
        let mut source = RecordedDecisions::new(vec![
            vec![Decision::new(Signal::Buy, "BTC")
                .with_quantity(dec!(0.05))
                .with_leverage(2)
                .with_stop_loss(dec!(48000))],
            vec![],
            vec![Decision::new(Signal::Close, "BTC")],
        ]);

        let report = backtester().run(1, dec!(10000), &series, &mut source).unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.equity_curve.len(), 3);

        let close = &report.trades[1];
        assert!(close.is_close());
        // (55000 - 50000) * 0.05 * 2 - 55000 * 0.05 * 0.001
        assert_eq!(close.realized_pnl, Some(dec!(497.25)));
        assert!(report.final_snapshot.positions.is_empty());
        assert_eq!(report.metrics.total_trades, 1);
        assert_eq!(report.metrics.winning_trades, 1);
    }

    #[test]
    fn test_replayed_responses_use_interpreter() {
        let series = series(&[dec!(100), dec!(100)]);
        let mut source = ReplayedResponses::new(
            vec![
                "```json\n{\"signal\": \"buy\", \"coin\": \"BTC\", \"quantity\": 1, \"stop_loss\": 95}\n```".into(),
                "nothing useful here".into(),
            ],
            &["BTC".to_string()],
        );
        let report = backtester().run(1, dec!(10000), &series, &mut source).unwrap();
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].quantity, dec!(1));
    }

    #[test]
    fn test_prompt_responder_sees_market() {
        let series = series(&[dec!(100), dec!(101)]);
        let mut prompts = Vec::new();
        let mut source = PromptResponder::new("", 20, &["BTC".to_string()], |p: &crate::agent::Prompt| {
            prompts.push(p.user.clone());
            "hold".to_string()
        });
        let report = backtester().run(1, dec!(10000), &series, &mut source).unwrap();
        drop(source);
        assert!(report.trades.is_empty());
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("BTC"));
    }

    #[test]
    fn test_configured_windows_reach_the_prompt() {
        let series = series(&[dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
        let windows = IndicatorConfig {
            sma_windows: vec![3],
            ..IndicatorConfig::default()
        };
        let mut prompts = Vec::new();
        let mut source = PromptResponder::new("", 20, &["BTC".to_string()], |p: &crate::agent::Prompt| {
            prompts.push(p.user.clone());
            "hold".to_string()
        });
        backtester()
            .with_indicators(windows)
            .run(1, dec!(10000), &series, &mut source)
            .unwrap();
        drop(source);
        let last = prompts.last().unwrap();
        assert!(last.contains("SMA_3=103.0000"));
        assert!(!last.contains("SMA_7"));
    }

    #[test]
    fn test_empty_series_is_rejected() {
        let mut source = RecordedDecisions::default();
        assert!(matches!(
            backtester().run(1, dec!(10000), &BarSeries::new(), &mut source),
            Err(ArenaError::Validation(_))
        ));
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let series = series(&[dec!(100)]);
        let mut source = RecordedDecisions::default();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            backtester().run_until(1, dec!(10000), &series, &mut source, &cancel),
            Err(ArenaError::Cancelled)
        ));
    }
}
