//! The decision-to-trades step shared by the live scheduler and the
//! backtester. Both paths call `TradingStep::run` with the same inputs, so
//! their ledgers and equity traces agree.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

use super::{ExecutionAdjustment, Portfolio, PortfolioEngine};
use crate::config::AppConfig;
use crate::domain::{Decision, ModelId, PortfolioSnapshot, Signal, Trade};
use crate::risk::{DrawdownMonitor, RiskManager, RiskReview, RiskSnapshot};

/// Everything a model carries from one cycle to the next
#[derive(Debug, Clone, PartialEq)]
pub struct TradingState {
    pub portfolio: Portfolio,
    pub drawdown: DrawdownMonitor,
}

impl TradingState {
    pub fn new(model_id: ModelId, initial_capital: Decimal, risk: &crate::config::RiskConfig) -> Self {
        Self {
            portfolio: Portfolio::new(model_id, initial_capital),
            drawdown: DrawdownMonitor::new(initial_capital, risk.drawdown_warning, risk.drawdown_recovery),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Automatic stop-loss/take-profit closes first, then decision trades
    pub trades: Vec<Trade>,
    pub reviews: Vec<RiskReview>,
    pub adjustments: Vec<ExecutionAdjustment>,
    pub snapshot: PortfolioSnapshot,
    pub risk: RiskSnapshot,
}

pub struct TradingStep {
    engine: PortfolioEngine,
    risk: RiskManager,
}

impl TradingStep {
    pub fn new(engine: PortfolioEngine, risk: RiskManager) -> Self {
        Self { engine, risk }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PortfolioEngine::new(config.trading.fee_rate, config.trading.quantity_scale),
            RiskManager::new(config.risk.clone(), config.trading.quantity_scale),
        )
    }

    pub fn engine(&self) -> &PortfolioEngine {
        &self.engine
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Mark to market, then review and apply each decision in order
    pub fn run(
        &self,
        state: &mut TradingState,
        prices: &BTreeMap<String, Decimal>,
        decisions: &[Decision],
        timestamp: DateTime<Utc>,
    ) -> StepOutcome {
        let mut trades = self
            .engine
            .mark_to_market(&mut state.portfolio, prices, timestamp);

        // A flat book has nothing left to reduce, so a losing streak pause ends here
        let limit = self.risk.config().losing_streak_limit;
        if limit > 0 && state.portfolio.is_flat() && state.portfolio.losing_streak >= limit {
            info!(
                model_id = state.portfolio.model_id,
                losses = state.portfolio.losing_streak,
                "losing streak reset on flat book"
            );
            state.portfolio.losing_streak = 0;
        }

        state.drawdown.observe(state.portfolio.total_value());

        let mut reviews = Vec::with_capacity(decisions.len());
        let mut adjustments = Vec::new();

        for decision in decisions {
            let Some(coin) = decision.coin.as_deref() else {
                continue;
            };
            if decision.signal == Signal::Hold {
                continue;
            }
            let Some(price) = prices.get(coin).copied() else {
                adjustments.push(ExecutionAdjustment::MissingPrice {
                    coin: coin.to_string(),
                });
                continue;
            };

            let review = self
                .risk
                .review(decision, &state.portfolio, price, &state.drawdown);
            let execution = self
                .engine
                .apply(&mut state.portfolio, &review.decision, price, timestamp);
            trades.extend(execution.trades);
            adjustments.extend(execution.adjustments);
            reviews.push(review);
        }

        let snapshot = state.portfolio.snapshot(timestamp);
        let risk = self.risk.assess(&state.portfolio, &state.drawdown);

        StepOutcome {
            trades,
            reviews,
            adjustments,
            snapshot,
            risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_step_books_and_snapshots() {
        let config = AppConfig::default();
        let step = TradingStep::from_config(&config);
        let mut state = TradingState::new(1, dec!(10000), &config.risk);
        let prices = BTreeMap::from([("BTC".to_string(), dec!(50000))]);
        let decisions = vec![Decision::new(Signal::Buy, "BTC")
            .with_quantity(dec!(0.05))
            .with_leverage(2)];

        let outcome = step.run(&mut state, &prices, &decisions, Utc::now());
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.reviews.len(), 1);
        assert_eq!(
            outcome.snapshot.total_value,
            outcome.snapshot.cash + outcome.snapshot.positions_value
        );
    }

    #[test]
    fn test_missing_price_is_recorded() {
        let step = TradingStep::from_config(&AppConfig::default());
        let mut state = TradingState::new(1, dec!(10000), &RiskConfig::default());
        let decisions = vec![Decision::new(Signal::Buy, "DOGE").with_quantity(dec!(10))];
        let outcome = step.run(&mut state, &BTreeMap::new(), &decisions, Utc::now());
        assert!(outcome.trades.is_empty());
        assert_eq!(
            outcome.adjustments,
            vec![ExecutionAdjustment::MissingPrice { coin: "DOGE".into() }]
        );
    }
}
