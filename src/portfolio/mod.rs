//! Portfolio state and the engine that books trades against it.
//!
//! Accounting is exact decimal arithmetic. For every state reachable
//! through the engine, `total_value == cash + Σ position.mark_value`.

pub mod engine;
pub mod step;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::domain::{ModelId, PortfolioSnapshot};

pub use crate::domain::Position;
pub use engine::{Execution, ExecutionAdjustment, PortfolioEngine};
pub use step::{StepOutcome, TradingState, TradingStep};

/// Cash, open positions and running totals of one model
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub model_id: ModelId,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    /// Open positions keyed by coin, at most one per coin
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,
    /// Latest known price per coin
    pub marks: BTreeMap<String, Decimal>,
    /// Closing trades in a row that lost money
    pub losing_streak: u32,
    next_trade_id: u64,
}

impl Portfolio {
    pub fn new(model_id: ModelId, initial_capital: Decimal) -> Self {
        Self {
            model_id,
            initial_capital,
            cash: initial_capital,
            positions: BTreeMap::new(),
            realized_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            marks: BTreeMap::new(),
            losing_streak: 0,
            next_trade_id: 1,
        }
    }

    /// Rebuild a portfolio from its latest snapshot. `next_trade_id` must be
    /// one past the last persisted trade id.
    pub fn restore(
        snapshot: &PortfolioSnapshot,
        initial_capital: Decimal,
        next_trade_id: u64,
    ) -> Self {
        let positions: BTreeMap<String, Position> = snapshot
            .positions
            .iter()
            .map(|p| (p.coin.clone(), p.clone()))
            .collect();
        Self {
            model_id: snapshot.model_id,
            initial_capital,
            cash: snapshot.cash,
            positions,
            realized_pnl: snapshot.realized_pnl,
            total_fees: snapshot.total_fees,
            marks: BTreeMap::new(),
            losing_streak: 0,
            next_trade_id: next_trade_id.max(1),
        }
    }

    pub fn position(&self, coin: &str) -> Option<&Position> {
        self.positions.get(coin)
    }

    /// Latest price for a coin, falling back to the position's entry price
    pub fn mark(&self, coin: &str) -> Option<Decimal> {
        self.marks
            .get(coin)
            .copied()
            .or_else(|| self.positions.get(coin).map(|p| p.avg_entry))
    }

    pub fn update_mark(&mut self, coin: &str, price: Decimal) {
        self.marks.insert(coin.to_string(), price);
    }

    pub fn positions_value(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.mark_value(self.mark(&p.coin).unwrap_or(p.avg_entry)))
            .sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.unrealized_pnl(self.mark(&p.coin).unwrap_or(p.avg_entry)))
            .sum()
    }

    /// Cash plus the mark value of every open position
    pub fn total_value(&self) -> Decimal {
        self.cash + self.positions_value()
    }

    pub fn total_return_pct(&self) -> Decimal {
        if self.initial_capital.is_zero() {
            return Decimal::ZERO;
        }
        (self.total_value() - self.initial_capital) / self.initial_capital * Decimal::ONE_HUNDRED
    }

    /// Notional of the position in `coin` at the current mark
    pub fn exposure(&self, coin: &str) -> Decimal {
        match (self.positions.get(coin), self.mark(coin)) {
            (Some(p), Some(price)) => p.notional_at(price),
            _ => Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    /// Id the next booked trade will carry
    pub fn peek_trade_id(&self) -> u64 {
        self.next_trade_id
    }

    pub(crate) fn take_trade_id(&mut self) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        id
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            model_id: self.model_id,
            cash: self.cash,
            positions_value: self.positions_value(),
            total_value: self.total_value(),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(),
            total_fees: self.total_fees,
            positions: self.positions.values().cloned().collect(),
            timestamp,
        }
    }
}
