//! Read-only accessors over the registered models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;

use crate::domain::{ModelId, Position};
use crate::risk::RiskSnapshot;

use super::cycle::SlotState;

/// Current account state of one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioView {
    pub model_id: ModelId,
    pub name: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_return_pct: Decimal,
    pub positions: Vec<Position>,
    pub risk: Option<RiskSnapshot>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl PortfolioView {
    pub(crate) fn from_state(name: &str, state: &SlotState) -> Self {
        let portfolio = &state.trading.portfolio;
        Self {
            model_id: portfolio.model_id,
            name: name.to_string(),
            initial_capital: portfolio.initial_capital,
            cash: portfolio.cash,
            positions_value: portfolio.positions_value(),
            total_value: portfolio.total_value(),
            realized_pnl: portfolio.realized_pnl,
            unrealized_pnl: portfolio.unrealized_pnl(),
            total_return_pct: portfolio.total_return_pct(),
            positions: portfolio.positions.values().cloned().collect(),
            risk: state.last_risk.clone(),
            last_cycle_at: state.last_cycle_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub model_id: ModelId,
    pub name: String,
    pub total_value: Decimal,
    pub total_return_pct: Decimal,
    pub realized_pnl: Decimal,
    pub open_positions: usize,
}

/// Rank views by total return, best first. Ties keep model id order.
pub fn rank(mut views: Vec<PortfolioView>) -> Vec<LeaderboardEntry> {
    views.sort_by(|a, b| match b.total_return_pct.cmp(&a.total_return_pct) {
        Ordering::Equal => a.model_id.cmp(&b.model_id),
        other => other,
    });
    views
        .into_iter()
        .enumerate()
        .map(|(i, v)| LeaderboardEntry {
            rank: i + 1,
            model_id: v.model_id,
            name: v.name,
            total_value: v.total_value,
            total_return_pct: v.total_return_pct,
            realized_pnl: v.realized_pnl,
            open_positions: v.positions.len(),
        })
        .collect()
}
