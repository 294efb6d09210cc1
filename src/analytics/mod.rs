//! Performance analytics over a trade ledger and an equity curve.
//!
//! Ratios are computed in `f64` on per-period returns of the equity curve.
//! Every ratio that would divide by zero (no returns, flat curve, no
//! drawdown, no losing trades) is reported as 0.0.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::AnalyticsConfig;
use crate::domain::{PortfolioSnapshot, Trade};

/// Account value at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

impl From<&PortfolioSnapshot> for EquityPoint {
    fn from(snapshot: &PortfolioSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            equity: snapshot.total_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinStats {
    pub coin: String,
    /// Closing trades only
    pub trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReturn {
    /// `YYYY-MM`
    pub month: String,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub initial_capital: Decimal,
    pub final_value: Decimal,
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub total_fees: Decimal,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub profit_factor: f64,

    pub max_drawdown_pct: f64,
    pub annualized_return_pct: f64,
    pub annualized_volatility_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    /// Sorted by total PnL, best first
    pub coins: Vec<CoinStats>,
    pub monthly: Vec<MonthlyReturn>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceAnalyzer {
    periods_per_year: f64,
    risk_free_rate: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::from(&AnalyticsConfig::default())
    }
}

impl From<&AnalyticsConfig> for PerformanceAnalyzer {
    fn from(config: &AnalyticsConfig) -> Self {
        Self::new(config.periods_per_year, config.risk_free_rate)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    finite_or_zero((numerator / denominator).to_f64().unwrap_or(0.0))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Root mean square of the negative returns
fn downside_deviation(values: &[f64]) -> f64 {
    let downside: Vec<f64> = values.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt()
}

/// Running peak-to-trough decline as a fraction of the peak
pub fn max_drawdown(curve: &[EquityPoint]) -> Decimal {
    let Some(first) = curve.first() else {
        return Decimal::ZERO;
    };
    let mut peak = first.equity;
    let mut worst = Decimal::ZERO;
    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > Decimal::ZERO {
            worst = worst.max((peak - point.equity) / peak);
        }
    }
    worst
}

/// Simple returns between consecutive curve points
pub fn period_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| {
            if w[0].equity > Decimal::ZERO {
                ((w[1].equity - w[0].equity) / w[0].equity)
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

impl PerformanceAnalyzer {
    pub fn new(periods_per_year: f64, risk_free_rate: f64) -> Self {
        Self {
            periods_per_year: if periods_per_year > 0.0 { periods_per_year } else { 252.0 },
            risk_free_rate,
        }
    }

    pub fn analyze(
        &self,
        initial_capital: Decimal,
        trades: &[Trade],
        equity_curve: &[EquityPoint],
    ) -> PerformanceMetrics {
        let closes: Vec<(&Trade, Decimal)> = trades
            .iter()
            .filter_map(|t| t.realized_pnl.map(|pnl| (t, pnl)))
            .collect();
        let wins: Vec<Decimal> = closes.iter().map(|(_, p)| *p).filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = closes.iter().map(|(_, p)| *p).filter(|p| *p < Decimal::ZERO).collect();

        let gross_win: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum();
        let avg = |items: &[Decimal], total: Decimal| {
            if items.is_empty() {
                Decimal::ZERO
            } else {
                total / Decimal::from(items.len())
            }
        };

        let final_value = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or_else(|| initial_capital + closes.iter().map(|(_, p)| *p).sum::<Decimal>());
        let total_pnl = final_value - initial_capital;

        // Post-step points only; the opening capital is the first baseline
        let seeded: Vec<EquityPoint> = equity_curve
            .first()
            .map(|first| EquityPoint {
                timestamp: first.timestamp,
                equity: initial_capital,
            })
            .into_iter()
            .chain(equity_curve.iter().copied())
            .collect();

        let returns = period_returns(&seeded);
        let excess: Vec<f64> = returns.iter().map(|r| r - self.risk_free_rate).collect();
        let mean_excess = mean(&excess);
        let volatility = std_dev(&returns);
        let downside = downside_deviation(&returns);
        let annualizer = self.periods_per_year.sqrt();

        let drawdown = max_drawdown(&seeded);
        let drawdown_f = drawdown.to_f64().unwrap_or(0.0);
        let annualized_return = mean(&returns) * self.periods_per_year;

        let sharpe = if volatility > 0.0 { mean_excess / volatility * annualizer } else { 0.0 };
        let sortino = if downside > 0.0 { mean_excess / downside * annualizer } else { 0.0 };
        let calmar = if drawdown_f > 0.0 { annualized_return / drawdown_f } else { 0.0 };

        PerformanceMetrics {
            initial_capital,
            final_value,
            total_pnl,
            total_return_pct: ratio(total_pnl, initial_capital) * 100.0,
            total_fees: trades.iter().map(|t| t.fee).sum(),
            total_trades: closes.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate_pct: if closes.is_empty() {
                0.0
            } else {
                wins.len() as f64 / closes.len() as f64 * 100.0
            },
            avg_win: avg(&wins, gross_win),
            avg_loss: avg(&losses, gross_loss),
            largest_win: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
            largest_loss: losses.iter().copied().min().unwrap_or(Decimal::ZERO),
            profit_factor: ratio(gross_win, gross_loss.abs()),
            max_drawdown_pct: drawdown_f * 100.0,
            annualized_return_pct: finite_or_zero(annualized_return * 100.0),
            annualized_volatility_pct: finite_or_zero(volatility * annualizer * 100.0),
            sharpe_ratio: finite_or_zero(sharpe),
            sortino_ratio: finite_or_zero(sortino),
            calmar_ratio: finite_or_zero(calmar),
            coins: coin_stats(&closes),
            monthly: monthly_returns(&seeded),
        }
    }
}

fn coin_stats(closes: &[(&Trade, Decimal)]) -> Vec<CoinStats> {
    let mut by_coin: BTreeMap<&str, CoinStats> = BTreeMap::new();
    for (trade, pnl) in closes {
        let stats = by_coin.entry(trade.coin.as_str()).or_insert_with(|| CoinStats {
            coin: trade.coin.clone(),
            trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate_pct: 0.0,
            total_pnl: Decimal::ZERO,
        });
        stats.trades += 1;
        stats.total_pnl += *pnl;
        if *pnl > Decimal::ZERO {
            stats.winning_trades += 1;
        } else if *pnl < Decimal::ZERO {
            stats.losing_trades += 1;
        }
    }

    let mut stats: Vec<CoinStats> = by_coin
        .into_values()
        .map(|mut s| {
            s.win_rate_pct = s.winning_trades as f64 / s.trades as f64 * 100.0;
            s
        })
        .collect();
    stats.sort_by(|a, b| b.total_pnl.cmp(&a.total_pnl));
    stats
}

/// Month-over-month returns. Each month starts from the previous month's
/// last value, or its own first value for the first month.
fn monthly_returns(curve: &[EquityPoint]) -> Vec<MonthlyReturn> {
    let mut months: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
    for point in curve {
        let key = point.timestamp.format("%Y-%m").to_string();
        months
            .entry(key)
            .and_modify(|(_, last)| *last = point.equity)
            .or_insert((point.equity, point.equity));
    }

    let mut previous_end: Option<Decimal> = None;
    months
        .into_iter()
        .map(|(month, (first, last))| {
            let start_value = previous_end.unwrap_or(first);
            previous_end = Some(last);
            MonthlyReturn {
                month,
                start_value,
                end_value: last,
                return_pct: ratio(last - start_value, start_value) * 100.0,
            }
        })
        .collect()
}
