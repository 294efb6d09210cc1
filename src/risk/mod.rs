//! Risk manager.
//!
//! Decisions are never rejected here. Each rule shrinks the decision to the
//! largest compliant version and records what it changed; when nothing
//! compliant is left the decision becomes a hold.

pub mod drawdown;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RiskConfig;
use crate::domain::{Decision, Side, Signal};
use crate::portfolio::Portfolio;

pub use drawdown::DrawdownMonitor;

/// A change the risk manager made to a decision, or a note about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskAdjustment {
    LeverageClamped { requested: u32, applied: u32 },
    /// Quantity was missing and sized from equity
    DefaultSize { quantity: Decimal },
    PositionRatioClamped { requested: Decimal, applied: Decimal },
    RiskPerTradeClamped { requested: Decimal, applied: Decimal },
    /// Stop on the wrong side of the price
    StopLossDropped { stop_loss: Decimal },
    /// Target on the wrong side of the price
    TakeProfitDropped { take_profit: Decimal },
    /// No stop given, so per-trade risk could not be bounded
    NoStopLoss,
    /// Opening blocked by a drawdown escalation or a pause
    ReduceOnly { reason: String },
    /// Nothing compliant left to open
    ZeroQuantity,
}

/// Why trading is paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    CriticalDrawdown { drawdown: Decimal },
    LosingStreak { losses: u32 },
    LowCash { cash_ratio: Decimal },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::CriticalDrawdown { drawdown } => {
                write!(f, "critical drawdown {:.2}%", drawdown * Decimal::ONE_HUNDRED)
            }
            PauseReason::LosingStreak { losses } => write!(f, "{} consecutive losses", losses),
            PauseReason::LowCash { cash_ratio } => {
                write!(f, "cash at {:.2}% of total value", cash_ratio * Decimal::ONE_HUNDRED)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Derived risk view of a portfolio, recomputed every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    /// Aggregate score in [0, 1]
    pub score: f64,
    pub level: RiskLevel,
    pub warnings: Vec<String>,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
    pub escalated: bool,
    pub pause: Option<PauseReason>,
}

/// Adjusted decision with its audit trail
#[derive(Debug, Clone, PartialEq)]
pub struct RiskReview {
    pub decision: Decision,
    pub adjustments: Vec<RiskAdjustment>,
    pub risk_score: f64,
}

pub struct RiskManager {
    config: RiskConfig,
    quantity_scale: u32,
}

impl RiskManager {
    pub fn new(config: RiskConfig, quantity_scale: u32) -> Self {
        Self {
            config,
            quantity_scale,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn round(&self, quantity: Decimal) -> Decimal {
        quantity
            .round_dp_with_strategy(self.quantity_scale, RoundingStrategy::ToZero)
            .normalize()
    }

    /// Conditions under which only reducing decisions go through
    pub fn pause_reason(&self, portfolio: &Portfolio, drawdown: &DrawdownMonitor) -> Option<PauseReason> {
        if drawdown.current() >= self.config.drawdown_critical {
            return Some(PauseReason::CriticalDrawdown {
                drawdown: drawdown.current(),
            });
        }
        if self.config.losing_streak_limit > 0
            && portfolio.losing_streak >= self.config.losing_streak_limit
        {
            return Some(PauseReason::LosingStreak {
                losses: portfolio.losing_streak,
            });
        }
        let total = portfolio.total_value();
        if total > Decimal::ZERO {
            let cash_ratio = portfolio.cash / total;
            if cash_ratio < self.config.min_cash_ratio {
                return Some(PauseReason::LowCash { cash_ratio });
            }
        }
        None
    }

    /// Score and warnings for the current portfolio.
    ///
    /// The score is the sum of the weights of every triggered component,
    /// capped at 1.
    pub fn assess(&self, portfolio: &Portfolio, drawdown: &DrawdownMonitor) -> RiskSnapshot {
        let weights = &self.config.score;
        let total = portfolio.total_value();
        let mut score = 0.0;
        let mut warnings = Vec::new();

        if total > Decimal::ZERO {
            let largest = portfolio
                .positions
                .keys()
                .map(|coin| portfolio.exposure(coin))
                .max()
                .unwrap_or(Decimal::ZERO);
            let concentration = largest / total;
            if concentration > self.config.max_position_ratio {
                score += weights.concentration;
                warnings.push(format!(
                    "largest position at {:.1}% of total value",
                    concentration * Decimal::ONE_HUNDRED
                ));
            }
        }

        if !portfolio.positions.is_empty() {
            let sum: u32 = portfolio.positions.values().map(|p| p.leverage).sum();
            let average = f64::from(sum) / portfolio.positions.len() as f64;
            if average > f64::from(weights.leverage_threshold) {
                score += weights.leverage;
                warnings.push(format!("average leverage {:.1}x", average));
            }
        }

        if portfolio.positions.len() > weights.position_count_threshold {
            score += weights.position_count;
            warnings.push(format!("{} open positions", portfolio.positions.len()));
        }

        let unrealized = portfolio.unrealized_pnl();
        if total > Decimal::ZERO && unrealized < Decimal::ZERO {
            let loss_ratio = -unrealized / total;
            if loss_ratio > weights.unrealized_loss_threshold {
                score += weights.unrealized_loss;
                warnings.push(format!(
                    "unrealized loss at {:.1}% of total value",
                    loss_ratio * Decimal::ONE_HUNDRED
                ));
            }
        }

        if drawdown.current() > self.config.drawdown_warning {
            score += weights.drawdown;
            warnings.push(format!(
                "drawdown {:.1}%",
                drawdown.current() * Decimal::ONE_HUNDRED
            ));
        }

        let pause = self.pause_reason(portfolio, drawdown);
        if let Some(reason) = &pause {
            warnings.push(format!("trading paused: {}", reason));
        }

        let score = score.clamp(0.0, 1.0);
        RiskSnapshot {
            score,
            level: RiskLevel::from_score(score),
            warnings,
            current_drawdown: drawdown.current(),
            max_drawdown: drawdown.max(),
            escalated: drawdown.is_escalated(),
            pause,
        }
    }

    /// Review one decision against the portfolio at `price`
    pub fn review(
        &self,
        decision: &Decision,
        portfolio: &Portfolio,
        price: Decimal,
        drawdown: &DrawdownMonitor,
    ) -> RiskReview {
        let risk_score = self.assess(portfolio, drawdown).score;
        let mut adjustments = Vec::new();
        let mut decision = decision.clone();

        let (Some(side), Some(coin)) = (decision.signal.opening_side(), decision.coin.clone())
        else {
            return RiskReview {
                decision,
                adjustments,
                risk_score,
            };
        };
        if price <= Decimal::ZERO {
            return RiskReview {
                decision,
                adjustments,
                risk_score,
            };
        }

        let existing = portfolio.position(&coin).filter(|p| p.side == side);

        // 1. Leverage bounds; adds inherit the open position's leverage
        let requested = decision.leverage.unwrap_or(self.config.min_leverage);
        let clamped = requested.clamp(self.config.min_leverage, self.config.max_leverage);
        if clamped != requested {
            adjustments.push(RiskAdjustment::LeverageClamped {
                requested,
                applied: clamped,
            });
        }
        decision.leverage = Some(clamped);
        let effective_leverage = existing.map(|p| p.leverage).unwrap_or(clamped).max(1);

        let total = portfolio.total_value();
        let mut quantity = match decision.quantity {
            Some(q) => q,
            None => {
                let q = self.round(total.max(Decimal::ZERO) * self.config.max_risk_per_trade / price);
                adjustments.push(RiskAdjustment::DefaultSize { quantity: q });
                q
            }
        };

        // 2. Position notional relative to total value, existing same-side exposure included
        let existing_notional = existing.map(|p| p.notional_at(price)).unwrap_or(Decimal::ZERO);
        let room = (self.config.max_position_ratio * total - existing_notional).max(Decimal::ZERO);
        let max_by_ratio = self.round(room / price);
        if quantity > max_by_ratio {
            adjustments.push(RiskAdjustment::PositionRatioClamped {
                requested: quantity,
                applied: max_by_ratio,
            });
            quantity = max_by_ratio;
        }

        // 3. Loss at the stop, in leveraged PnL, relative to equity
        if let Some(target) = decision.take_profit {
            let valid = match side {
                Side::Long => target > price,
                Side::Short => target < price,
            };
            if !valid {
                adjustments.push(RiskAdjustment::TakeProfitDropped { take_profit: target });
                decision.take_profit = None;
            }
        }
        if let Some(stop) = decision.stop_loss {
            let valid = match side {
                Side::Long => stop < price,
                Side::Short => stop > price,
            };
            if !valid {
                adjustments.push(RiskAdjustment::StopLossDropped { stop_loss: stop });
                decision.stop_loss = None;
            }
        }
        match decision.stop_loss {
            Some(stop) => {
                let distance = (price - stop).abs() * Decimal::from(effective_leverage);
                let budget = self.config.max_risk_per_trade * total.max(Decimal::ZERO);
                let max_by_risk = self.round(budget / distance);
                if quantity > max_by_risk {
                    adjustments.push(RiskAdjustment::RiskPerTradeClamped {
                        requested: quantity,
                        applied: max_by_risk,
                    });
                    quantity = max_by_risk;
                }
            }
            None => adjustments.push(RiskAdjustment::NoStopLoss),
        }

        // 4. Drawdown escalation or pause: reduce-only
        let blocked = if drawdown.is_escalated() {
            Some(format!(
                "drawdown {:.2}% above warning",
                drawdown.current() * Decimal::ONE_HUNDRED
            ))
        } else {
            self.pause_reason(portfolio, drawdown).map(|r| r.to_string())
        };

        if let Some(reason) = blocked {
            debug!(coin = %coin, %reason, "opening blocked");
            adjustments.push(RiskAdjustment::ReduceOnly { reason });
            decision.signal = Signal::Hold;
            decision.quantity = None;
        } else {
            let quantity = self.round(quantity);
            if quantity <= Decimal::ZERO {
                adjustments.push(RiskAdjustment::ZeroQuantity);
                decision.signal = Signal::Hold;
                decision.quantity = None;
            } else {
                decision.quantity = Some(quantity);
            }
        }

        RiskReview {
            decision,
            adjustments,
            risk_score,
        }
    }
}
