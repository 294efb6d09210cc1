use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{Portfolio, Position};
use crate::domain::{CloseReason, Decision, Side, Signal, Trade, TradeKind};

/// Soft execution outcome recorded instead of failing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionAdjustment {
    /// Order shrunk to what the cash could margin
    Downsized {
        coin: String,
        requested: Decimal,
        filled: Decimal,
    },
    /// Not even the smallest quantity was affordable
    Unaffordable { coin: String, requested: Decimal },
    /// Close requested with nothing open
    NoPosition { coin: String },
    /// Requested quantity rounds to zero at the configured scale
    ZeroQuantity { coin: String, requested: Decimal },
    /// Opening decision arrived without a quantity
    NoQuantity { coin: String },
    /// No price known for the coin this cycle
    MissingPrice { coin: String },
}

/// Trades booked for one decision plus any soft adjustments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub trades: Vec<Trade>,
    pub adjustments: Vec<ExecutionAdjustment>,
}

/// Applies decisions to a portfolio
#[derive(Debug, Clone, Copy)]
pub struct PortfolioEngine {
    fee_rate: Decimal,
    quantity_scale: u32,
}

impl PortfolioEngine {
    pub fn new(fee_rate: Decimal, quantity_scale: u32) -> Self {
        Self {
            fee_rate,
            quantity_scale,
        }
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    /// Round a quantity toward zero at the configured scale
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        quantity
            .round_dp_with_strategy(self.quantity_scale, RoundingStrategy::ToZero)
            .normalize()
    }

    fn step(&self) -> Decimal {
        Decimal::new(1, self.quantity_scale)
    }

    /// Revalue every position and close those whose stop-loss or take-profit
    /// is breached at the latest price. The stop is checked first.
    pub fn mark_to_market(
        &self,
        portfolio: &mut Portfolio,
        prices: &BTreeMap<String, Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Vec<Trade> {
        for (coin, price) in prices {
            portfolio.update_mark(coin, *price);
        }

        let triggered: Vec<(String, Decimal, CloseReason)> = portfolio
            .positions
            .values()
            .filter_map(|p| {
                let price = *prices.get(&p.coin)?;
                if p.stop_hit(price) {
                    Some((p.coin.clone(), price, CloseReason::StopLoss))
                } else if p.target_hit(price) {
                    Some((p.coin.clone(), price, CloseReason::TakeProfit))
                } else {
                    None
                }
            })
            .collect();

        triggered
            .into_iter()
            .filter_map(|(coin, price, reason)| {
                info!(
                    model_id = portfolio.model_id,
                    coin = %coin,
                    %price,
                    reason = reason.as_str(),
                    "automatic close"
                );
                self.close(portfolio, &coin, None, price, timestamp, reason)
            })
            .collect()
    }

    /// Apply one decision at `price`. Never fails; anything that cannot be
    /// executed as asked shows up in the adjustments.
    pub fn apply(
        &self,
        portfolio: &mut Portfolio,
        decision: &Decision,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Execution {
        let mut execution = Execution::default();
        let Some(coin) = decision.coin.as_deref() else {
            return execution;
        };
        if price <= Decimal::ZERO {
            execution.adjustments.push(ExecutionAdjustment::MissingPrice {
                coin: coin.to_string(),
            });
            return execution;
        }
        portfolio.update_mark(coin, price);

        match decision.signal {
            Signal::Hold => {}
            Signal::Close => {
                let rounds_to_zero = decision
                    .quantity
                    .filter(|q| self.round_quantity(*q) <= Decimal::ZERO);
                if let (Some(requested), Some(_)) = (rounds_to_zero, portfolio.position(coin)) {
                    execution.adjustments.push(ExecutionAdjustment::ZeroQuantity {
                        coin: coin.to_string(),
                        requested,
                    });
                    return execution;
                }
                match self.close(
                    portfolio,
                    coin,
                    decision.quantity,
                    price,
                    timestamp,
                    CloseReason::Signal,
                ) {
                    Some(trade) => execution.trades.push(trade),
                    None => execution.adjustments.push(ExecutionAdjustment::NoPosition {
                        coin: coin.to_string(),
                    }),
                }
            }
            Signal::Buy | Signal::Sell => {
                let side = if decision.signal == Signal::Buy {
                    Side::Long
                } else {
                    Side::Short
                };

                // A flip closes the opposite side before opening
                let opposite = portfolio
                    .position(coin)
                    .map(|p| p.side != side)
                    .unwrap_or(false);
                if opposite {
                    if let Some(trade) =
                        self.close(portfolio, coin, None, price, timestamp, CloseReason::Signal)
                    {
                        execution.trades.push(trade);
                    }
                }

                match decision.quantity {
                    Some(quantity) => {
                        let (trade, adjustment) =
                            self.open(portfolio, coin, side, quantity, decision, price, timestamp);
                        execution.trades.extend(trade);
                        execution.adjustments.extend(adjustment);
                    }
                    None => execution.adjustments.push(ExecutionAdjustment::NoQuantity {
                        coin: coin.to_string(),
                    }),
                }
            }
        }

        execution
    }

    /// Cash needed to open `quantity` at `price`: margin plus fee
    fn opening_cost(&self, quantity: Decimal, price: Decimal, leverage: u32) -> (Decimal, Decimal) {
        let notional = quantity * price;
        let margin = notional / Decimal::from(leverage);
        let fee = notional * self.fee_rate;
        (margin, fee)
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        &self,
        portfolio: &mut Portfolio,
        coin: &str,
        side: Side,
        requested: Decimal,
        decision: &Decision,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> (Option<Trade>, Option<ExecutionAdjustment>) {
        // Adds keep the leverage the position was opened with
        let leverage = portfolio
            .position(coin)
            .map(|p| p.leverage)
            .or(decision.leverage)
            .unwrap_or(1)
            .max(1);

        let mut quantity = self.round_quantity(requested);
        let mut adjustment = None;

        let (margin, fee) = self.opening_cost(quantity, price, leverage);
        if margin + fee > portfolio.cash {
            let per_unit = price / Decimal::from(leverage) + price * self.fee_rate;
            let affordable = if portfolio.cash > Decimal::ZERO && per_unit > Decimal::ZERO {
                self.round_quantity(portfolio.cash / per_unit)
            } else {
                Decimal::ZERO
            };
            quantity = affordable;
            // Division rounding can leave the cost a hair above cash
            while quantity > Decimal::ZERO {
                let (m, f) = self.opening_cost(quantity, price, leverage);
                if m + f <= portfolio.cash {
                    break;
                }
                quantity -= self.step();
            }
            if quantity <= Decimal::ZERO {
                debug!(model_id = portfolio.model_id, coin, %requested, "order unaffordable");
                return (
                    None,
                    Some(ExecutionAdjustment::Unaffordable {
                        coin: coin.to_string(),
                        requested,
                    }),
                );
            }
            adjustment = Some(ExecutionAdjustment::Downsized {
                coin: coin.to_string(),
                requested,
                filled: quantity,
            });
        }

        if quantity <= Decimal::ZERO {
            return (
                None,
                Some(ExecutionAdjustment::Unaffordable {
                    coin: coin.to_string(),
                    requested,
                }),
            );
        }

        let (margin, fee) = self.opening_cost(quantity, price, leverage);
        portfolio.cash -= margin + fee;
        portfolio.total_fees += fee;

        match portfolio.positions.get_mut(coin) {
            Some(position) => {
                let total_qty = position.quantity + quantity;
                position.avg_entry =
                    (position.quantity * position.avg_entry + quantity * price) / total_qty;
                position.quantity = total_qty;
                position.margin += margin;
                if decision.stop_loss.is_some() {
                    position.stop_loss = decision.stop_loss;
                }
                if decision.take_profit.is_some() {
                    position.take_profit = decision.take_profit;
                }
            }
            None => {
                portfolio.positions.insert(
                    coin.to_string(),
                    Position {
                        coin: coin.to_string(),
                        side,
                        quantity,
                        avg_entry: price,
                        leverage,
                        margin,
                        stop_loss: decision.stop_loss,
                        take_profit: decision.take_profit,
                        opened_at: timestamp,
                    },
                );
            }
        }

        let trade = Trade {
            id: portfolio.take_trade_id(),
            model_id: portfolio.model_id,
            coin: coin.to_string(),
            kind: TradeKind::open(side),
            side,
            quantity,
            price,
            leverage,
            fee,
            realized_pnl: None,
            close_reason: None,
            timestamp,
        };
        info!(
            model_id = portfolio.model_id,
            coin,
            side = side.as_str(),
            %quantity,
            %price,
            leverage,
            "opened"
        );
        (Some(trade), adjustment)
    }

    /// Close `quantity` of the position (all of it when `None` or larger
    /// than the position). Returns `None` when nothing is open.
    fn close(
        &self,
        portfolio: &mut Portfolio,
        coin: &str,
        quantity: Option<Decimal>,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: CloseReason,
    ) -> Option<Trade> {
        let position = portfolio.positions.get(coin)?.clone();

        let quantity = quantity
            .map(|q| self.round_quantity(q))
            .filter(|q| *q > Decimal::ZERO && *q < position.quantity)
            .unwrap_or(position.quantity);
        let full = quantity == position.quantity;

        let fee = quantity * price * self.fee_rate;
        let gross = (price - position.avg_entry)
            * quantity
            * position.side.sign()
            * Decimal::from(position.leverage);
        let realized = gross - fee;
        let margin_returned = if full {
            position.margin
        } else {
            position.margin * quantity / position.quantity
        };

        portfolio.cash += margin_returned + realized;
        portfolio.realized_pnl += realized;
        portfolio.total_fees += fee;
        if realized < Decimal::ZERO {
            portfolio.losing_streak += 1;
        } else {
            portfolio.losing_streak = 0;
        }

        if full {
            portfolio.positions.remove(coin);
        } else if let Some(open) = portfolio.positions.get_mut(coin) {
            open.quantity -= quantity;
            open.margin -= margin_returned;
        }

        info!(
            model_id = portfolio.model_id,
            coin,
            %quantity,
            %price,
            pnl = %realized,
            reason = reason.as_str(),
            "closed"
        );

        Some(Trade {
            id: portfolio.take_trade_id(),
            model_id: portfolio.model_id,
            coin: coin.to_string(),
            kind: TradeKind::Close,
            side: position.side,
            quantity,
            price,
            leverage: position.leverage,
            fee,
            realized_pnl: Some(realized),
            close_reason: Some(reason),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> PortfolioEngine {
        PortfolioEngine::new(dec!(0.001), 8)
    }

    fn buy(coin: &str, qty: Decimal, lev: u32) -> Decision {
        Decision::new(Signal::Buy, coin)
            .with_quantity(qty)
            .with_leverage(lev)
    }

    #[test]
    fn test_open_and_close_long() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(10000));
        let now = Utc::now();

        let exec = engine.apply(&mut p, &buy("BTC", dec!(0.1), 2), dec!(50000), now);
        assert_eq!(exec.trades.len(), 1);
        assert_eq!(p.cash, dec!(7495));
        assert_eq!(exec.trades[0].fee, dec!(5));

        let close = Decision::new(Signal::Close, "BTC");
        let exec = engine.apply(&mut p, &close, dec!(55000), now);
        let trade = &exec.trades[0];
        assert_eq!(trade.realized_pnl, Some(dec!(994.5)));
        assert_eq!(p.cash, dec!(10989.5));
        assert!(p.is_flat());
        assert_eq!(trade.id, 2);
    }

    #[test]
    fn test_flip_closes_then_opens() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(10000));
        let now = Utc::now();
        engine.apply(&mut p, &buy("ETH", dec!(1), 5), dec!(3000), now);

        let sell = Decision::new(Signal::Sell, "ETH")
            .with_quantity(dec!(0.5))
            .with_leverage(3);
        let exec = engine.apply(&mut p, &sell, dec!(3100), now);
        assert_eq!(exec.trades.len(), 2);
        assert_eq!(exec.trades[0].kind, TradeKind::Close);
        assert_eq!(exec.trades[1].kind, TradeKind::OpenShort);
        let pos = p.position("ETH").unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.leverage, 3);
    }

    #[test]
    fn test_shortfall_downsizes() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(1000));
        let exec = engine.apply(&mut p, &buy("BTC", dec!(1), 1), dec!(50000), Utc::now());
        assert!(matches!(
            exec.adjustments[0],
            ExecutionAdjustment::Downsized { .. }
        ));
        let filled = exec.trades[0].quantity;
        assert!(filled > Decimal::ZERO && filled < dec!(0.02));
        assert!(p.cash >= Decimal::ZERO);
        assert!(p.cash < dec!(0.06));
    }

    #[test]
    fn test_unaffordable_is_noop() {
        let engine = PortfolioEngine::new(dec!(0.001), 2);
        let mut p = Portfolio::new(1, dec!(1));
        let exec = engine.apply(&mut p, &buy("BTC", dec!(1), 1), dec!(50000), Utc::now());
        assert!(exec.trades.is_empty());
        assert!(matches!(
            exec.adjustments[0],
            ExecutionAdjustment::Unaffordable { .. }
        ));
        assert_eq!(p.cash, dec!(1));
    }

    #[test]
    fn test_partial_close_returns_proportional_margin() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(10000));
        let now = Utc::now();
        engine.apply(&mut p, &buy("SOL", dec!(10), 2), dec!(100), now);
        let reduce = Decision::new(Signal::Close, "SOL").with_quantity(dec!(4));
        let exec = engine.apply(&mut p, &reduce, dec!(100), now);
        assert_eq!(exec.trades[0].quantity, dec!(4));
        let pos = p.position("SOL").unwrap();
        assert_eq!(pos.quantity, dec!(6));
        assert_eq!(pos.margin, dec!(300));
    }

    #[test]
    fn test_sub_step_close_is_noop() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(10000));
        let now = Utc::now();
        engine.apply(&mut p, &buy("BTC", dec!(0.1), 2), dec!(50000), now);
        let dust = Decision::new(Signal::Close, "BTC").with_quantity(dec!(0.000000001));
        let exec = engine.apply(&mut p, &dust, dec!(51000), now);
        assert!(exec.trades.is_empty());
        assert_eq!(
            exec.adjustments,
            vec![ExecutionAdjustment::ZeroQuantity {
                coin: "BTC".into(),
                requested: dec!(0.000000001),
            }]
        );
        assert_eq!(p.position("BTC").unwrap().quantity, dec!(0.1));
    }

    #[test]
    fn test_stop_loss_triggers_on_mark() {
        let engine = engine();
        let mut p = Portfolio::new(1, dec!(10000));
        let now = Utc::now();
        engine.apply(
            &mut p,
            &buy("BTC", dec!(0.1), 2).with_stop_loss(dec!(48000)),
            dec!(50000),
            now,
        );
        let prices = BTreeMap::from([("BTC".to_string(), dec!(47000))]);
        let trades = engine.mark_to_market(&mut p, &prices, now);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].close_reason, Some(CloseReason::StopLoss));
        assert!(p.is_flat());
    }

    #[test]
    fn test_close_without_position_is_noted() {
        let mut p = Portfolio::new(1, dec!(100));
        let exec = engine().apply(&mut p, &Decision::new(Signal::Close, "XRP"), dec!(0.5), Utc::now());
        assert!(exec.trades.is_empty());
        assert_eq!(
            exec.adjustments,
            vec![ExecutionAdjustment::NoPosition { coin: "XRP".into() }]
        );
    }
}
