use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// An open leveraged position in one coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coin: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Volume-weighted average entry price
    pub avg_entry: Decimal,
    pub leverage: u32,
    /// Cash committed as margin
    pub margin: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Notional at entry
    pub fn entry_notional(&self) -> Decimal {
        self.quantity * self.avg_entry
    }

    /// Notional at the given price
    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Leveraged PnL at the given price, before fees
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.avg_entry) * self.quantity * self.side.sign() * Decimal::from(self.leverage)
    }

    /// Margin plus unrealized PnL
    pub fn mark_value(&self, price: Decimal) -> Decimal {
        self.margin + self.unrealized_pnl(price)
    }

    /// Whether the price breaches the stop-loss
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match (self.stop_loss, self.side) {
            (Some(stop), Side::Long) => price <= stop,
            (Some(stop), Side::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Whether the price reaches the take-profit
    pub fn target_hit(&self, price: Decimal) -> bool {
        match (self.take_profit, self.side) {
            (Some(target), Side::Long) => price >= target,
            (Some(target), Side::Short) => price <= target,
            (None, _) => false,
        }
    }
}
