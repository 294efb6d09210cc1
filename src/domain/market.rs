use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Latest price for one coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub coin: String,
    pub price: Decimal,
    /// 24 hour change in percent (e.g., 2.5 = +2.5%)
    pub change_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(coin: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            coin: coin.into(),
            price,
            change_24h: Decimal::ZERO,
            timestamp,
        }
    }

    /// Quote implied by a bar close, used when replaying history
    pub fn from_bar(coin: &str, bar: &Bar, previous: Option<&Bar>) -> Self {
        let change_24h = match previous {
            Some(prev) if !prev.close.is_zero() => {
                (bar.close - prev.close) / prev.close * Decimal::ONE_HUNDRED
            }
            _ => Decimal::ZERO,
        };
        Self {
            coin: coin.to_string(),
            price: bar.close,
            change_24h,
            timestamp: bar.timestamp,
        }
    }
}
