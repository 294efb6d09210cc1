//! Market data access.
//!
//! `MarketDataProvider` is the seam to the outside quote source. The
//! scheduler talks to a `CachedMarketData` shared by every model so repeated
//! reads inside the TTL never reach the network.

pub mod binance;
pub mod cache;

use async_trait::async_trait;

use crate::domain::{Bar, PriceQuote};
use crate::error::MarketDataError;

pub use binance::BinanceMarketData;
pub use cache::CachedMarketData;

/// Source of prices and daily bars
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest price and 24h change for a coin
    async fn get_price(&self, coin: &str) -> Result<PriceQuote, MarketDataError>;

    /// Daily bars for the last `days` days, oldest first
    async fn get_history(&self, coin: &str, days: u32) -> Result<Vec<Bar>, MarketDataError>;
}
