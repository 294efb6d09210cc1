use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::MarketDataProvider;
use crate::config::MarketConfig;
use crate::domain::{Bar, PriceQuote};
use crate::error::MarketDataError;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() <= ttl).then(|| self.value.clone())
    }
}

/// Cache TTLs and stale windows
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub price_ttl: Duration,
    pub history_ttl: Duration,
    pub stale_price: Duration,
    pub stale_history: Duration,
}

impl From<&MarketConfig> for CachePolicy {
    fn from(config: &MarketConfig) -> Self {
        Self {
            price_ttl: Duration::from_secs(config.price_ttl_secs),
            history_ttl: Duration::from_secs(config.history_ttl_secs),
            stale_price: Duration::from_secs(config.stale_price_secs),
            stale_history: Duration::from_secs(config.stale_history_secs),
        }
    }
}

/// Read-through cache shared by all models.
///
/// Lookup order: fresh entry, provider, stale entry within the stale window,
/// then the provider's error.
pub struct CachedMarketData {
    inner: Arc<dyn MarketDataProvider>,
    policy: CachePolicy,
    prices: RwLock<HashMap<String, Entry<PriceQuote>>>,
    history: RwLock<HashMap<(String, u32), Entry<Vec<Bar>>>>,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketDataProvider>, policy: CachePolicy) -> Self {
        Self {
            inner,
            policy,
            prices: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every cached entry
    pub async fn clear(&self) {
        self.prices.write().await.clear();
        self.history.write().await.clear();
    }
}

#[async_trait]
impl MarketDataProvider for CachedMarketData {
    async fn get_price(&self, coin: &str) -> Result<PriceQuote, MarketDataError> {
        if let Some(quote) = self
            .prices
            .read()
            .await
            .get(coin)
            .and_then(|e| e.fresh(self.policy.price_ttl))
        {
            return Ok(quote);
        }

        match self.inner.get_price(coin).await {
            Ok(quote) => {
                self.prices.write().await.insert(
                    coin.to_string(),
                    Entry {
                        value: quote.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(quote)
            }
            Err(e) => {
                let stale = self
                    .prices
                    .read()
                    .await
                    .get(coin)
                    .and_then(|entry| entry.fresh(self.policy.stale_price));
                match stale {
                    Some(quote) => {
                        warn!(coin, error = %e, "serving stale price");
                        Ok(quote)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn get_history(&self, coin: &str, days: u32) -> Result<Vec<Bar>, MarketDataError> {
        let key = (coin.to_string(), days);
        if let Some(bars) = self
            .history
            .read()
            .await
            .get(&key)
            .and_then(|e| e.fresh(self.policy.history_ttl))
        {
            debug!(coin, days, "history cache hit");
            return Ok(bars);
        }

        match self.inner.get_history(coin, days).await {
            Ok(bars) => {
                self.history.write().await.insert(
                    key,
                    Entry {
                        value: bars.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(bars)
            }
            Err(e) => {
                let stale = self
                    .history
                    .read()
                    .await
                    .get(&key)
                    .and_then(|entry| entry.fresh(self.policy.stale_history));
                match stale {
                    Some(bars) => {
                        warn!(coin, error = %e, "serving stale history");
                        Ok(bars)
                    }
                    None => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockMarketDataProvider;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn policy() -> CachePolicy {
        CachePolicy {
            price_ttl: Duration::from_secs(5),
            history_ttl: Duration::from_secs(60),
            stale_price: Duration::from_secs(100),
            stale_history: Duration::from_secs(1000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_price_is_served_from_cache() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_price()
            .times(1)
            .returning(|coin| Ok(PriceQuote::new(coin, dec!(50000), Utc::now())));
        let cache = CachedMarketData::new(Arc::new(mock), policy());

        let a = cache.get_price("BTC").await.unwrap();
        let b = cache.get_price("BTC").await.unwrap();
        assert_eq!(a.price, b.price);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_price_served_when_provider_fails() {
        let mut mock = MockMarketDataProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_get_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|coin| Ok(PriceQuote::new(coin, dec!(3000), Utc::now())));
        mock.expect_get_price()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|coin| Err(MarketDataError::unavailable(coin, "down")));
        let cache = CachedMarketData::new(Arc::new(mock), policy());

        cache.get_price("ETH").await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let stale = cache.get_price("ETH").await.unwrap();
        assert_eq!(stale.price, dec!(3000));

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(cache.get_price("ETH").await.is_err());
    }
}
