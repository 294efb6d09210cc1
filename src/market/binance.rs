//! Binance public REST market data

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::MarketDataProvider;
use crate::config::MarketConfig;
use crate::domain::{Bar, PriceQuote};
use crate::error::MarketDataError;

/// 24h ticker payload, numbers arrive as strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: String,
    price_change_percent: String,
    close_time: i64,
}

/// Binance spot market data client
pub struct BinanceMarketData {
    client: reqwest::Client,
    base_url: String,
    quote_asset: String,
}

impl BinanceMarketData {
    pub fn new(config: &MarketConfig) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MarketDataError::unavailable("*", format!("client build failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            quote_asset: config.quote_asset.clone(),
        })
    }

    fn symbol(&self, coin: &str) -> String {
        format!("{}{}", coin.to_uppercase(), self.quote_asset)
    }

    async fn get_json(&self, coin: &str, url: &str) -> Result<reqwest::Response, MarketDataError> {
        debug!("Fetching market data: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketDataError::unavailable(coin, format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            // Binance answers 400 for unknown symbols
            return Err(MarketDataError::UnsupportedCoin(coin.to_string()));
        }
        if !status.is_success() {
            warn!(coin, %status, "market data API error");
            return Err(MarketDataError::unavailable(coin, format!("API status {}", status)));
        }
        Ok(response)
    }

    /// Parse a single kline row: [open_time, open, high, low, close, volume, ...]
    fn parse_kline_row(row: &[serde_json::Value]) -> Option<Bar> {
        if row.len() < 6 {
            return None;
        }
        let timestamp = DateTime::<Utc>::from_timestamp_millis(row[0].as_i64()?)?;
        Some(Bar {
            timestamp,
            open: row[1].as_str()?.parse().ok()?,
            high: row[2].as_str()?.parse().ok()?,
            low: row[3].as_str()?.parse().ok()?,
            close: row[4].as_str()?.parse().ok()?,
            volume: row[5].as_str()?.parse().ok()?,
        })
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketData {
    async fn get_price(&self, coin: &str) -> Result<PriceQuote, MarketDataError> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            self.symbol(coin)
        );
        let ticker: Ticker24h = self
            .get_json(coin, &url)
            .await?
            .json()
            .await
            .map_err(|e| MarketDataError::Malformed {
                coin: coin.to_string(),
                reason: e.to_string(),
            })?;

        let malformed = |field: &str| MarketDataError::Malformed {
            coin: coin.to_string(),
            reason: format!("bad {}", field),
        };
        let price: Decimal = ticker.last_price.parse().map_err(|_| malformed("lastPrice"))?;
        let change_24h: Decimal = ticker
            .price_change_percent
            .parse()
            .map_err(|_| malformed("priceChangePercent"))?;
        let timestamp =
            DateTime::<Utc>::from_timestamp_millis(ticker.close_time).unwrap_or_else(Utc::now);

        Ok(PriceQuote {
            coin: coin.to_uppercase(),
            price,
            change_24h,
            timestamp,
        })
    }

    async fn get_history(&self, coin: &str, days: u32) -> Result<Vec<Bar>, MarketDataError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval=1d&limit={}",
            self.base_url,
            self.symbol(coin),
            days.clamp(1, 1000)
        );
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(coin, &url)
            .await?
            .json()
            .await
            .map_err(|e| MarketDataError::Malformed {
                coin: coin.to_string(),
                reason: e.to_string(),
            })?;

        let mut bars: Vec<Bar> = rows
            .iter()
            .filter_map(|row| Self::parse_kline_row(row))
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);

        if bars.is_empty() {
            return Err(MarketDataError::unavailable(coin, "no klines returned"));
        }
        debug!("Fetched {} daily bars for {}", bars.len(), coin);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = vec![
            json!(1_700_000_000_000i64),
            json!("100.5"),
            json!("110"),
            json!("99"),
            json!("105.25"),
            json!("1234.5"),
            json!(1_700_086_399_999i64),
        ];
        let bar = BinanceMarketData::parse_kline_row(&row).unwrap();
        assert_eq!(bar.open, dec!(100.5));
        assert_eq!(bar.close, dec!(105.25));
        assert_eq!(bar.volume, dec!(1234.5));
    }

    #[test]
    fn test_parse_kline_row_rejects_short_row() {
        assert!(BinanceMarketData::parse_kline_row(&[json!(1)]).is_none());
    }

    #[test]
    fn test_symbol_uses_quote_asset() {
        let provider = BinanceMarketData::new(&MarketConfig::default()).unwrap();
        assert_eq!(provider.symbol("btc"), "BTCUSDT");
    }
}
