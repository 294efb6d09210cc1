//! Indicator engine.
//!
//! Pure functions over an ordered bar sequence. Every indicator that cannot
//! be computed from the available history is left out of the result instead
//! of failing the whole computation.

pub mod oscillators;
pub mod trend;
pub mod volatility;

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ta::DataItem;

use crate::config::IndicatorConfig;
use crate::domain::Bar;

pub use trend::{Adx, Macd};
pub use volatility::Bollinger;

/// A value computed over a window of `period` bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Windowed<T> {
    pub period: usize,
    pub value: T,
}

impl<T> Windowed<T> {
    pub fn new(period: usize, value: T) -> Self {
        Self { period, value }
    }
}

/// Latest indicator values for one coin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub price: Option<f64>,
    /// Simple moving averages keyed by window
    pub sma: BTreeMap<usize, f64>,
    /// Exponential moving averages keyed by window
    pub ema: BTreeMap<usize, f64>,
    pub macd: Option<Macd>,
    pub rsi: Option<Windowed<f64>>,
    pub bollinger: Option<Bollinger>,
    pub atr: Option<Windowed<f64>>,
    pub adx: Option<Windowed<Adx>>,
    pub cci: Option<Windowed<f64>>,
    pub williams_r: Option<Windowed<f64>>,
    /// Standard deviation of recent closes over their mean
    pub volatility: Option<f64>,
    /// Percent change over the window, in bars
    pub change: Option<Windowed<f64>>,
}

impl IndicatorSet {
    /// Flattened `name -> value` view, skipping missing indicators.
    /// Windowed names carry their period, e.g. `sma_20` or `rsi_14`.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        let mut push = |name: String, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                out.push((name, v));
            }
        };
        push("price".into(), self.price);
        for (window, value) in &self.sma {
            push(format!("sma_{}", window), Some(*value));
        }
        for (window, value) in &self.ema {
            push(format!("ema_{}", window), Some(*value));
        }
        push("macd".into(), self.macd.map(|m| m.macd));
        push("macd_signal".into(), self.macd.map(|m| m.signal));
        push("macd_histogram".into(), self.macd.map(|m| m.histogram));
        if let Some(w) = self.rsi {
            push(format!("rsi_{}", w.period), Some(w.value));
        }
        push("bb_upper".into(), self.bollinger.map(|b| b.upper));
        push("bb_middle".into(), self.bollinger.map(|b| b.middle));
        push("bb_lower".into(), self.bollinger.map(|b| b.lower));
        push("bb_percent_b".into(), self.bollinger.map(|b| b.percent_b));
        if let Some(w) = self.atr {
            push(format!("atr_{}", w.period), Some(w.value));
        }
        if let Some(w) = self.adx {
            push(format!("adx_{}", w.period), Some(w.value.adx));
            push(format!("plus_di_{}", w.period), Some(w.value.plus_di));
            push(format!("minus_di_{}", w.period), Some(w.value.minus_di));
        }
        if let Some(w) = self.cci {
            push(format!("cci_{}", w.period), Some(w.value));
        }
        if let Some(w) = self.williams_r {
            push(format!("williams_r_{}", w.period), Some(w.value));
        }
        push("volatility".into(), self.volatility);
        if let Some(w) = self.change {
            push(format!("change_{}d", w.period), Some(w.value));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn to_item(bar: &Bar) -> Option<DataItem> {
    DataItem::builder()
        .open(bar.open.to_f64()?)
        .high(bar.high.to_f64()?)
        .low(bar.low.to_f64()?)
        .close(bar.close.to_f64()?)
        .volume(bar.volume.to_f64()?)
        .build()
        .ok()
}

/// Compute every indicator the history allows, over the configured windows.
///
/// Bars the indicator library rejects (e.g. high below low) are skipped.
pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> IndicatorSet {
    let items: Vec<DataItem> = bars.iter().filter_map(to_item).collect();
    let closes: Vec<f64> = items.iter().map(ta::Close::close).collect();

    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    let windowed = |period: usize, v: Option<f64>| finite(v).map(|v| Windowed::new(period, v));
    let by_window = |windows: &[usize], f: fn(&[f64], usize) -> Option<f64>| {
        windows
            .iter()
            .filter_map(|w| finite(f(&closes, *w)).map(|v| (*w, v)))
            .collect::<BTreeMap<usize, f64>>()
    };

    IndicatorSet {
        price: closes.last().copied(),
        sma: by_window(&config.sma_windows, trend::sma),
        ema: by_window(&config.ema_windows, trend::ema),
        macd: trend::macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal),
        rsi: windowed(config.rsi_period, oscillators::rsi(&closes, config.rsi_period)),
        bollinger: volatility::bollinger(&closes, config.bollinger_period, config.bollinger_std),
        atr: windowed(config.atr_period, volatility::atr(&items, config.atr_period)),
        adx: trend::adx(&items, config.adx_period).map(|a| Windowed::new(config.adx_period, a)),
        cci: windowed(config.cci_period, oscillators::cci(&items, config.cci_period)),
        williams_r: windowed(
            config.williams_period,
            oscillators::williams_r(&items, config.williams_period),
        ),
        volatility: finite(volatility::relative_volatility(&closes, config.volatility_window)),
        change: windowed(
            config.change_window,
            volatility::change_pct(&closes, config.change_window),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = Decimal::from(100 + (i as i64 % 7) * 3 + i as i64);
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open: close,
                    high: close + Decimal::from(2),
                    low: close - Decimal::from(2),
                    close,
                    volume: Decimal::from(1000),
                }
            })
            .collect()
    }

    #[test]
    fn test_short_history_omits_long_windows() {
        let set = compute(&bars(10), &IndicatorConfig::default());
        assert!(set.price.is_some());
        assert!(set.sma.contains_key(&7));
        assert!(!set.sma.contains_key(&14));
        assert!(set.macd.is_none());
        assert!(set.bollinger.is_none());
        assert!(set.change.is_some());
    }

    #[test]
    fn test_full_history_computes_everything() {
        let set = compute(&bars(60), &IndicatorConfig::default());
        let entries = set.entries();
        assert_eq!(entries.len(), 23);
        assert!(entries.iter().any(|(name, _)| name == "sma_30"));
        assert!(entries.iter().any(|(name, _)| name == "change_7d"));
    }

    #[test]
    fn test_custom_windows_are_named_by_period() {
        let config = IndicatorConfig {
            sma_windows: vec![5, 50],
            ema_windows: vec![9],
            rsi_period: 7,
            ..IndicatorConfig::default()
        };
        let set = compute(&bars(60), &config);
        let names: Vec<String> = set.entries().into_iter().map(|(name, _)| name).collect();
        for expected in ["sma_5", "sma_50", "ema_9", "rsi_7"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(!names.iter().any(|n| n == "sma_7" || n == "ema_12" || n == "rsi_14"));
    }

    #[test]
    fn test_empty_history() {
        let set = compute(&[], &IndicatorConfig::default());
        assert!(set.is_empty());
    }
}
