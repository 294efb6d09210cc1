//! Momentum oscillators

use ta::indicators::RelativeStrengthIndex;
use ta::{Close, DataItem, High, Low, Next};

/// Relative strength index. Needs `period + 1` closes.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let mut indicator = RelativeStrengthIndex::new(period).ok()?;
    values.iter().map(|v| indicator.next(*v)).last()
}

/// Commodity channel index over typical prices
pub fn cci(items: &[DataItem], period: usize) -> Option<f64> {
    if period == 0 || items.len() < period {
        return None;
    }
    let typical: Vec<f64> = items[items.len() - period..]
        .iter()
        .map(|i| (i.high() + i.low() + i.close()) / 3.0)
        .collect();
    let mean = typical.iter().sum::<f64>() / period as f64;
    let mean_dev = typical.iter().map(|t| (t - mean).abs()).sum::<f64>() / period as f64;
    let last = *typical.last()?;
    if mean_dev == 0.0 {
        return Some(0.0);
    }
    Some((last - mean) / (0.015 * mean_dev))
}

/// Williams %R in [-100, 0]; a flat range reads as the midpoint
pub fn williams_r(items: &[DataItem], period: usize) -> Option<f64> {
    if period == 0 || items.len() < period {
        return None;
    }
    let window = &items[items.len() - period..];
    let highest = window.iter().map(|i| i.high()).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|i| i.low()).fold(f64::MAX, f64::min);
    let close = window.last()?.close();
    if highest <= lowest {
        return Some(-50.0);
    }
    Some((highest - close) / (highest - lowest) * -100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(high: f64, low: f64, close: f64) -> DataItem {
        DataItem::builder()
            .open(close)
            .high(high)
            .low(low)
            .close(close)
            .volume(0.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_rsi_rising_series_is_overbought() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&values, 14).unwrap() > 70.0);
        assert!(rsi(&values[..14], 14).is_none());
    }

    #[test]
    fn test_williams_r_at_high_is_zero() {
        let items: Vec<DataItem> = (0..14).map(|i| item(10.0 + i as f64, 5.0, 10.0 + i as f64)).collect();
        assert!(williams_r(&items, 14).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_cci_flat_is_zero() {
        let items: Vec<DataItem> = (0..20).map(|_| item(10.0, 10.0, 10.0)).collect();
        assert_eq!(cci(&items, 20), Some(0.0));
    }
}
