//! Volatility measures

use serde::{Deserialize, Serialize};
use ta::indicators::{AverageTrueRange, BollingerBands};
use ta::{DataItem, Next};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Position of the last close inside the bands (%B), 0.5 when the bands collapse
    pub percent_b: f64,
}

pub fn bollinger(values: &[f64], period: usize, multiplier: f64) -> Option<Bollinger> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut indicator = BollingerBands::new(period, multiplier).ok()?;
    let out = values.iter().map(|v| indicator.next(*v)).last()?;
    let close = *values.last()?;
    let width = out.upper - out.lower;
    let percent_b = if width > 0.0 {
        (close - out.lower) / width
    } else {
        0.5
    };
    Some(Bollinger {
        upper: out.upper,
        middle: out.average,
        lower: out.lower,
        percent_b,
    })
}

/// Average true range. Needs `period + 1` bars.
pub fn atr(items: &[DataItem], period: usize) -> Option<f64> {
    if period == 0 || items.len() <= period {
        return None;
    }
    let mut indicator = AverageTrueRange::new(period).ok()?;
    items.iter().map(|i| indicator.next(i)).last()
}

/// Standard deviation of the last `period` closes relative to their mean
pub fn relative_volatility(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    if mean == 0.0 {
        return None;
    }
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some(variance.sqrt() / mean)
}

/// Percent change between the last close and the close `lookback` bars earlier
pub fn change_pct(values: &[f64], lookback: usize) -> Option<f64> {
    if values.len() <= lookback {
        return None;
    }
    let past = values[values.len() - 1 - lookback];
    if past == 0.0 {
        return None;
    }
    Some((values[values.len() - 1] - past) / past * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bollinger_flat_series() {
        let values = vec![50.0; 25];
        let bands = bollinger(&values, 20, 2.0).unwrap();
        assert!((bands.middle - 50.0).abs() < 1e-9);
        assert_eq!(bands.percent_b, 0.5);
    }

    #[test]
    fn test_change_pct() {
        let values = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 110.0];
        assert!((change_pct(&values, 7).unwrap() - 10.0).abs() < 1e-9);
        assert!(change_pct(&values[..7], 7).is_none());
    }

    #[test]
    fn test_relative_volatility_zero_for_constant() {
        assert_eq!(relative_volatility(&[3.0; 20], 20), Some(0.0));
    }
}
