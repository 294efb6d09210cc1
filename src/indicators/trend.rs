//! Trend indicators: moving averages, MACD and ADX

use serde::{Deserialize, Serialize};
use ta::indicators::{
    ExponentialMovingAverage, MovingAverageConvergenceDivergence, SimpleMovingAverage,
};
use ta::{Close, DataItem, High, Low, Next};

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut indicator = SimpleMovingAverage::new(period).ok()?;
    values.iter().map(|v| indicator.next(*v)).last()
}

/// Exponential moving average over the whole series
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut indicator = ExponentialMovingAverage::new(period).ok()?;
    values.iter().map(|v| indicator.next(*v)).last()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if values.len() < slow + signal {
        return None;
    }
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
    let out = values.iter().map(|v| indicator.next(*v)).last()?;
    Some(Macd {
        macd: out.macd,
        signal: out.signal,
        histogram: out.histogram,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Wilder's average directional index. Needs `2 * period` bars.
pub fn adx(items: &[DataItem], period: usize) -> Option<Adx> {
    if period == 0 || items.len() < 2 * period {
        return None;
    }

    let mut tr = Vec::with_capacity(items.len() - 1);
    let mut plus_dm = Vec::with_capacity(items.len() - 1);
    let mut minus_dm = Vec::with_capacity(items.len() - 1);
    for pair in items.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let up = cur.high() - prev.high();
        let down = prev.low() - cur.low();
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (cur.high() - cur.low())
                .max((cur.high() - prev.close()).abs())
                .max((cur.low() - prev.close()).abs()),
        );
    }

    let p = period as f64;
    let mut sm_tr: f64 = tr[..period].iter().sum();
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();

    let di = |plus: f64, minus: f64, range: f64| -> (f64, f64) {
        if range <= 0.0 {
            (0.0, 0.0)
        } else {
            (100.0 * plus / range, 100.0 * minus / range)
        }
    };
    let dx = |plus_di: f64, minus_di: f64| -> f64 {
        let sum = plus_di + minus_di;
        if sum <= 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    };

    let (mut plus_di, mut minus_di) = di(sm_plus, sm_minus, sm_tr);
    let mut dxs = vec![dx(plus_di, minus_di)];
    for i in period..tr.len() {
        sm_tr = sm_tr - sm_tr / p + tr[i];
        sm_plus = sm_plus - sm_plus / p + plus_dm[i];
        sm_minus = sm_minus - sm_minus / p + minus_dm[i];
        let (pd, md) = di(sm_plus, sm_minus, sm_tr);
        plus_di = pd;
        minus_di = md;
        dxs.push(dx(pd, md));
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / p;
    for value in &dxs[period..] {
        adx = (adx * (p - 1.0) + value) / p;
    }

    Some(Adx {
        adx,
        plus_di,
        minus_di,
    })
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
    fn test_sma_needs_full_window() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 3), Some(3.0));
    }

    #[test]
    fn test_ema_tracks_constant_series() {
        let values = vec![10.0; 40];
        let value = ema(&values, 12).unwrap();
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_omitted_on_short_history() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(macd(&values, 12, 26, 9).is_none());
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let items: Vec<DataItem> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                item(base + 1.0, base - 1.0, base)
            })
            .collect();
        let result = adx(&items, 14).unwrap();
        assert!(result.plus_di > result.minus_di);
        assert!(result.adx > 50.0);
    }
}
