//! Historical bar series and the CSV loader

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::Bar;
use crate::error::{ArenaError, Result};

/// Daily bars per coin, each sorted by timestamp without duplicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: BTreeMap<String, Vec<Bar>>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coin: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        self.bars.insert(coin.to_uppercase(), bars);
    }

    pub fn coins(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    pub fn bars(&self, coin: &str) -> &[Bar] {
        self.bars.get(coin).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.bars.values().all(Vec::is_empty)
    }

    /// Every bar timestamp across all coins, ascending
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        let set: BTreeSet<DateTime<Utc>> = self
            .bars
            .values()
            .flat_map(|bars| bars.iter().map(|b| b.timestamp))
            .collect();
        set.into_iter().collect()
    }

    /// Bars of `coin` up to and including `at`, at most `lookback` of them
    pub fn window(&self, coin: &str, at: DateTime<Utc>, lookback: usize) -> &[Bar] {
        let bars = self.bars(coin);
        let end = bars.partition_point(|b| b.timestamp <= at);
        &bars[end.saturating_sub(lookback)..end]
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<i64>() {
        // Unix timestamp (seconds or milliseconds)
        return if ts > 1_000_000_000_000 {
            Utc.timestamp_millis_opt(ts).single()
        } else {
            Utc.timestamp_opt(ts, 0).single()
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Load bars from CSV.
/// Expected format: timestamp,coin,open,high,low,close,volume (with header)
pub fn load_bars_csv<P: AsRef<Path>>(path: P) -> Result<BarSeries> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut by_coin: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    let mut loaded = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue; // Skip header
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 7 {
            warn!("Skipping malformed line {}: insufficient columns", i + 1);
            continue;
        }

        let timestamp = parse_timestamp(parts[0]).ok_or_else(|| {
            ArenaError::Validation(format!("invalid timestamp at line {}: {}", i + 1, parts[0]))
        })?;
        let prices: Option<Vec<Decimal>> = parts[2..7]
            .iter()
            .map(|p| Decimal::from_str(p).ok())
            .collect();
        let Some(prices) = prices else {
            warn!("Skipping malformed line {}: bad number", i + 1);
            continue;
        };

        by_coin
            .entry(parts[1].to_uppercase())
            .or_default()
            .push(Bar {
                timestamp,
                open: prices[0],
                high: prices[1],
                low: prices[2],
                close: prices[3],
                volume: prices[4],
            });
        loaded += 1;
    }

    let mut series = BarSeries::new();
    for (coin, bars) in by_coin {
        series.insert(&coin, bars);
    }
    info!("Loaded {} bars for {} coins", loaded, series.bars.len());
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn bar(day: u32, close: Decimal) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_window_and_timestamps() {
        let mut series = BarSeries::new();
        series.insert("btc", vec![bar(3, dec!(3)), bar(1, dec!(1)), bar(2, dec!(2)), bar(2, dec!(2))]);
        series.insert("ETH", vec![bar(2, dec!(20)), bar(4, dec!(40))]);

        assert_eq!(series.bars("BTC").len(), 3);
        assert_eq!(series.timestamps().len(), 4);

        let at = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let window = series.window("BTC", at, 2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].close, dec!(3));
        assert_eq!(series.window("ETH", at, 10).len(), 1);
        assert!(series.window("SOL", at, 10).is_empty());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("1704153600"), Some(expected));
        assert_eq!(parse_timestamp("1704153600000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_load_bars_csv() {
        let path = std::env::temp_dir().join(format!("arena-bars-{}.csv", uuid::Uuid::new_v4()));
        {
            let mut file = File::create(&path).unwrap();
            writeln!(file, "timestamp,coin,open,high,low,close,volume").unwrap();
            writeln!(file, "2024-01-02,btc,100,110,90,105,10").unwrap();
            writeln!(file, "2024-01-01,BTC,95,101,94,100,12").unwrap();
            writeln!(file, "2024-01-01,ETH,5,6").unwrap();
            writeln!(file, "2024-01-01,ETH,5,6,4,x,1").unwrap();
        }

        let series = load_bars_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let btc = series.bars("BTC");
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[0].close, dec!(100));
        assert!(series.bars("ETH").is_empty());
    }

    #[test]
    fn test_load_rejects_bad_timestamp() {
        let path = std::env::temp_dir().join(format!("arena-bars-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, "timestamp,coin,open,high,low,close,volume\nsoon,BTC,1,1,1,1,1\n").unwrap();
        let result = load_bars_csv(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ArenaError::Validation(_))));
    }
}
