//! Keyword scan over free text, the last structured tier

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

use super::fields::{normalize_confidence, DEFAULT_CONFIDENCE};
use crate::domain::{Decision, Signal};

/// Signal vocabulary. Multi-word phrases are listed before the words they contain.
const VOCABULARY: &[(Signal, &[&str])] = &[
    (
        Signal::Buy,
        &["buy_to_enter", "enter long", "buy", "long", "买入", "做多"],
    ),
    (
        Signal::Sell,
        &["sell_to_enter", "enter short", "sell", "short", "卖出", "做空"],
    ),
    (Signal::Hold, &["no action", "hold", "wait", "持有", "观望"]),
    (
        Signal::Close,
        &["close_position", "take profit", "stop loss", "close", "exit", "平仓"],
    ),
];

static KEYWORD_PATTERNS: LazyLock<Vec<(Signal, Regex)>> = LazyLock::new(|| {
    VOCABULARY
        .iter()
        .flat_map(|(signal, words)| {
            words.iter().filter_map(move |word| {
                let escaped = regex::escape(word);
                let pattern = if word.is_ascii() {
                    format!(r"(?i)\b{}\b", escaped)
                } else {
                    escaped
                };
                Regex::new(&pattern).ok().map(|re| (*signal, re))
            })
        })
        .collect()
});

const NUMBER: &str = r"\$?\s*([0-9][0-9,]*(?:\.[0-9]+)?)";

static QUANTITY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:quantity|qty|size|amount)\b[:\s=]+{}", NUMBER)).ok()
});
static LEVERAGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bleverage\b[:\s=]+([0-9]+)|\b([0-9]+)\s*x\b)").ok()
});
static TAKE_PROFIT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:profit.?target|take.?profit|target.?price|target|tp)\b[:\s=]+{}",
        NUMBER
    ))
    .ok()
});
static STOP_LOSS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:stop.?loss|stop|sl)\b[:\s=]+{}", NUMBER)).ok()
});
static CONFIDENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bconfidence\b[:\s=]+([0-9]*\.?[0-9]+)\s*(%)?").ok()
});
static MARKET_NOTE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:market|analysis|trend)\b[:\s]+([^\n.]{20,200})").ok()
});

/// Longest section scanned per coin
const SECTION_LIMIT: usize = 500;
/// Length of the excerpt used when no reasoning marker is found
const EXCERPT_LIMIT: usize = 200;

/// Truncate on a char boundary
pub fn excerpt(text: &str, limit: usize) -> String {
    text.trim().chars().take(limit).collect::<String>().trim().to_string()
}

fn capture_decimal(re: &Option<Regex>, text: &str) -> Option<Decimal> {
    let caps = re.as_ref()?.captures(text)?;
    let raw = caps.iter().skip(1).flatten().next()?.as_str().replace(',', "");
    Decimal::from_str(&raw).ok().filter(|d| !d.is_zero())
}

/// Scans text for per-coin trading intent
pub struct KeywordScanner {
    coins: Vec<(String, Regex)>,
}

impl KeywordScanner {
    pub fn new(coins: &[String]) -> Self {
        let coins = coins
            .iter()
            .filter_map(|coin| {
                let upper = coin.to_uppercase();
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&upper)))
                    .ok()
                    .map(|re| (upper, re))
            })
            .collect();
        Self { coins }
    }

    /// Text from the first mention of `coin` up to the next line that
    /// mentions another coin, capped at `SECTION_LIMIT` chars
    fn section<'a>(&self, text: &'a str, index: usize) -> Option<&'a str> {
        let (_, re) = &self.coins[index];
        let start = re.find(text)?.start();
        let rest = &text[start..];

        let mut end = rest.len();
        let mut offset = 0;
        for (n, line) in rest.split_inclusive('\n').enumerate() {
            let mentions_other = self
                .coins
                .iter()
                .enumerate()
                .any(|(i, (_, other))| i != index && other.is_match(line));
            if n > 0 && mentions_other {
                end = offset;
                break;
            }
            offset += line.len();
        }

        let section = &rest[..end];
        let capped = match section.char_indices().nth(SECTION_LIMIT) {
            Some((byte, _)) => &section[..byte],
            None => section,
        };
        Some(capped)
    }

    /// Earliest vocabulary match wins
    fn signal(section: &str) -> Option<Signal> {
        KEYWORD_PATTERNS
            .iter()
            .filter_map(|(signal, re)| re.find(section).map(|m| (m.start(), *signal)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, signal)| signal)
    }

    fn reasoning(section: &str) -> String {
        MARKET_NOTE
            .as_ref()
            .and_then(|re| re.captures(section))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| excerpt(section, EXCERPT_LIMIT))
    }

    fn decision(&self, text: &str, index: usize) -> Option<Decision> {
        let section = self.section(text, index)?;
        let signal = Self::signal(section)?;

        let confidence = CONFIDENCE
            .as_ref()
            .and_then(|re| re.captures(section))
            .and_then(|caps| {
                let value: f64 = caps.get(1)?.as_str().parse().ok()?;
                Some(normalize_confidence(value, caps.get(2).is_some()))
            })
            .unwrap_or(DEFAULT_CONFIDENCE);

        let leverage = LEVERAGE
            .as_ref()
            .and_then(|re| re.captures(section))
            .and_then(|caps| caps.iter().skip(1).flatten().next())
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|l| *l >= 1);

        Some(Decision {
            signal,
            coin: Some(self.coins[index].0.clone()),
            confidence,
            reasoning: Self::reasoning(section),
            quantity: capture_decimal(&QUANTITY, section),
            leverage,
            stop_loss: capture_decimal(&STOP_LOSS, section),
            take_profit: capture_decimal(&TAKE_PROFIT, section),
        })
    }

    /// One decision per coin whose section carries a signal word
    pub fn scan(&self, text: &str) -> Vec<Decision> {
        (0..self.coins.len())
            .filter_map(|i| self.decision(text, i))
            .collect()
    }
}
