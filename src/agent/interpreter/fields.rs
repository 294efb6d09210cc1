//! Alias tables and typed extraction of decision records

use rust_decimal::prelude::*;
use serde_json::{Map, Value};

use crate::domain::{Decision, Signal};

pub const SIGNAL_KEYS: &[&str] = &["signal", "decision", "action", "side", "trade_signal"];
pub const COIN_KEYS: &[&str] = &["coin", "symbol", "asset", "ticker", "pair"];
pub const CONFIDENCE_KEYS: &[&str] = &["confidence", "conviction", "certainty"];
pub const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "size", "amount", "position_size"];
pub const LEVERAGE_KEYS: &[&str] = &["leverage", "lev"];
pub const STOP_LOSS_KEYS: &[&str] = &["stop_loss", "stoploss", "sl", "stop", "stop_price"];
pub const TAKE_PROFIT_KEYS: &[&str] = &[
    "take_profit",
    "profit_target",
    "takeprofit",
    "tp",
    "target",
    "target_price",
];
pub const REASONING_KEYS: &[&str] = &[
    "reasoning",
    "justification",
    "rationale",
    "analysis",
    "reason",
    "explanation",
];
/// Keys under which a list of decisions may be nested
pub const LIST_KEYS: &[&str] = &["decisions", "trades", "actions", "orders"];

/// Sections of a structured reasoning object, rendered first and in this order
const REASONING_SECTIONS: &[&str] = &[
    "market_analysis",
    "technical_signals",
    "risk_assessment",
    "decision_rationale",
];

/// Confidence assumed when a record does not state one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Map a free-form signal word onto the canonical vocabulary
pub fn normalize_signal(raw: &str) -> Option<Signal> {
    let key: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    let signal = match key.as_str() {
        "buy" | "buy_to_enter" | "long" | "enter_long" | "open_long" | "go_long" | "买入"
        | "做多" => Signal::Buy,
        "sell" | "sell_to_enter" | "short" | "enter_short" | "open_short" | "go_short"
        | "卖出" | "做空" => Signal::Sell,
        "hold" | "wait" | "no_action" | "none" | "neutral" | "skip" | "持有" | "观望" => {
            Signal::Hold
        }
        "close" | "close_position" | "exit" | "close_long" | "close_short" | "take_profit"
        | "stop_loss" | "平仓" => Signal::Close,
        _ => return None,
    };
    Some(signal)
}

/// Canonical coin symbol: upper case, quote currency and separators removed
pub fn normalize_coin(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    let base = upper.split(['/', '-', '_', ':']).next().unwrap_or_default();
    let base = ["USDT", "USDC", "USD", "PERP"]
        .iter()
        .find_map(|q| base.strip_suffix(q).filter(|b| !b.is_empty()))
        .unwrap_or(base);
    let cleaned: String = base.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// First value found under any of the given keys, matched case-insensitively
pub fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        obj.get(*key).or_else(|| {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    })
    .filter(|v| !v.is_null())
}

/// Numeric text with currency signs, separators and units stripped.
/// The flag reports whether a percent sign was present.
fn clean_number(raw: &str) -> (String, bool) {
    let percent = raw.contains('%');
    let cleaned: String = raw
        .trim()
        .trim_end_matches(['x', 'X'])
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    (cleaned, percent)
}

pub fn value_to_f64(value: &Value) -> Option<(f64, bool)> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| (f, false)),
        Value::String(s) => {
            let (cleaned, percent) = clean_number(s);
            cleaned.parse::<f64>().ok().map(|f| (f, percent))
        }
        _ => None,
    }
    .filter(|(f, _)| f.is_finite())
}

pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => clean_number(s).0,
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Confidence in [0, 1]; values above 1 or marked with `%` are percentages
pub fn normalize_confidence(raw: f64, percent: bool) -> f64 {
    let value = if percent || raw > 1.0 { raw / 100.0 } else { raw };
    value.clamp(0.0, 1.0)
}

fn positive_decimal(obj: &Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    lookup(obj, keys)
        .and_then(value_to_decimal)
        .filter(|d| d.is_sign_positive() && !d.is_zero())
}

fn leverage(obj: &Map<String, Value>) -> Option<u32> {
    let (value, _) = lookup(obj, LEVERAGE_KEYS).and_then(value_to_f64)?;
    let rounded = value.round();
    (rounded >= 1.0).then(|| rounded.min(u32::MAX as f64) as u32)
}

/// Render a reasoning value as plain text, flattening nested objects
pub fn flatten_reasoning(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => {
            let mut parts = Vec::new();
            for key in REASONING_SECTIONS {
                if let Some(text) = map.get(*key).map(flatten_reasoning) {
                    if !text.is_empty() {
                        parts.push(format!("{}: {}", key, text));
                    }
                }
            }
            for (key, v) in map {
                if REASONING_SECTIONS.contains(&key.as_str()) {
                    continue;
                }
                let text = flatten_reasoning(v);
                if !text.is_empty() {
                    parts.push(format!("{}: {}", key, text));
                }
            }
            parts.join("\n")
        }
        Value::Array(items) => items
            .iter()
            .map(flatten_reasoning)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn reasoning(obj: &Map<String, Value>) -> String {
    REASONING_KEYS
        .iter()
        .filter_map(|key| lookup(obj, &[*key]))
        .map(flatten_reasoning)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build a decision from one record. `coin_hint` comes from an enclosing
/// coin-keyed map and wins over a coin field inside the record.
pub fn decision_from_object(obj: &Map<String, Value>, coin_hint: Option<&str>) -> Option<Decision> {
    let signal = lookup(obj, SIGNAL_KEYS)
        .and_then(Value::as_str)
        .and_then(normalize_signal)?;

    let coin = coin_hint.and_then(normalize_coin).or_else(|| {
        lookup(obj, COIN_KEYS)
            .and_then(Value::as_str)
            .and_then(normalize_coin)
    });

    let confidence = lookup(obj, CONFIDENCE_KEYS)
        .and_then(value_to_f64)
        .map(|(v, pct)| normalize_confidence(v, pct))
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(Decision {
        signal,
        coin,
        confidence,
        reasoning: reasoning(obj),
        quantity: positive_decimal(obj, QUANTITY_KEYS),
        leverage: leverage(obj),
        stop_loss: positive_decimal(obj, STOP_LOSS_KEYS),
        take_profit: positive_decimal(obj, TAKE_PROFIT_KEYS),
    })
}

/// Every decision a parsed document describes.
///
/// Accepted shapes: a single record, a list of records, a record holding a
/// list under one of `LIST_KEYS`, or a map from coin to record.
pub fn decisions_from_value(value: &Value) -> Vec<Decision> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|obj| decision_from_object(obj, None))
            .collect(),
        Value::Object(obj) => {
            if let Some(list) = lookup(obj, LIST_KEYS).filter(|v| v.is_array()) {
                return decisions_from_value(list);
            }
            if let Some(decision) = decision_from_object(obj, None) {
                return vec![decision];
            }
            obj.iter()
                .filter_map(|(key, v)| {
                    v.as_object()
                        .and_then(|inner| decision_from_object(inner, Some(key)))
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_signal_aliases() {
        assert_eq!(normalize_signal("BUY_TO_ENTER"), Some(Signal::Buy));
        assert_eq!(normalize_signal("enter short"), Some(Signal::Sell));
        assert_eq!(normalize_signal("close-position"), Some(Signal::Close));
        assert_eq!(normalize_signal("观望"), Some(Signal::Hold));
        assert_eq!(normalize_signal("做多"), Some(Signal::Buy));
        assert_eq!(normalize_signal("moon"), None);
    }

    #[test]
    fn test_coin_normalization() {
        assert_eq!(normalize_coin("btc").as_deref(), Some("BTC"));
        assert_eq!(normalize_coin("ETHUSDT").as_deref(), Some("ETH"));
        assert_eq!(normalize_coin("SOL/USDT").as_deref(), Some("SOL"));
        assert_eq!(normalize_coin("  "), None);
    }

    #[test]
    fn test_tolerant_numbers() {
        let obj = json!({
            "action": "long",
            "symbol": "BTCUSDT",
            "confidence": "75%",
            "size": "0.25",
            "leverage": "10x",
            "sl": "$42,000",
            "target_price": 48000.5,
        });
        let d = decision_from_object(obj.as_object().unwrap(), None).unwrap();
        assert_eq!(d.signal, Signal::Buy);
        assert_eq!(d.coin.as_deref(), Some("BTC"));
        assert!((d.confidence - 0.75).abs() < 1e-9);
        assert_eq!(d.quantity, Some(dec!(0.25)));
        assert_eq!(d.leverage, Some(10));
        assert_eq!(d.stop_loss, Some(dec!(42000)));
        assert_eq!(d.take_profit, Some(dec!(48000.5)));
    }

    #[test]
    fn test_zero_prices_are_absent() {
        let obj = json!({"signal": "hold", "stop_loss": 0, "profit_target": 0, "leverage": 0});
        let d = decision_from_object(obj.as_object().unwrap(), Some("eth")).unwrap();
        assert_eq!(d.coin.as_deref(), Some("ETH"));
        assert_eq!(d.stop_loss, None);
        assert_eq!(d.take_profit, None);
        assert_eq!(d.leverage, None);
        assert_eq!(d.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_reasoning_object_is_flattened() {
        let obj = json!({
            "signal": "sell",
            "reasoning": {
                "decision_rationale": "fade the rally",
                "market_analysis": "overextended"
            },
            "justification": "short term top"
        });
        let d = decision_from_object(obj.as_object().unwrap(), Some("SOL")).unwrap();
        assert_eq!(
            d.reasoning,
            "market_analysis: overextended\ndecision_rationale: fade the rally\nshort term top"
        );
    }

    #[test]
    fn test_document_shapes() {
        let map = json!({
            "BTC": {"signal": "buy_to_enter", "quantity": 0.1},
            "ETH": {"signal": "hold"},
            "note": "ignored"
        });
        assert_eq!(decisions_from_value(&map).len(), 2);

        let list = json!({"decisions": [
            {"coin": "SOL", "signal": "close"},
            {"coin": "XRP", "decision": "short"}
        ]});
        let decisions = decisions_from_value(&list);
        assert_eq!(decisions[1].signal, Signal::Sell);

        assert!(decisions_from_value(&json!({"foo": 1})).is_empty());
        assert!(decisions_from_value(&json!(42)).is_empty());
    }
}
