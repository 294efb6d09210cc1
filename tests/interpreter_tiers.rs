use arena::agent::{ParseTier, ResponseInterpreter};
use arena::domain::Signal;
use rust_decimal_macros::dec;

fn interpreter() -> ResponseInterpreter {
    ResponseInterpreter::new(&["BTC".to_string(), "ETH".to_string()])
}

/// A fenced block wins over a bare document elsewhere in the text.
#[test]
fn fenced_block_is_preferred() {
    let raw = "Plan below.\n```json\n{\"signal\": \"sell\", \"coin\": \"ETH\", \"quantity\": 2}\n```\n{\"signal\": \"buy\", \"coin\": \"BTC\"}";
    let out = interpreter().interpret(raw);
    assert_eq!(out.tier, ParseTier::Fenced);
    assert_eq!(out.decisions.len(), 1);
    assert_eq!(out.decisions[0].signal, Signal::Sell);
    assert_eq!(out.decisions[0].quantity, Some(dec!(2)));
}

/// Reasoning blocks are stripped before parsing and kept aside.
#[test]
fn reasoning_block_is_stripped() {
    let raw = "<think>BTC looks weak, maybe sell</think>\n[{\"signal\": \"buy\", \"coin\": \"btc\", \"leverage\": 3}]";
    let out = interpreter().interpret(raw);
    assert_eq!(out.tier, ParseTier::Direct);
    assert_eq!(out.decisions[0].signal, Signal::Buy);
    assert_eq!(out.decisions[0].coin.as_deref(), Some("BTC"));
    assert_eq!(out.decisions[0].leverage, Some(3));
    assert!(out.reasoning_block.unwrap().contains("looks weak"));
}

/// A document embedded in prose is found by brace matching.
#[test]
fn embedded_document_in_prose() {
    let raw = "After review my call is {\"signal\": \"close\", \"coin\": \"ETH\"} for now.";
    let out = interpreter().interpret(raw);
    assert_eq!(out.tier, ParseTier::Embedded);
    assert_eq!(out.decisions[0].signal, Signal::Close);
}

/// Free text falls through to the keyword scan.
#[test]
fn keyword_scan_on_free_text() {
    let raw = "BTC: buy, quantity 0.5, leverage 3x, stop loss 45000";
    let out = interpreter().interpret(raw);
    assert_eq!(out.tier, ParseTier::Keyword);
    let btc = &out.decisions[0];
    assert_eq!(btc.coin.as_deref(), Some("BTC"));
    assert_eq!(btc.signal, Signal::Buy);
    assert_eq!(btc.quantity, Some(dec!(0.5)));
    assert_eq!(btc.leverage, Some(3));
}

/// Unparseable text still yields one hold decision.
#[test]
fn fallback_is_a_single_hold() {
    let out = interpreter().interpret("I'm not sure what to do today.");
    assert_eq!(out.tier, ParseTier::Fallback);
    assert_eq!(out.decisions.len(), 1);
    assert_eq!(out.decisions[0].signal, Signal::Hold);
    assert!(out.decisions[0].coin.is_none());
}

/// Decisions for coins outside the configured universe are dropped.
#[test]
fn unconfigured_coins_are_dropped() {
    let raw = r#"[{"signal": "buy", "coin": "DOGE"}, {"signal": "sell", "coin": "ETH"}]"#;
    let out = interpreter().interpret(raw);
    assert_eq!(out.decisions.len(), 1);
    assert_eq!(out.decisions[0].coin.as_deref(), Some("ETH"));
}

/// A fenced decision without a coin still ends the scan, so prose around it
/// is never read as a trade.
#[test]
fn coinless_fenced_decision_wins_over_prose() {
    let raw = "Sell sell sell! But final:\n```json\n{\"signal\": \"buy\"}\n```";
    let out = interpreter().interpret(raw);
    assert_eq!(out.tier, ParseTier::Fenced);
    assert_eq!(out.decisions.len(), 1);
    assert_eq!(out.decisions[0].signal, Signal::Buy);
    assert!(out.decisions[0].coin.is_none());
}

#[test]
fn empty_response_falls_back() {
    let out = interpreter().interpret("");
    assert_eq!(out.tier, ParseTier::Fallback);
    assert_eq!(out.decisions.len(), 1);
    assert_eq!(out.decisions[0].signal, Signal::Hold);
}
