//! Response interpreter.
//!
//! Turns raw model output into decisions through a fixed sequence of
//! parsing tiers. The first tier that yields at least one decision wins.
//! Nothing here fails: when every tier comes up empty the result is a
//! single hold decision carrying an excerpt of the raw text.

pub mod fields;
pub mod keywords;

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::Decision;
use fields::decisions_from_value;
use keywords::{excerpt, KeywordScanner};

/// Which tier produced the decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseTier {
    /// Fenced code block
    Fenced,
    /// Whole text parsed as a document
    Direct,
    /// Balanced brace substring inside prose
    Embedded,
    /// Keyword scan
    Keyword,
    /// Nothing matched, default hold
    Fallback,
}

impl ParseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseTier::Fenced => "fenced",
            ParseTier::Direct => "direct",
            ParseTier::Embedded => "embedded",
            ParseTier::Keyword => "keyword",
            ParseTier::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ParseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of interpreting one response
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Never empty
    pub decisions: Vec<Decision>,
    pub tier: ParseTier,
    /// Content of stripped reasoning blocks, if any
    pub reasoning_block: Option<String>,
}

const REASONING_TAGS: &[&str] = &["think", "thinking", "reasoning"];

static REASONING_BLOCKS: LazyLock<Vec<(Regex, Regex)>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .filter_map(|tag| {
            let block = Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).ok()?;
            let stray_close = Regex::new(&format!(r"(?is)^(.*)</{tag}>")).ok()?;
            Some((block, stray_close))
        })
        .collect()
});

static FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_-]*)[^\n`]*\n?(.*?)```").ok());

static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").ok());

/// Longest fallback reasoning excerpt, in chars
const FALLBACK_EXCERPT: usize = 200;

/// Split reasoning blocks off the text. Returns the remaining text and the
/// concatenated block contents.
fn strip_reasoning(text: &str) -> (String, Option<String>) {
    let mut remainder = text.to_string();
    let mut blocks = Vec::new();

    for (block, stray_close) in REASONING_BLOCKS.iter() {
        for caps in block.captures_iter(&remainder) {
            if let Some(inner) = caps.get(1) {
                blocks.push(inner.as_str().trim().to_string());
            }
        }
        remainder = block.replace_all(&remainder, "").into_owned();

        // An opening tag swallowed by the endpoint leaves only the close
        if let Some(caps) = stray_close.captures(&remainder) {
            if let Some(inner) = caps.get(1) {
                blocks.push(inner.as_str().trim().to_string());
            }
            remainder = stray_close.replace(&remainder, "").into_owned();
        }
    }

    let blocks: Vec<String> = blocks.into_iter().filter(|b| !b.is_empty()).collect();
    let reasoning = (!blocks.is_empty()).then(|| blocks.join("\n"));
    (remainder.trim().to_string(), reasoning)
}

/// Parse a document, retrying once with trailing commas removed
fn parse_document(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok().or_else(|| {
        let repaired = TRAILING_COMMA.as_ref()?.replace_all(trimmed, "$1");
        serde_json::from_str(&repaired).ok()
    })
}

fn decisions_from_text(text: &str) -> Vec<Decision> {
    parse_document(text)
        .map(|v| decisions_from_value(&v))
        .unwrap_or_default()
}

/// Tier 2: fenced blocks, data-tagged ones before untagged ones
fn fenced(text: &str) -> Vec<Decision> {
    let Some(fence) = FENCE.as_ref() else {
        return Vec::new();
    };
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    for caps in fence.captures_iter(text) {
        let lang = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let Some(body) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        match lang.as_str() {
            "json" | "json5" | "jsonc" => tagged.push(body),
            "" => untagged.push(body),
            _ => {}
        }
    }
    tagged
        .into_iter()
        .chain(untagged)
        .map(decisions_from_text)
        .find(|d| !d.is_empty())
        .unwrap_or_default()
}

/// Byte range of the balanced brace group opening at `start`, skipping
/// braces inside string literals
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Tier 4: first balanced `{...}` substring that parses into decisions
fn embedded(text: &str) -> Vec<Decision> {
    for (start, _) in text.match_indices('{') {
        if let Some(end) = balanced_end(text, start) {
            let decisions = decisions_from_text(&text[start..end]);
            if !decisions.is_empty() {
                return decisions;
            }
        }
    }
    Vec::new()
}

/// Ordered multi-tier parser for model responses
pub struct ResponseInterpreter {
    coins: Vec<String>,
    scanner: KeywordScanner,
}

impl ResponseInterpreter {
    /// `coins` limits the accepted decisions and drives the keyword scan.
    /// Decisions naming no coin are kept; the trading step ignores them.
    pub fn new(coins: &[String]) -> Self {
        let coins: Vec<String> = coins.iter().map(|c| c.to_uppercase()).collect();
        Self {
            scanner: KeywordScanner::new(&coins),
            coins,
        }
    }

    fn accept(&self, decisions: Vec<Decision>) -> Vec<Decision> {
        decisions
            .into_iter()
            .filter(|d| match &d.coin {
                Some(coin) => self.coins.is_empty() || self.coins.contains(coin),
                None => true,
            })
            .collect()
    }

    fn tiers(&self, text: &str) -> Option<(Vec<Decision>, ParseTier)> {
        let attempts: [(ParseTier, &dyn Fn(&str) -> Vec<Decision>); 4] = [
            (ParseTier::Fenced, &fenced),
            (ParseTier::Direct, &decisions_from_text),
            (ParseTier::Embedded, &embedded),
            (ParseTier::Keyword, &|t: &str| self.scanner.scan(t)),
        ];
        attempts.iter().find_map(|(tier, parse)| {
            let decisions = self.accept(parse(text));
            (!decisions.is_empty()).then_some((decisions, *tier))
        })
    }

    /// Interpret a raw response. Always returns at least one decision.
    pub fn interpret(&self, raw: &str) -> Interpretation {
        let (remainder, reasoning_block) = strip_reasoning(raw);

        if let Some((decisions, tier)) = self.tiers(&remainder) {
            debug!(tier = tier.as_str(), count = decisions.len(), "parsed model response");
            return Interpretation {
                decisions,
                tier,
                reasoning_block,
            };
        }

        debug!(chars = raw.len(), "no tier matched, defaulting to hold");
        let source = if remainder.is_empty() {
            reasoning_block.as_deref().unwrap_or(raw)
        } else {
            remainder.as_str()
        };
        Interpretation {
            decisions: vec![Decision::hold(excerpt(source, FALLBACK_EXCERPT))],
            tier: ParseTier::Fallback,
            reasoning_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Signal;

    fn interpreter() -> ResponseInterpreter {
        let coins: Vec<String> = ["BTC", "ETH", "SOL", "BNB", "XRP", "DOGE"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ResponseInterpreter::new(&coins)
    }

    #[test]
    fn test_strip_reasoning_blocks() {
        let (rest, block) = strip_reasoning("<think>rsi is high</think>\n{\"a\":1}");
        assert_eq!(rest, "{\"a\":1}");
        assert_eq!(block.as_deref(), Some("rsi is high"));

        let (rest, block) = strip_reasoning("pondering... </think> final answer");
        assert_eq!(rest, "final answer");
        assert_eq!(block.as_deref(), Some("pondering..."));
    }

    #[test]
    fn test_balanced_end_ignores_braces_in_strings() {
        let text = r#"x {"a": "}{", "b": {"c": 1}} y"#;
        let start = text.find('{').unwrap();
        let end = balanced_end(text, start).unwrap();
        assert_eq!(&text[start..end], r#"{"a": "}{", "b": {"c": 1}}"#);
        assert_eq!(balanced_end("{ unclosed", 0), None);
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let result = interpreter().interpret(r#"{"BTC": {"signal": "buy", "quantity": 0.1,},}"#);
        assert_eq!(result.tier, ParseTier::Direct);
        assert_eq!(result.decisions[0].signal, Signal::Buy);
    }

    #[test]
    fn test_unknown_coins_are_dropped() {
        let result = interpreter().interpret(r#"{"PEPE": {"signal": "buy"}}"#);
        assert_eq!(result.tier, ParseTier::Fallback);
        assert_eq!(result.decisions[0].signal, Signal::Hold);
    }

    #[test]
    fn test_coinless_decision_ends_the_scan() {
        let result = interpreter().interpret("{\"signal\": \"hold\", \"reasoning\": \"wait for BTC to buy the dip\"}");
        assert_eq!(result.tier, ParseTier::Direct);
        assert_eq!(result.decisions.len(), 1);
        assert_eq!(result.decisions[0].signal, Signal::Hold);
        assert_eq!(result.decisions[0].coin, None);
    }

    #[test]
    fn test_untagged_fence_is_used() {
        let text = "Here you go:\n```\n{\"coin\": \"ETH\", \"action\": \"short\"}\n```";
        let result = interpreter().interpret(text);
        assert_eq!(result.tier, ParseTier::Fenced);
        assert_eq!(result.decisions[0].signal, Signal::Sell);
    }
}
