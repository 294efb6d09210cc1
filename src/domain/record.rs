use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Decision, ModelId, Position, Side};

/// Kind of fill recorded in a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    OpenLong,
    OpenShort,
    Close,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::OpenLong => "open_long",
            TradeKind::OpenShort => "open_short",
            TradeKind::Close => "close",
        }
    }

    pub fn open(side: Side) -> Self {
        match side {
            Side::Long => TradeKind::OpenLong,
            Side::Short => TradeKind::OpenShort,
        }
    }
}

impl TryFrom<&str> for TradeKind {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "open_long" => Ok(TradeKind::OpenLong),
            "open_short" => Ok(TradeKind::OpenShort),
            "close" => Ok(TradeKind::Close),
            other => Err(format!("unknown trade kind: {}", other)),
        }
    }
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused a closing trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Signal,
    StopLoss,
    TakeProfit,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Signal => "signal",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
        }
    }
}

impl TryFrom<&str> for CloseReason {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "signal" => Ok(CloseReason::Signal),
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            other => Err(format!("unknown close reason: {}", other)),
        }
    }
}

/// Immutable record of one simulated fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Sequence number within the model's ledger, starting at 1
    pub id: u64,
    pub model_id: ModelId,
    pub coin: String,
    pub kind: TradeKind,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub leverage: u32,
    pub fee: Decimal,
    /// Set on closing trades only, net of the closing fee
    pub realized_pnl: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn is_close(&self) -> bool {
        self.kind == TradeKind::Close
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Valuation of a portfolio at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub model_id: ModelId,
    pub cash: Decimal,
    /// Sum of position mark values
    pub positions_value: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Fees paid since inception
    #[serde(default)]
    pub total_fees: Decimal,
    pub positions: Vec<Position>,
    pub timestamp: DateTime<Utc>,
}

/// Audit record of one model exchange: the prompt, what came back and
/// what was made of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub model_id: ModelId,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Raw model output; absent when the gateway failed
    pub raw_response: Option<String>,
    /// Decisions as interpreted from the response, before risk review
    pub decisions: Vec<Decision>,
    /// Interpreter tier that produced the decisions
    pub parse_tier: Option<String>,
    /// Gateway failure kind and message when the exchange failed
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Conversation {
    pub fn succeeded(
        model_id: ModelId,
        system_prompt: String,
        user_prompt: String,
        raw_response: String,
        decisions: Vec<Decision>,
        parse_tier: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id,
            system_prompt,
            user_prompt,
            raw_response: Some(raw_response),
            decisions,
            parse_tier: Some(parse_tier.to_string()),
            error: None,
            timestamp,
        }
    }

    pub fn failed(
        model_id: ModelId,
        system_prompt: String,
        user_prompt: String,
        error: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id,
            system_prompt,
            user_prompt,
            raw_response: None,
            decisions: Vec::new(),
            parse_tier: None,
            error: Some(error),
            timestamp,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}
