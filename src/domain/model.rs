use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use zeroize::Zeroizing;

pub type ModelId = i64;

/// Connection details for an OpenAI-compatible completion endpoint
#[derive(Clone)]
pub struct ModelEndpoint {
    pub base_url: String,
    pub model_name: String,
    pub api_key: Zeroizing<String>,
}

impl fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("base_url", &self.base_url)
            .field("model_name", &self.model_name)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// An AI trading agent with its own strategy and capital
#[derive(Debug, Clone)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    /// Strategy text appended to every decision prompt
    pub strategy: String,
    pub endpoint: ModelEndpoint,
    pub initial_capital: Decimal,
    pub created_at: DateTime<Utc>,
}
