use thiserror::Error;

/// Main error type for the trading arena
#[derive(Error, Debug)]
pub enum ArenaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    // AI gateway errors
    #[error("AI gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // Persistence contract violations (not driver errors)
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Model not found: {0}")]
    ModelNotFound(i64),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for ArenaError
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Failures of the AI gateway. Every variant is retryable; none is fatal to
/// the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u8, last: Box<GatewayError> },
}

impl GatewayError {
    /// Short label used in logs and failed conversation records
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Auth(_) => "auth",
            GatewayError::Malformed(_) => "malformed",
            GatewayError::Transport(_) => "transport",
            GatewayError::RetriesExhausted { last, .. } => last.kind(),
        }
    }
}

/// Failures of the market data provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("Market data unavailable for {coin}: {reason}")]
    Unavailable { coin: String, reason: String },

    #[error("Unsupported coin: {0}")]
    UnsupportedCoin(String),

    #[error("Malformed market data for {coin}: {reason}")]
    Malformed { coin: String, reason: String },
}

impl MarketDataError {
    pub fn unavailable(coin: &str, reason: impl Into<String>) -> Self {
        MarketDataError::Unavailable {
            coin: coin.to_string(),
            reason: reason.into(),
        }
    }
}
