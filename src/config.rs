use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

use crate::domain::{Model, ModelEndpoint};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Configured agents, each with its own portfolio and schedule
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Seconds between two cycles of the same model
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Coins offered to every model
    #[serde(default = "default_coins")]
    pub coins: Vec<String>,
    /// Fee charged on notional for every fill (e.g., 0.001 = 10 bps)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Decimal places kept on order quantities
    #[serde(default = "default_quantity_scale")]
    pub quantity_scale: u32,
    /// Days of daily bars fed to the indicator engine
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

fn default_interval_secs() -> u64 {
    180
}

fn default_coins() -> Vec<String> {
    ["BTC", "ETH", "SOL", "BNB", "XRP", "DOGE"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_quantity_scale() -> u32 {
    8
}

fn default_history_days() -> u32 {
    30
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            coins: default_coins(),
            fee_rate: default_fee_rate(),
            quantity_scale: default_quantity_scale(),
            history_days: default_history_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_min_leverage")]
    pub min_leverage: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    /// Largest notional share of total value a single coin may hold
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,
    /// Largest loss-at-stop a single trade may risk, as a share of equity
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: Decimal,
    /// Drawdown above which new exposure is blocked
    #[serde(default = "default_drawdown_warning")]
    pub drawdown_warning: Decimal,
    /// Drawdown below which the warning state is lifted
    #[serde(default = "default_drawdown_recovery")]
    pub drawdown_recovery: Decimal,
    /// Drawdown at which trading is paused outright
    #[serde(default = "default_drawdown_critical")]
    pub drawdown_critical: Decimal,
    /// Consecutive losing closes before trading is paused
    #[serde(default = "default_losing_streak_limit")]
    pub losing_streak_limit: u32,
    /// Minimum cash share of total value before trading is paused
    #[serde(default = "default_min_cash_ratio")]
    pub min_cash_ratio: Decimal,
    #[serde(default)]
    pub score: RiskScoreWeights,
}

fn default_min_leverage() -> u32 {
    1
}

fn default_max_leverage() -> u32 {
    20
}

fn default_max_position_ratio() -> Decimal {
    dec!(0.30)
}

fn default_max_risk_per_trade() -> Decimal {
    dec!(0.05)
}

fn default_drawdown_warning() -> Decimal {
    dec!(0.15)
}

fn default_drawdown_recovery() -> Decimal {
    dec!(0.10)
}

fn default_drawdown_critical() -> Decimal {
    dec!(0.25)
}

fn default_losing_streak_limit() -> u32 {
    5
}

fn default_min_cash_ratio() -> Decimal {
    dec!(0.10)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_leverage: default_min_leverage(),
            max_leverage: default_max_leverage(),
            max_position_ratio: default_max_position_ratio(),
            max_risk_per_trade: default_max_risk_per_trade(),
            drawdown_warning: default_drawdown_warning(),
            drawdown_recovery: default_drawdown_recovery(),
            drawdown_critical: default_drawdown_critical(),
            losing_streak_limit: default_losing_streak_limit(),
            min_cash_ratio: default_min_cash_ratio(),
            score: RiskScoreWeights::default(),
        }
    }
}

/// Weight each triggered component adds to the aggregate risk score.
/// The score is the sum of triggered weights, capped at 1.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskScoreWeights {
    #[serde(default = "default_w_concentration")]
    pub concentration: f64,
    #[serde(default = "default_w_leverage")]
    pub leverage: f64,
    #[serde(default = "default_w_position_count")]
    pub position_count: f64,
    #[serde(default = "default_w_unrealized_loss")]
    pub unrealized_loss: f64,
    #[serde(default = "default_w_drawdown")]
    pub drawdown: f64,
    /// Average leverage above which the leverage component triggers
    #[serde(default = "default_leverage_threshold")]
    pub leverage_threshold: u32,
    /// Open position count above which the count component triggers
    #[serde(default = "default_position_count_threshold")]
    pub position_count_threshold: usize,
    /// Unrealized loss share of total value that triggers the loss component
    #[serde(default = "default_unrealized_loss_threshold")]
    pub unrealized_loss_threshold: Decimal,
}

fn default_w_concentration() -> f64 {
    0.30
}

fn default_w_leverage() -> f64 {
    0.25
}

fn default_w_position_count() -> f64 {
    0.15
}

fn default_w_unrealized_loss() -> f64 {
    0.20
}

fn default_w_drawdown() -> f64 {
    0.30
}

fn default_leverage_threshold() -> u32 {
    10
}

fn default_position_count_threshold() -> usize {
    5
}

fn default_unrealized_loss_threshold() -> Decimal {
    dec!(0.10)
}

impl Default for RiskScoreWeights {
    fn default() -> Self {
        Self {
            concentration: default_w_concentration(),
            leverage: default_w_leverage(),
            position_count: default_w_position_count(),
            unrealized_loss: default_w_unrealized_loss(),
            drawdown: default_w_drawdown(),
            leverage_threshold: default_leverage_threshold(),
            position_count_threshold: default_position_count_threshold(),
            unrealized_loss_threshold: default_unrealized_loss_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Upper bound on time spent sleeping between attempts
    #[serde(default = "default_max_total_wait_secs")]
    pub max_total_wait_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_gateway_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u8 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

fn default_max_total_wait_secs() -> u64 {
    20
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_gateway_timeout(),
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::default(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_total_wait_secs: default_max_total_wait_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// REST endpoint of the quote source
    #[serde(default = "default_market_base_url")]
    pub base_url: String,
    /// Quote currency appended to every coin symbol
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_price_ttl")]
    pub price_ttl_secs: u64,
    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,
    /// Oldest cached price still served when the provider is down
    #[serde(default = "default_stale_price")]
    pub stale_price_secs: u64,
    /// Oldest cached history still served when the provider is down
    #[serde(default = "default_stale_history")]
    pub stale_history_secs: u64,
}

fn default_market_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_price_ttl() -> u64 {
    5
}

fn default_history_ttl() -> u64 {
    6 * 3600
}

fn default_stale_price() -> u64 {
    24 * 3600
}

fn default_stale_history() -> u64 {
    30 * 24 * 3600
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_base_url(),
            quote_asset: default_quote_asset(),
            request_timeout_secs: default_request_timeout(),
            price_ttl_secs: default_price_ttl(),
            history_ttl_secs: default_history_ttl(),
            stale_price_secs: default_stale_price(),
            stale_history_secs: default_stale_history(),
        }
    }
}

/// Indicator windows, in bars. Live cycles and backtests share these.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_sma_windows")]
    pub sma_windows: Vec<usize>,
    #[serde(default = "default_ema_windows")]
    pub ema_windows: Vec<usize>,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_band_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
    #[serde(default = "default_rsi_period")]
    pub atr_period: usize,
    #[serde(default = "default_rsi_period")]
    pub adx_period: usize,
    #[serde(default = "default_band_period")]
    pub cci_period: usize,
    #[serde(default = "default_rsi_period")]
    pub williams_period: usize,
    #[serde(default = "default_band_period")]
    pub volatility_window: usize,
    #[serde(default = "default_change_window")]
    pub change_window: usize,
}

fn default_sma_windows() -> Vec<usize> {
    vec![7, 14, 20, 30]
}

fn default_ema_windows() -> Vec<usize> {
    vec![12, 26]
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_rsi_period() -> usize {
    14
}

fn default_band_period() -> usize {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_change_window() -> usize {
    7
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_windows: default_sma_windows(),
            ema_windows: default_ema_windows(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            rsi_period: default_rsi_period(),
            bollinger_period: default_band_period(),
            bollinger_std: default_bollinger_std(),
            atr_period: default_rsi_period(),
            adx_period: default_rsi_period(),
            cci_period: default_band_period(),
            williams_period: default_rsi_period(),
            volatility_window: default_band_period(),
            change_window: default_change_window(),
        }
    }
}

impl IndicatorConfig {
    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let periods = [
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("rsi_period", self.rsi_period),
            ("bollinger_period", self.bollinger_period),
            ("atr_period", self.atr_period),
            ("adx_period", self.adx_period),
            ("cci_period", self.cci_period),
            ("williams_period", self.williams_period),
            ("volatility_window", self.volatility_window),
            ("change_window", self.change_window),
        ];
        for (name, period) in periods {
            if period == 0 {
                errors.push(format!("indicators.{} must be positive", name));
            }
        }
        if self.sma_windows.contains(&0) || self.ema_windows.contains(&0) {
            errors.push("indicators moving average windows must be positive".to_string());
        }
        if self.macd_fast >= self.macd_slow {
            errors.push("indicators.macd_fast must be below macd_slow".to_string());
        }
        if !(self.bollinger_std > 0.0) {
            errors.push("indicators.bollinger_std must be positive".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    /// Per-period risk free rate subtracted from returns
    #[serde(default)]
    pub risk_free_rate: f64,
}

fn default_periods_per_year() -> f64 {
    252.0
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            periods_per_year: default_periods_per_year(),
            risk_free_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One configured agent
#[derive(Clone, Deserialize)]
pub struct ModelConfig {
    pub id: i64,
    pub name: String,
    /// Model identifier sent to the completion endpoint
    pub model_name: String,
    /// Base URL of an OpenAI-compatible endpoint
    pub endpoint: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: Zeroizing<String>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Free-form strategy text appended to the decision prompt
    #[serde(default)]
    pub strategy: String,
}

fn default_initial_capital() -> Decimal {
    dec!(10000)
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Zeroizing<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Zeroizing::new)
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model_name", &self.model_name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("initial_capital", &self.initial_capital)
            .finish()
    }
}

impl ModelConfig {
    /// Build the runtime model record from its configuration entry
    pub fn to_model(&self) -> Model {
        Model {
            id: self.id,
            name: self.name.clone(),
            strategy: self.strategy.clone(),
            endpoint: ModelEndpoint {
                base_url: self.endpoint.clone(),
                model_name: self.model_name.clone(),
                api_key: self.api_key.clone(),
            },
            initial_capital: self.initial_capital,
            created_at: chrono::Utc::now(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ARENA_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (ARENA__TRADING__INTERVAL_SECS, etc.)
            .add_source(
                Environment::with_prefix("ARENA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.interval_secs == 0 {
            errors.push("trading.interval_secs must be positive".to_string());
        }
        if self.trading.fee_rate < Decimal::ZERO || self.trading.fee_rate >= Decimal::ONE {
            errors.push("trading.fee_rate must be in [0, 1)".to_string());
        }
        if self.trading.coins.is_empty() {
            errors.push("trading.coins must not be empty".to_string());
        }

        let risk = &self.risk;
        if risk.min_leverage == 0 || risk.min_leverage > risk.max_leverage {
            errors.push("risk leverage bounds must satisfy 1 <= min <= max".to_string());
        }
        if risk.max_position_ratio <= Decimal::ZERO || risk.max_position_ratio > Decimal::ONE {
            errors.push("risk.max_position_ratio must be in (0, 1]".to_string());
        }
        if risk.max_risk_per_trade <= Decimal::ZERO || risk.max_risk_per_trade > Decimal::ONE {
            errors.push("risk.max_risk_per_trade must be in (0, 1]".to_string());
        }
        if risk.drawdown_recovery > risk.drawdown_warning {
            errors.push("risk.drawdown_recovery must not exceed drawdown_warning".to_string());
        }
        if risk.drawdown_warning > risk.drawdown_critical {
            errors.push("risk.drawdown_warning must not exceed drawdown_critical".to_string());
        }

        errors.extend(self.indicators.problems());

        if self.gateway.max_attempts == 0 {
            errors.push("gateway.max_attempts must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id) {
                errors.push(format!("duplicate model id {}", model.id));
            }
            if model.initial_capital <= Decimal::ZERO {
                errors.push(format!("model {} initial_capital must be positive", model.id));
            }
            match url::Url::parse(&model.endpoint) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                Ok(u) => errors.push(format!(
                    "model {} endpoint has unsupported scheme {}",
                    model.id,
                    u.scheme()
                )),
                Err(e) => errors.push(format!("model {} endpoint is not a URL: {}", model.id, e)),
            }
        }
        if let Err(e) = url::Url::parse(&self.market.base_url) {
            errors.push(format!("market.base_url is not a URL: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.trading.interval_secs, 180);
        assert_eq!(config.risk.max_leverage, 20);
        assert_eq!(config.gateway.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_hysteresis() {
        let mut config = AppConfig::default();
        config.risk.drawdown_recovery = dec!(0.20);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("drawdown_recovery")));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = AppConfig::default();
        config.models.push(ModelConfig {
            id: 7,
            name: "beta".into(),
            model_name: "m".into(),
            endpoint: "ftp://llm.local".into(),
            api_key: Zeroizing::new(String::new()),
            initial_capital: dec!(500),
            strategy: String::new(),
        });
        let errors = config.validate().unwrap_err();
        assert_eq!(errors, vec!["model 7 endpoint has unsupported scheme ftp".to_string()]);
    }

    #[test]
    fn test_validate_rejects_inverted_macd() {
        let mut config = AppConfig::default();
        config.indicators.macd_fast = 26;
        config.indicators.macd_slow = 12;
        config.indicators.sma_windows = vec![0, 20];
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&"indicators.macd_fast must be below macd_slow".to_string()));
    }

    #[test]
    fn test_model_config_debug_redacts_key() {
        let model = ModelConfig {
            id: 1,
            name: "alpha".into(),
            model_name: "gpt-4o-mini".into(),
            endpoint: "https://api.openai.com".into(),
            api_key: Zeroizing::new("sk-secret".into()),
            initial_capital: dec!(10000),
            strategy: String::new(),
        };
        let rendered = format!("{:?}", model);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
