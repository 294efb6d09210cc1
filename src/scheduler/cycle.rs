//! One trading cycle for one model: market data, prompt, gateway,
//! interpretation, risk review, booking and persistence.
//!
//! The cycle works on a clone of the model's state and swaps it in only
//! after the store accepted the trades, so a failure at any step leaves the
//! previous state in place.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::agent::{
    complete_with_retry, AiGateway, CoinMarket, DecisionRequestBuilder, ParseTier,
    ResponseInterpreter, RetryPolicy,
};
use crate::config::{AppConfig, IndicatorConfig};
use crate::domain::{Conversation, Decision, Model, ModelId};
use crate::error::{GatewayError, MarketDataError};
use crate::indicators::{self, IndicatorSet};
use crate::market::MarketDataProvider;
use crate::persistence::TradeStore;
use crate::portfolio::{StepOutcome, TradingState, TradingStep};
use crate::risk::RiskSnapshot;

/// Collaborators shared by every model's cycle
pub struct CycleServices {
    pub market: Arc<dyn MarketDataProvider>,
    pub gateway: Arc<dyn AiGateway>,
    pub store: Arc<dyn TradeStore>,
    pub step: TradingStep,
    pub interpreter: ResponseInterpreter,
    pub retry: RetryPolicy,
    pub gateway_timeout: Duration,
    pub coins: Vec<String>,
    pub history_days: u32,
    pub indicators: IndicatorConfig,
    pub max_leverage: u32,
}

impl CycleServices {
    pub fn from_config(
        config: &AppConfig,
        market: Arc<dyn MarketDataProvider>,
        gateway: Arc<dyn AiGateway>,
        store: Arc<dyn TradeStore>,
    ) -> Self {
        Self {
            market,
            gateway,
            store,
            step: TradingStep::from_config(config),
            interpreter: ResponseInterpreter::new(&config.trading.coins),
            retry: RetryPolicy::from(&config.gateway),
            gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
            coins: config.trading.coins.clone(),
            history_days: config.trading.history_days,
            indicators: config.indicators.clone(),
            max_leverage: config.risk.max_leverage,
        }
    }
}

/// Why a cycle ended without booking anything
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A previous cycle for the same model is still running
    Busy,
    Cancelled,
    MarketData(String),
    Gateway(GatewayError),
    Persistence(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Busy => write!(f, "previous cycle still running"),
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::MarketData(e) => write!(f, "market data unavailable: {}", e),
            SkipReason::Gateway(e) => write!(f, "gateway failed: {}", e),
            SkipReason::Persistence(e) => write!(f, "persistence failed: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub model_id: ModelId,
    /// Gateway attempts the completion took
    pub attempts: u8,
    pub tier: ParseTier,
    pub decisions: Vec<Decision>,
    pub outcome: StepOutcome,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Box<CycleReport>),
    Skipped(SkipReason),
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            CycleOutcome::Completed(_) => None,
            CycleOutcome::Skipped(reason) => Some(reason),
        }
    }
}

/// State visible between cycles
#[derive(Debug, Clone)]
pub(crate) struct SlotState {
    pub trading: TradingState,
    pub last_risk: Option<RiskSnapshot>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// A registered model and its single-writer state
pub(crate) struct ModelSlot {
    pub model: Model,
    prompt: DecisionRequestBuilder,
    busy: Mutex<()>,
    state: RwLock<SlotState>,
}

impl ModelSlot {
    pub fn new(model: Model, trading: TradingState, max_leverage: u32) -> Self {
        Self {
            prompt: DecisionRequestBuilder::new(&model.strategy, max_leverage),
            model,
            busy: Mutex::new(()),
            state: RwLock::new(SlotState {
                trading,
                last_risk: None,
                last_cycle_at: None,
            }),
        }
    }

    pub async fn state(&self) -> SlotState {
        self.state.read().await.clone()
    }

    pub async fn run_cycle(
        &self,
        services: &CycleServices,
        cancel: &watch::Receiver<bool>,
    ) -> CycleOutcome {
        let model_id = self.model.id;
        let Ok(_guard) = self.busy.try_lock() else {
            debug!(model_id, "cycle skipped, previous one still running");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };
        let started_at = Utc::now();

        let markets = match fetch_markets(services).await {
            Ok(markets) => markets,
            Err(e) => {
                warn!(model_id, "cycle skipped: {}", e);
                return CycleOutcome::Skipped(SkipReason::MarketData(e.to_string()));
            }
        };
        if *cancel.borrow() {
            return CycleOutcome::Skipped(SkipReason::Cancelled);
        }

        let mut working = self.state.read().await.trading.clone();
        for market in &markets {
            working
                .portfolio
                .update_mark(&market.quote.coin, market.quote.price);
        }
        let prompt = self.prompt.build(&markets, &working.portfolio);

        let completion = complete_with_retry(
            services.gateway.as_ref(),
            &self.model.endpoint,
            &prompt,
            services.gateway_timeout,
            &services.retry,
        )
        .await;
        let (raw, attempts) = match completion {
            Ok(done) => done,
            Err(e) => {
                warn!(model_id, kind = e.kind(), "cycle skipped: {}", e);
                let conversation = Conversation::failed(
                    model_id,
                    prompt.system,
                    prompt.user,
                    format!("{}: {}", e.kind(), e),
                    Utc::now(),
                );
                if let Err(store_err) = services.store.append_conversation(&conversation).await {
                    warn!(model_id, "failed conversation not stored: {}", store_err);
                }
                return CycleOutcome::Skipped(SkipReason::Gateway(e));
            }
        };
        if *cancel.borrow() {
            return CycleOutcome::Skipped(SkipReason::Cancelled);
        }

        let interpretation = services.interpreter.interpret(&raw);
        let prices: BTreeMap<String, Decimal> = markets
            .iter()
            .map(|m| (m.quote.coin.clone(), m.quote.price))
            .collect();
        let timestamp = Utc::now();
        let outcome = services
            .step
            .run(&mut working, &prices, &interpretation.decisions, timestamp);

        if *cancel.borrow() {
            return CycleOutcome::Skipped(SkipReason::Cancelled);
        }

        if let Err(e) = services
            .store
            .record_execution(&outcome.trades, &outcome.snapshot)
            .await
        {
            error!(model_id, "execution not persisted, state kept: {}", e);
            return CycleOutcome::Skipped(SkipReason::Persistence(e.to_string()));
        }

        let conversation = Conversation::succeeded(
            model_id,
            prompt.system,
            prompt.user,
            raw,
            interpretation.decisions.clone(),
            interpretation.tier.as_str(),
            timestamp,
        );
        if let Err(e) = services.store.append_conversation(&conversation).await {
            warn!(model_id, "conversation not stored: {}", e);
        }

        {
            let mut state = self.state.write().await;
            state.trading = working;
            state.last_risk = Some(outcome.risk.clone());
            state.last_cycle_at = Some(timestamp);
        }

        info!(
            model_id,
            tier = interpretation.tier.as_str(),
            attempts,
            trades = outcome.trades.len(),
            total_value = %outcome.snapshot.total_value,
            risk_score = outcome.risk.score,
            "cycle completed"
        );

        CycleOutcome::Completed(Box::new(CycleReport {
            model_id,
            attempts,
            tier: interpretation.tier,
            decisions: interpretation.decisions,
            outcome,
            started_at,
        }))
    }
}

/// Quotes and indicators for every configured coin. A coin without a price
/// is left out; the cycle fails only when no coin has one.
async fn fetch_markets(services: &CycleServices) -> Result<Vec<CoinMarket>, MarketDataError> {
    let fetches = services.coins.iter().map(|coin| async move {
        let quote = services.market.get_price(coin).await;
        let history = if quote.is_ok() {
            Some(services.market.get_history(coin, services.history_days).await)
        } else {
            None
        };
        (coin, quote, history)
    });

    let mut markets = Vec::with_capacity(services.coins.len());
    let mut last_error = None;
    for (coin, quote, history) in join_all(fetches).await {
        let quote = match quote {
            Ok(quote) => quote,
            Err(e) => {
                warn!(coin = %coin, "price unavailable: {}", e);
                last_error = Some(e);
                continue;
            }
        };
        let indicators = match history {
            Some(Ok(bars)) => indicators::compute(&bars, &services.indicators),
            Some(Err(e)) => {
                warn!(coin = %coin, "history unavailable, indicators omitted: {}", e);
                IndicatorSet::default()
            }
            None => IndicatorSet::default(),
        };
        markets.push(CoinMarket { quote, indicators });
    }

    if markets.is_empty() {
        return Err(last_error
            .unwrap_or_else(|| MarketDataError::unavailable("*", "no coins configured")));
    }
    Ok(markets)
}
