//! Per-model trading loops.
//!
//! Every registered model gets its own task ticking at the configured
//! interval. A model's state has a single writer: a cycle that finds the
//! previous one still running is skipped, not queued. Loops are tracked in a
//! registry so they can be started and stopped individually.

mod cycle;
mod view;

pub use cycle::{CycleOutcome, CycleReport, CycleServices, SkipReason};
pub use view::{rank, LeaderboardEntry, PortfolioView};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::domain::{Model, ModelId};
use crate::error::{ArenaError, Result};
use crate::persistence::TradeStore;
use crate::portfolio::{Portfolio, TradingState};
use cycle::ModelSlot;

/// Snapshots replayed into the drawdown monitor on restore
const RESTORE_WINDOW: usize = 2000;

struct RunningTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    services: Arc<CycleServices>,
    interval: Duration,
    slots: DashMap<ModelId, Arc<ModelSlot>>,
    tasks: DashMap<ModelId, RunningTask>,
}

impl Scheduler {
    pub fn new(services: CycleServices, interval: Duration) -> Self {
        Self {
            services: Arc::new(services),
            interval,
            slots: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    pub fn services(&self) -> &CycleServices {
        &self.services
    }

    /// Register a model with an explicit starting state, replacing any
    /// previous registration under the same id
    pub fn register(&self, model: Model, state: TradingState) {
        info!(model_id = model.id, name = %model.name, "model registered");
        let slot = ModelSlot::new(model, state, self.services.max_leverage);
        self.slots.insert(slot.model.id, Arc::new(slot));
    }

    /// Register a model, rebuilding its state from the store
    pub async fn register_restored(&self, model: Model) -> Result<()> {
        let state = restore_state(
            self.services.store.as_ref(),
            &model,
            self.services.step.risk().config(),
        )
        .await?;
        self.register(model, state);
        Ok(())
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.slots.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn slot(&self, model_id: ModelId) -> Result<Arc<ModelSlot>> {
        self.slots
            .get(&model_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(ArenaError::ModelNotFound(model_id))
    }

    /// Run a single cycle now. Skipped when the model is mid-cycle.
    pub async fn run_once(&self, model_id: ModelId) -> Result<CycleOutcome> {
        let slot = self.slot(model_id)?;
        let (_cancel, never) = watch::channel(false);
        Ok(slot.run_cycle(&self.services, &never).await)
    }

    /// Start the model's loop. Starting a running model is a no-op.
    pub fn start(&self, model_id: ModelId) -> Result<()> {
        let slot = self.slot(model_id)?;
        if let Some(task) = self.tasks.get(&model_id) {
            if !task.handle.is_finished() {
                return Ok(());
            }
        }

        let (cancel, mut stop_rx) = watch::channel(false);
        let cycle_rx = stop_rx.clone();
        let services = Arc::clone(&self.services);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let outcome = slot.run_cycle(&services, &cycle_rx).await;
                        if let Some(reason) = outcome.skip_reason() {
                            debug!(model_id, "cycle skipped: {}", reason);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if *stop_rx.borrow() {
                    break;
                }
            }
            info!(model_id, "model loop stopped");
        });

        self.tasks.insert(model_id, RunningTask { cancel, handle });
        info!(model_id, interval_secs = interval.as_secs(), "model loop started");
        Ok(())
    }

    pub fn start_all(&self) {
        for model_id in self.model_ids() {
            if let Err(e) = self.start(model_id) {
                warn!(model_id, "failed to start model loop: {}", e);
            }
        }
    }

    /// Stop the model's loop, letting an in-flight cycle reach its next
    /// step boundary. Returns false if no loop was running.
    pub async fn stop(&self, model_id: ModelId) -> bool {
        let Some((_, task)) = self.tasks.remove(&model_id) else {
            return false;
        };
        let _ = task.cancel.send(true);
        if let Err(e) = task.handle.await {
            warn!(model_id, "model loop ended abnormally: {}", e);
        }
        true
    }

    pub async fn stop_all(&self) {
        let ids: Vec<ModelId> = self.tasks.iter().map(|e| *e.key()).collect();
        for model_id in ids {
            self.stop(model_id).await;
        }
    }

    pub fn is_running(&self, model_id: ModelId) -> bool {
        self.tasks
            .get(&model_id)
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn portfolio_view(&self, model_id: ModelId) -> Result<PortfolioView> {
        let slot = self.slot(model_id)?;
        let state = slot.state().await;
        Ok(PortfolioView::from_state(&slot.model.name, &state))
    }

    /// Registered models ordered by total return, best first
    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let slots: Vec<Arc<ModelSlot>> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut views = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.state().await;
            views.push(PortfolioView::from_state(&slot.model.name, &state));
        }
        rank(views)
    }
}

/// Rebuild a model's state from its latest snapshot and ledger. A model
/// with no history starts fresh with its initial capital.
pub async fn restore_state(
    store: &dyn TradeStore,
    model: &Model,
    risk: &RiskConfig,
) -> Result<TradingState> {
    let mut state = TradingState::new(model.id, model.initial_capital, risk);
    let history = store.recent_snapshots(model.id, RESTORE_WINDOW).await?;
    let Some(latest) = history.last() else {
        return Ok(state);
    };

    let last_trade = store.recent_trades(model.id, 1).await?;
    let next_trade_id = last_trade.last().map(|t| t.id + 1).unwrap_or(1);
    state.portfolio = Portfolio::restore(latest, model.initial_capital, next_trade_id);
    for snapshot in &history {
        state.drawdown.observe(snapshot.total_value);
    }

    info!(
        model_id = model.id,
        total_value = %latest.total_value,
        positions = latest.positions.len(),
        next_trade_id,
        "model state restored"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::gateway::MockAiGateway;
    use crate::agent::{ParseTier, ResponseInterpreter, RetryPolicy};
    use crate::config::AppConfig;
    use crate::domain::{ModelEndpoint, PriceQuote};
    use crate::error::{GatewayError, MarketDataError};
    use crate::market::MockMarketDataProvider;
    use crate::persistence::InMemoryStore;
    use crate::portfolio::TradingStep;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use zeroize::Zeroizing;

    const BUY_BTC: &str = r#"{"signal": "buy", "coin": "BTC", "quantity": 0.05, "leverage": 2, "stop_loss": 48000}"#;

    fn model() -> Model {
        Model {
            id: 1,
            name: "alpha".into(),
            strategy: String::new(),
            endpoint: ModelEndpoint {
                base_url: "https://llm.example.com".into(),
                model_name: "test".into(),
                api_key: Zeroizing::new("k".into()),
            },
            initial_capital: dec!(10000),
            created_at: Utc::now(),
        }
    }

    fn market_at(price: rust_decimal::Decimal) -> MockMarketDataProvider {
        let mut market = MockMarketDataProvider::new();
        market
            .expect_get_price()
            .returning(move |coin| Ok(PriceQuote::new(coin, price, Utc::now())));
        market.expect_get_history().returning(|_, _| Ok(Vec::new()));
        market
    }

    fn services(
        market: MockMarketDataProvider,
        gateway: MockAiGateway,
        store: Arc<InMemoryStore>,
    ) -> CycleServices {
        let mut config = AppConfig::default();
        config.trading.coins = vec!["BTC".into()];
        CycleServices {
            market: Arc::new(market),
            gateway: Arc::new(gateway),
            store,
            step: TradingStep::from_config(&config),
            interpreter: ResponseInterpreter::new(&config.trading.coins),
            retry: RetryPolicy::immediate(3),
            gateway_timeout: Duration::from_secs(5),
            coins: config.trading.coins.clone(),
            history_days: 30,
            indicators: config.indicators.clone(),
            max_leverage: config.risk.max_leverage,
        }
    }

    fn scheduler(market: MockMarketDataProvider, gateway: MockAiGateway, store: Arc<InMemoryStore>) -> Scheduler {
        let config = AppConfig::default();
        let scheduler = Scheduler::new(services(market, gateway, store), Duration::from_secs(180));
        let model = model();
        let state = TradingState::new(model.id, model.initial_capital, &config.risk);
        scheduler.register(model, state);
        scheduler
    }

    #[tokio::test]
    async fn test_cycle_books_and_persists() {
        let store = Arc::new(InMemoryStore::new());
        let mut gateway = MockAiGateway::new();
        gateway
            .expect_complete()
            .times(1)
            .returning(|_, _, _| Ok(BUY_BTC.to_string()));
        let scheduler = scheduler(market_at(dec!(50000)), gateway, store.clone());

        let outcome = scheduler.run_once(1).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.tier, ParseTier::Direct);
        assert_eq!(report.outcome.trades.len(), 1);

        let view = scheduler.portfolio_view(1).await.unwrap();
        assert_eq!(view.positions.len(), 1);
        assert!(view.cash < dec!(10000));
        assert!(view.risk.is_some());

        assert_eq!(store.recent_trades(1, 10).await.unwrap().len(), 1);
        assert_eq!(store.recent_snapshots(1, 10).await.unwrap().len(), 1);
        let conversations = store.conversations(1).await;
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].parse_tier.as_deref(), Some("direct"));
    }

    #[tokio::test]
    async fn test_gateway_exhaustion_records_failed_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let mut gateway = MockAiGateway::new();
        gateway
            .expect_complete()
            .times(3)
            .returning(|_, _, _| Err(GatewayError::Timeout { elapsed_ms: 5000 }));
        let scheduler = scheduler(market_at(dec!(50000)), gateway, store.clone());

        let outcome = scheduler.run_once(1).await.unwrap();
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::Gateway(GatewayError::RetriesExhausted { attempts: 3, .. }))
        ));

        let view = scheduler.portfolio_view(1).await.unwrap();
        assert_eq!(view.cash, dec!(10000));
        assert!(view.last_cycle_at.is_none());
        assert!(store.recent_snapshots(1, 10).await.unwrap().is_empty());

        let conversations = store.conversations(1).await;
        assert_eq!(conversations.len(), 1);
        assert!(conversations[0].is_failed());
        assert!(conversations[0].error.as_deref().unwrap_or("").starts_with("timeout"));
    }

    #[tokio::test]
    async fn test_market_failure_skips_without_calling_gateway() {
        let store = Arc::new(InMemoryStore::new());
        let mut market = MockMarketDataProvider::new();
        market
            .expect_get_price()
            .returning(|coin| Err(MarketDataError::unavailable(coin, "down")));
        let mut gateway = MockAiGateway::new();
        gateway.expect_complete().never();
        let scheduler = scheduler(market, gateway, store.clone());

        let outcome = scheduler.run_once(1).await.unwrap();
        assert!(matches!(outcome.skip_reason(), Some(SkipReason::MarketData(_))));
        assert!(store.conversations(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_previous_state() {
        let store = Arc::new(InMemoryStore::new());
        let mut gateway = MockAiGateway::new();
        gateway
            .expect_complete()
            .returning(|_, _, _| Ok(BUY_BTC.to_string()));
        let scheduler = scheduler(market_at(dec!(50000)), gateway, store.clone());

        store.set_unavailable(true);
        let outcome = scheduler.run_once(1).await.unwrap();
        assert!(matches!(outcome.skip_reason(), Some(SkipReason::Persistence(_))));
        let view = scheduler.portfolio_view(1).await.unwrap();
        assert!(view.positions.is_empty());
        assert_eq!(view.cash, dec!(10000));
    }

    #[tokio::test]
    async fn test_unknown_model_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler(MockMarketDataProvider::new(), MockAiGateway::new(), store);
        assert!(matches!(
            scheduler.run_once(42).await,
            Err(ArenaError::ModelNotFound(42))
        ));
        assert!(scheduler.portfolio_view(42).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_rebuilds_from_store() {
        let store = Arc::new(InMemoryStore::new());
        let mut gateway = MockAiGateway::new();
        gateway
            .expect_complete()
            .returning(|_, _, _| Ok(BUY_BTC.to_string()));
        let live = scheduler(market_at(dec!(50000)), gateway, store.clone());
        live.run_once(1).await.unwrap();
        let before = live.portfolio_view(1).await.unwrap();

        let config = AppConfig::default();
        let state = restore_state(store.as_ref(), &model(), &config.risk).await.unwrap();
        assert_eq!(state.portfolio.cash, before.cash);
        assert_eq!(state.portfolio.positions.len(), 1);
        assert_eq!(state.portfolio.peek_trade_id(), 2);
        assert!(state.portfolio.total_fees > dec!(0));

        let fresh = restore_state(store.as_ref(), &Model { id: 9, ..model() }, &config.risk)
            .await
            .unwrap();
        assert_eq!(fresh.portfolio.cash, dec!(10000));
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let store = Arc::new(InMemoryStore::new());
        let mut gateway = MockAiGateway::new();
        gateway
            .expect_complete()
            .returning(|_, _, _| Ok(r#"{"signal": "hold"}"#.to_string()));
        let scheduler = scheduler(market_at(dec!(50000)), gateway, store);

        scheduler.start(1).unwrap();
        assert!(scheduler.is_running(1));
        scheduler.start(1).unwrap();
        assert!(scheduler.stop(1).await);
        assert!(!scheduler.is_running(1));
        assert!(!scheduler.stop(1).await);
        assert!(scheduler.start(7).is_err());
    }
}
