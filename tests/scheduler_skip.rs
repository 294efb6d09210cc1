mod common;

use arena::config::AppConfig;
use arena::persistence::{InMemoryStore, TradeStore};
use arena::portfolio::TradingState;
use arena::scheduler::{CycleOutcome, CycleServices, Scheduler, SkipReason};
use common::{model, ScriptedGateway, ScriptedMarket};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

const BUY: &str = r#"{"signal": "buy", "coin": "BTC", "quantity": 0.05, "leverage": 2, "stop_loss": 48000}"#;

fn scheduler(gateway: Arc<ScriptedGateway>, store: Arc<InMemoryStore>) -> Scheduler {
    let mut config = AppConfig::default();
    config.trading.coins = vec!["BTC".into()];
    let market = Arc::new(ScriptedMarket::new(dec!(50000)));
    let services = CycleServices::from_config(&config, market, gateway, store);
    let scheduler = Scheduler::new(services, Duration::from_secs(180));
    for id in [1, 2] {
        let model = model(id);
        let state = TradingState::new(model.id, model.initial_capital, &config.risk);
        scheduler.register(model, state);
    }
    scheduler
}

async fn wait_for_calls(gateway: &ScriptedGateway, calls: usize) {
    while gateway.calls() < calls {
        tokio::task::yield_now().await;
    }
}

/// A cycle that finds the previous one still in flight is skipped, and the
/// in-flight one still completes.
#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(ScriptedGateway::new([BUY]).gated(gate.clone()));
    let store = Arc::new(InMemoryStore::new());
    let scheduler = scheduler(gateway.clone(), store.clone());

    let (first, second) = tokio::join!(scheduler.run_once(1), async {
        wait_for_calls(&gateway, 1).await;
        let second = scheduler.run_once(1).await;
        gate.notify_one();
        second
    });

    match second.unwrap() {
        CycleOutcome::Skipped(SkipReason::Busy) => {}
        other => panic!("expected busy skip, got {other:?}"),
    }
    assert!(first.unwrap().is_completed());
    assert_eq!(gateway.calls(), 1);
    assert_eq!(store.recent_trades(1, 10).await.unwrap().len(), 1);
}

/// Models run independently: one model's cycle does not block another.
#[tokio::test]
async fn models_do_not_block_each_other() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(ScriptedGateway::new([BUY, "hold"]).gated(gate.clone()));
    let store = Arc::new(InMemoryStore::new());
    let scheduler = scheduler(gateway.clone(), store.clone());

    // Both models park on the gateway at the same time before either is released
    let (first, second, _) = tokio::join!(scheduler.run_once(1), scheduler.run_once(2), async {
        wait_for_calls(&gateway, 2).await;
        gate.notify_one();
        gate.notify_one();
    });

    assert!(first.unwrap().is_completed());
    assert!(second.unwrap().is_completed());
    assert_eq!(gateway.calls(), 2);
}

/// Stopping a running loop returns true once, and the registry forgets it.
#[tokio::test]
async fn start_and_stop_loop() {
    let gateway = Arc::new(ScriptedGateway::new(["hold"; 8]));
    let store = Arc::new(InMemoryStore::new());
    let scheduler = scheduler(gateway, store);

    assert_ok!(scheduler.start(1));
    assert_ok!(scheduler.start(1));
    assert_err!(scheduler.start(9));
    assert!(scheduler.is_running(1));
    assert!(!scheduler.is_running(2));

    assert!(scheduler.stop(1).await);
    assert!(!scheduler.stop(1).await);
    assert!(!scheduler.is_running(1));
}
