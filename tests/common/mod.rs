//! Scripted collaborators for driving the scheduler without a network.

#![allow(dead_code)]

use arena::agent::{AiGateway, Prompt};
use arena::domain::{Bar, Model, ModelEndpoint, PriceQuote};
use arena::error::{GatewayError, MarketDataError};
use arena::market::MarketDataProvider;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use zeroize::Zeroizing;

pub fn model(id: i64) -> Model {
    Model {
        id,
        name: format!("model-{id}"),
        strategy: String::new(),
        endpoint: ModelEndpoint {
            base_url: "https://llm.example.com".into(),
            model_name: "scripted".into(),
            api_key: Zeroizing::new("key".into()),
        },
        initial_capital: Decimal::new(10000, 0),
        created_at: Utc::now(),
    }
}

/// Quotes every coin at a price the test sets between cycles
#[derive(Default)]
pub struct ScriptedMarket {
    price: Mutex<Decimal>,
}

impl ScriptedMarket {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: Mutex::new(price),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarket {
    async fn get_price(&self, coin: &str) -> Result<PriceQuote, MarketDataError> {
        let price = *self.price.lock().unwrap();
        Ok(PriceQuote::new(coin, price, Utc::now()))
    }

    async fn get_history(&self, _coin: &str, _days: u32) -> Result<Vec<Bar>, MarketDataError> {
        Ok(Vec::new())
    }
}

/// Answers with queued responses in order, optionally waiting for a
/// release signal before each answer
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<String>>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<usize>,
}

impl ScriptedGateway {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            gate: None,
            calls: Mutex::new(0),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl AiGateway for ScriptedGateway {
    async fn complete(
        &self,
        _endpoint: &ModelEndpoint,
        _prompt: &Prompt,
        _timeout: Duration,
    ) -> Result<String, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GatewayError::Transport("script exhausted".into()))
    }
}
