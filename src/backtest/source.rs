//! Where a backtest gets its decisions from

use chrono::{DateTime, Utc};

use crate::agent::{CoinMarket, DecisionRequestBuilder, Prompt, ResponseInterpreter};
use crate::domain::Decision;
use crate::portfolio::Portfolio;

/// What a decision source sees at one replayed bar
pub struct StepContext<'a> {
    /// Zero-based index of the replayed bar
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub markets: &'a [CoinMarket],
    pub portfolio: &'a Portfolio,
}

pub trait DecisionSource {
    fn decisions(&mut self, ctx: &StepContext<'_>) -> Vec<Decision>;
}

/// Decisions recorded up front, one batch per replayed bar. Steps past the
/// end of the recording decide nothing.
#[derive(Debug, Clone, Default)]
pub struct RecordedDecisions {
    steps: Vec<Vec<Decision>>,
}

impl RecordedDecisions {
    pub fn new(steps: Vec<Vec<Decision>>) -> Self {
        Self { steps }
    }
}

impl DecisionSource for RecordedDecisions {
    fn decisions(&mut self, ctx: &StepContext<'_>) -> Vec<Decision> {
        self.steps.get(ctx.index).cloned().unwrap_or_default()
    }
}

/// Raw model responses replayed through the live interpreter
pub struct ReplayedResponses {
    responses: Vec<String>,
    interpreter: ResponseInterpreter,
}

impl ReplayedResponses {
    pub fn new(responses: Vec<String>, coins: &[String]) -> Self {
        Self {
            responses,
            interpreter: ResponseInterpreter::new(coins),
        }
    }
}

impl DecisionSource for ReplayedResponses {
    fn decisions(&mut self, ctx: &StepContext<'_>) -> Vec<Decision> {
        match self.responses.get(ctx.index) {
            Some(raw) => self.interpreter.interpret(raw).decisions,
            None => Vec::new(),
        }
    }
}

/// Builds the live prompt for every bar and interprets whatever the
/// responder returns. The responder is called once per bar, without retries.
pub struct PromptResponder<F> {
    builder: DecisionRequestBuilder,
    interpreter: ResponseInterpreter,
    respond: F,
}

impl<F> PromptResponder<F>
where
    F: FnMut(&Prompt) -> String,
{
    pub fn new(strategy: &str, max_leverage: u32, coins: &[String], respond: F) -> Self {
        Self {
            builder: DecisionRequestBuilder::new(strategy, max_leverage),
            interpreter: ResponseInterpreter::new(coins),
            respond,
        }
    }
}

impl<F> DecisionSource for PromptResponder<F>
where
    F: FnMut(&Prompt) -> String,
{
    fn decisions(&mut self, ctx: &StepContext<'_>) -> Vec<Decision> {
        let prompt = self.builder.build(ctx.markets, ctx.portfolio);
        let raw = (self.respond)(&prompt);
        self.interpreter.interpret(&raw).decisions
    }
}
