//! Model-facing side of a trading cycle: prompt assembly, the AI gateway
//! and interpretation of whatever text comes back.

pub mod gateway;
pub mod interpreter;
pub mod prompt;

pub use gateway::{
    complete_with_retry, normalize_base_url, AiGateway, OpenAiCompatibleGateway, RetryPolicy,
};
pub use interpreter::{Interpretation, ParseTier, ResponseInterpreter};
pub use prompt::{CoinMarket, DecisionRequestBuilder, Prompt};
