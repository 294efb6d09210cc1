//! Storage contract for ledgers, account history and model conversations.
//!
//! The trading core needs four operations keyed by model id: append trades
//! together with the portfolio snapshot they produced, append a conversation,
//! and read back the most recent trades or snapshots.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::domain::{Conversation, ModelId, PortfolioSnapshot, Trade};
use crate::error::Result;

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Append `trades` and the snapshot that follows them as one unit.
    /// Either everything is stored or nothing is.
    async fn record_execution(&self, trades: &[Trade], snapshot: &PortfolioSnapshot) -> Result<()>;

    async fn append_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Last `limit` trades for a model, oldest first
    async fn recent_trades(&self, model_id: ModelId, limit: usize) -> Result<Vec<Trade>>;

    /// Last `limit` snapshots for a model, oldest first
    async fn recent_snapshots(
        &self,
        model_id: ModelId,
        limit: usize,
    ) -> Result<Vec<PortfolioSnapshot>>;
}
