use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::TradeStore;
use crate::domain::{Conversation, ModelId, PortfolioSnapshot, Trade};
use crate::error::{ArenaError, Result};

#[derive(Debug, Default)]
struct Ledger {
    trades: Vec<Trade>,
    snapshots: Vec<PortfolioSnapshot>,
    conversations: Vec<Conversation>,
}

/// Process-local store used by backtests, tests and database-less runs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    ledgers: RwLock<HashMap<ModelId, Ledger>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched back, as a lost database would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn conversations(&self, model_id: ModelId) -> Vec<Conversation> {
        self.ledgers
            .read()
            .await
            .get(&model_id)
            .map(|l| l.conversations.clone())
            .unwrap_or_default()
    }

    pub async fn latest_snapshot(&self, model_id: ModelId) -> Option<PortfolioSnapshot> {
        self.ledgers
            .read()
            .await
            .get(&model_id)
            .and_then(|l| l.snapshots.last().cloned())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArenaError::Persistence("store unavailable".into()));
        }
        Ok(())
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

#[async_trait]
impl TradeStore for InMemoryStore {
    async fn record_execution(&self, trades: &[Trade], snapshot: &PortfolioSnapshot) -> Result<()> {
        self.check_available()?;
        let mut ledgers = self.ledgers.write().await;
        let ledger = ledgers.entry(snapshot.model_id).or_default();

        // Validate the whole batch before touching the ledger
        let mut last_id = ledger.trades.last().map(|t| t.id).unwrap_or(0);
        for trade in trades {
            if trade.model_id != snapshot.model_id {
                return Err(ArenaError::Persistence(format!(
                    "trade {} belongs to model {}, snapshot to {}",
                    trade.id, trade.model_id, snapshot.model_id
                )));
            }
            if trade.id <= last_id {
                return Err(ArenaError::Persistence(format!(
                    "trade id {} is not after {}",
                    trade.id, last_id
                )));
            }
            last_id = trade.id;
        }

        ledger.trades.extend_from_slice(trades);
        ledger.snapshots.push(snapshot.clone());
        debug!(
            model_id = snapshot.model_id,
            trades = trades.len(),
            "recorded execution"
        );
        Ok(())
    }

    async fn append_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.check_available()?;
        self.ledgers
            .write()
            .await
            .entry(conversation.model_id)
            .or_default()
            .conversations
            .push(conversation.clone());
        Ok(())
    }

    async fn recent_trades(&self, model_id: ModelId, limit: usize) -> Result<Vec<Trade>> {
        Ok(self
            .ledgers
            .read()
            .await
            .get(&model_id)
            .map(|l| tail(&l.trades, limit))
            .unwrap_or_default())
    }

    async fn recent_snapshots(
        &self,
        model_id: ModelId,
        limit: usize,
    ) -> Result<Vec<PortfolioSnapshot>> {
        Ok(self
            .ledgers
            .read()
            .await
            .get(&model_id)
            .map(|l| tail(&l.snapshots, limit))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, TradeKind};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(id: u64) -> Trade {
        Trade {
            id,
            model_id: 1,
            coin: "BTC".into(),
            kind: TradeKind::OpenLong,
            side: Side::Long,
            quantity: dec!(0.1),
            price: dec!(50000),
            leverage: 2,
            fee: dec!(5),
            realized_pnl: None,
            close_reason: None,
            timestamp: Utc::now(),
        }
    }

    fn snapshot(total: rust_decimal::Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            model_id: 1,
            cash: total,
            positions_value: dec!(0),
            total_value: total,
            realized_pnl: dec!(0),
            unrealized_pnl: dec!(0),
            total_fees: dec!(0),
            positions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_recent_reads_are_oldest_first() {
        let store = InMemoryStore::new();
        store
            .record_execution(&[trade(1), trade(2)], &snapshot(dec!(10000)))
            .await
            .unwrap();
        store
            .record_execution(&[trade(3)], &snapshot(dec!(9990)))
            .await
            .unwrap();

        let trades = store.recent_trades(1, 2).await.unwrap();
        assert_eq!(trades.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3]);

        let snaps = store.recent_snapshots(1, 10).await.unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].total_value, dec!(9990));
        assert!(store.recent_trades(7, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_batch_leaves_ledger_untouched() {
        let store = InMemoryStore::new();
        store
            .record_execution(&[trade(1)], &snapshot(dec!(10000)))
            .await
            .unwrap();

        let err = store
            .record_execution(&[trade(2), trade(2)], &snapshot(dec!(9000)))
            .await;
        assert!(matches!(err, Err(ArenaError::Persistence(_))));
        assert_eq!(store.recent_trades(1, 10).await.unwrap().len(), 1);
        assert_eq!(store.recent_snapshots(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_writes() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(store
            .record_execution(&[trade(1)], &snapshot(dec!(10000)))
            .await
            .is_err());
        store.set_unavailable(false);
        assert!(store.latest_snapshot(1).await.is_none());
    }
}
