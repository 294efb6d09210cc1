use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::TradeStore;
use crate::domain::{
    CloseReason, Conversation, ModelId, PortfolioSnapshot, Position, Side, Trade, TradeKind,
};
use crate::error::{ArenaError, Result};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_column<T>(value: &str, parse: impl Fn(&str) -> std::result::Result<T, String>) -> Result<T> {
    parse(value).map_err(ArenaError::Persistence)
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let kind: String = row.try_get("kind")?;
    let side: String = row.try_get("side")?;
    let close_reason: Option<String> = row.try_get("close_reason")?;
    let seq: i64 = row.try_get("trade_seq")?;
    let leverage: i32 = row.try_get("leverage")?;

    Ok(Trade {
        id: u64::try_from(seq)
            .map_err(|_| ArenaError::Persistence(format!("negative trade id {}", seq)))?,
        model_id: row.try_get("model_id")?,
        coin: row.try_get("coin")?,
        kind: parse_column(&kind, |s| TradeKind::try_from(s))?,
        side: parse_column(&side, |s| Side::try_from(s))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        leverage: u32::try_from(leverage)
            .map_err(|_| ArenaError::Persistence(format!("negative leverage {}", leverage)))?,
        fee: row.try_get("fee")?,
        realized_pnl: row.try_get("realized_pnl")?,
        close_reason: close_reason
            .as_deref()
            .map(|s| parse_column(s, |v| CloseReason::try_from(v)))
            .transpose()?,
        timestamp: row.try_get("executed_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot> {
    let positions: serde_json::Value = row.try_get("positions")?;
    let positions: Vec<Position> = serde_json::from_value(positions)?;
    let cash: Decimal = row.try_get("cash")?;
    let taken_at: DateTime<Utc> = row.try_get("taken_at")?;

    Ok(PortfolioSnapshot {
        model_id: row.try_get("model_id")?,
        cash,
        positions_value: row.try_get("positions_value")?,
        total_value: row.try_get("total_value")?,
        realized_pnl: row.try_get("realized_pnl")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        total_fees: row.try_get("total_fees")?,
        positions,
        timestamp: taken_at,
    })
}

#[async_trait]
impl TradeStore for PostgresStore {
    #[instrument(skip(self, trades, snapshot), fields(model_id = snapshot.model_id, trades = trades.len()))]
    async fn record_execution(&self, trades: &[Trade], snapshot: &PortfolioSnapshot) -> Result<()> {
        let positions = serde_json::to_value(&snapshot.positions)?;
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            let seq = i64::try_from(trade.id)
                .map_err(|_| ArenaError::Persistence(format!("trade id {} out of range", trade.id)))?;
            sqlx::query(
                r#"
                INSERT INTO trades (
                    model_id, trade_seq, coin, kind, side, quantity, price,
                    leverage, fee, realized_pnl, close_reason, executed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(trade.model_id)
            .bind(seq)
            .bind(&trade.coin)
            .bind(trade.kind.as_str())
            .bind(trade.side.as_str())
            .bind(trade.quantity)
            .bind(trade.price)
            .bind(trade.leverage as i32)
            .bind(trade.fee)
            .bind(trade.realized_pnl)
            .bind(trade.close_reason.map(|r| r.as_str()))
            .bind(trade.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (
                model_id, cash, positions_value, total_value, realized_pnl,
                unrealized_pnl, total_fees, positions, taken_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(snapshot.model_id)
        .bind(snapshot.cash)
        .bind(snapshot.positions_value)
        .bind(snapshot.total_value)
        .bind(snapshot.realized_pnl)
        .bind(snapshot.unrealized_pnl)
        .bind(snapshot.total_fees)
        .bind(&positions)
        .bind(snapshot.timestamp)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO portfolios (
                model_id, cash, positions_value, total_value, realized_pnl,
                unrealized_pnl, total_fees, positions, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (model_id) DO UPDATE SET
                cash = EXCLUDED.cash,
                positions_value = EXCLUDED.positions_value,
                total_value = EXCLUDED.total_value,
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                total_fees = EXCLUDED.total_fees,
                positions = EXCLUDED.positions,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.model_id)
        .bind(snapshot.cash)
        .bind(snapshot.positions_value)
        .bind(snapshot.total_value)
        .bind(snapshot.realized_pnl)
        .bind(snapshot.unrealized_pnl)
        .bind(snapshot.total_fees)
        .bind(&positions)
        .bind(snapshot.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Recorded execution");
        Ok(())
    }

    #[instrument(skip(self, conversation), fields(model_id = conversation.model_id))]
    async fn append_conversation(&self, conversation: &Conversation) -> Result<()> {
        let decisions = serde_json::to_value(&conversation.decisions)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, model_id, system_prompt, user_prompt, raw_response,
                decisions, parse_tier, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.model_id)
        .bind(&conversation.system_prompt)
        .bind(&conversation.user_prompt)
        .bind(&conversation.raw_response)
        .bind(&decisions)
        .bind(&conversation.parse_tier)
        .bind(&conversation.error)
        .bind(conversation.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recent_trades(&self, model_id: ModelId, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, trade_seq, coin, kind, side, quantity, price,
                   leverage, fee, realized_pnl, close_reason, executed_at
            FROM trades
            WHERE model_id = $1
            ORDER BY trade_seq DESC
            LIMIT $2
            "#,
        )
        .bind(model_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut trades = rows.iter().map(trade_from_row).collect::<Result<Vec<_>>>()?;
        trades.reverse();
        Ok(trades)
    }

    #[instrument(skip(self))]
    async fn recent_snapshots(
        &self,
        model_id: ModelId,
        limit: usize,
    ) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, cash, positions_value, total_value, realized_pnl,
                   unrealized_pnl, total_fees, positions, taken_at
            FROM portfolio_snapshots
            WHERE model_id = $1
            ORDER BY taken_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(model_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>>>()?;
        snapshots.reverse();
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_limit_saturates() {
        assert_eq!(sql_limit(20), 20);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn test_parse_column_maps_to_persistence_error() {
        let err = parse_column("sideways", |s| Side::try_from(s)).unwrap_err();
        assert!(matches!(err, ArenaError::Persistence(_)));
        assert_eq!(parse_column("short", |s| Side::try_from(s)).unwrap(), Side::Short);
    }
}
