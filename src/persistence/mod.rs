use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::execution::ExecutionResult;
use crate::models::Position;

/// Append-only audit sink backed by Postgres
///
/// Every write is best-effort from the control loop's point of view: a lost
/// row is logged and the cycle carries on. Tables are created on connect so
/// a fresh database needs no manual setup.
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::ensure_schema(&pool).await?;
        tracing::info!("connected to Postgres");

        Ok(Self { pool })
    }

    async fn ensure_schema(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id UUID PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                equity DOUBLE PRECISION NOT NULL,
                base_balance DOUBLE PRECISION NOT NULL,
                quote_balance DOUBLE PRECISION NOT NULL,
                drawdown_pct DOUBLE PRECISION NOT NULL,
                high_water_mark DOUBLE PRECISION NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id UUID PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                side TEXT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                amount DOUBLE PRECISION NOT NULL,
                fee DOUBLE PRECISION NOT NULL,
                slippage DOUBLE PRECISION NOT NULL,
                tx_id TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id UUID PRIMARY KEY,
                entry_time TIMESTAMPTZ NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                amount DOUBLE PRECISION NOT NULL,
                stop_price DOUBLE PRECISION NOT NULL,
                initial_stop DOUBLE PRECISION NOT NULL,
                partial_taken BOOLEAN NOT NULL,
                trailing_stop_active BOOLEAN NOT NULL,
                size_usd DOUBLE PRECISION NOT NULL,
                status TEXT NOT NULL,
                exit_time TIMESTAMPTZ,
                exit_price DOUBLE PRECISION,
                realized_pnl DOUBLE PRECISION,
                r_multiple DOUBLE PRECISION,
                hold_secs BIGINT,
                outcome TEXT,
                exit_reason TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id UUID PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                kind TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reasons TEXT NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn record_equity(
        &self,
        equity: f64,
        base_balance: f64,
        quote_balance: f64,
        drawdown_pct: f64,
        high_water_mark: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots
                (id, ts, equity, base_balance, quote_balance, drawdown_pct, high_water_mark)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .bind(equity)
        .bind(base_balance)
        .bind(quote_balance)
        .bind(drawdown_pct)
        .bind(high_water_mark)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_trade(&self, side: &str, result: &ExecutionResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, ts, side, price, amount, fee, slippage, tx_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(result.timestamp)
        .bind(side)
        .bind(result.price)
        .bind(result.amount)
        .bind(result.fee)
        .bind(result.slippage)
        .bind(result.tx_id.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_position_open(&self, position: &Position, size_usd: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, entry_time, entry_price, amount, stop_price, initial_stop,
                partial_taken, trailing_stop_active, size_usd, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'Open')
            ON CONFLICT (id) DO UPDATE SET
                amount = EXCLUDED.amount,
                stop_price = EXCLUDED.stop_price,
                partial_taken = EXCLUDED.partial_taken,
                trailing_stop_active = EXCLUDED.trailing_stop_active,
                updated_at = NOW()
            "#,
        )
        .bind(position.id)
        .bind(position.entry_time)
        .bind(position.entry_price)
        .bind(position.amount)
        .bind(position.stop_price)
        .bind(position.initial_stop)
        .bind(position.partial_taken)
        .bind(position.trailing_stop_active)
        .bind(size_usd)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the shrunken position after a partial take-profit
    pub async fn record_position_update(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                amount = $2,
                stop_price = $3,
                partial_taken = $4,
                trailing_stop_active = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(position.amount)
        .bind(position.stop_price)
        .bind(position.partial_taken)
        .bind(position.trailing_stop_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_position_close(
        &self,
        position: &Position,
        exit_price: f64,
        realized_pnl: f64,
        r_multiple: f64,
        exit_reason: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let hold_secs = (now - position.entry_time).num_seconds();
        let outcome = if realized_pnl >= 0.0 { "win" } else { "loss" };

        sqlx::query(
            r#"
            UPDATE positions SET
                status = 'Closed',
                exit_time = $2,
                exit_price = $3,
                realized_pnl = $4,
                r_multiple = $5,
                hold_secs = $6,
                outcome = $7,
                exit_reason = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(now)
        .bind(exit_price)
        .bind(realized_pnl)
        .bind(r_multiple)
        .bind(hold_secs)
        .bind(outcome)
        .bind(exit_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Decision audit row: regime checks, entry/exit evaluations and
    /// kill-switch triggers, each with outcome and reasons
    pub async fn record_decision(
        &self,
        kind: &str,
        outcome: &str,
        reasons: &[String],
        data: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (id, ts, kind, outcome, reasons, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .bind(kind)
        .bind(outcome)
        .bind(serde_json::to_string(reasons)?)
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Resume the single open position after a restart, if one exists
    pub async fn load_open_position(&self) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT id, entry_time, entry_price, amount, stop_price, initial_stop,
                   partial_taken, trailing_stop_active
            FROM positions
            WHERE status = 'Open'
            ORDER BY entry_time DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Position {
            id: row.get("id"),
            entry_time: row.get("entry_time"),
            entry_price: row.get("entry_price"),
            amount: row.get("amount"),
            stop_price: row.get("stop_price"),
            initial_stop: row.get("initial_stop"),
            partial_taken: row.get("partial_taken"),
            trailing_stop_active: row.get("trailing_stop_active"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Round-trip against a real database; run with DATABASE_URL set
    #[tokio::test]
    #[ignore]
    async fn test_position_round_trip_live() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let store = PostgresPersistence::connect(&url).await.unwrap();

        let position = Position::open(105.0, 10.0, 102.0, Utc::now());
        store.record_position_open(&position, 1050.0).await.unwrap();

        let loaded = store.load_open_position().await.unwrap().unwrap();
        assert_eq!(loaded.id, position.id);
        assert_eq!(loaded.entry_price, 105.0);

        store
            .record_position_close(&position, 110.0, 50.0, 1.67, "trailing")
            .await
            .unwrap();
        let open = store.load_open_position().await.unwrap();
        assert!(open.is_none() || open.unwrap().id != position.id);
    }
}
