//! Enabled-strategy set and optimizer favorites.
//!
//! Plain CRUD; the strategy supervisor rebuilds its worker fleet whenever
//! the enabled set changes.

use anyhow::Result;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::{EnabledStrategyRow, FavoriteRow};

#[derive(Debug, Clone)]
pub struct StrategyRepository {
    pool: PgPool,
}

impl StrategyRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_enabled(&self) -> Result<Vec<EnabledStrategyRow>> {
        Ok(sqlx::query_as::<_, EnabledStrategyRow>(
            "SELECT * FROM enabled_strategies ORDER BY ticker, timeframe, signal_type",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Enables a (ticker, timeframe, signal_type) tuple, replacing its
    /// params if already enabled.
    pub async fn enable(
        &self,
        ticker: &str,
        timeframe: &str,
        signal_type: &str,
        params: &JsonValue,
    ) -> Result<EnabledStrategyRow> {
        let row = sqlx::query_as::<_, EnabledStrategyRow>(
            r"
            INSERT INTO enabled_strategies (ticker, timeframe, signal_type, params)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ticker, timeframe, signal_type) DO UPDATE
            SET params = EXCLUDED.params, enabled_at = (now() AT TIME ZONE 'utc')
            RETURNING *
            ",
        )
        .bind(ticker)
        .bind(timeframe)
        .bind(signal_type)
        .bind(params)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!(ticker, timeframe, signal_type, "Strategy enabled");
        Ok(row)
    }

    /// Returns whether a row was removed.
    pub async fn disable(&self, ticker: &str, timeframe: &str, signal_type: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM enabled_strategies WHERE ticker = $1 AND timeframe = $2 AND signal_type = $3",
        )
        .bind(ticker)
        .bind(timeframe)
        .bind(signal_type)
        .execute(&self.pool)
        .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(ticker, timeframe, signal_type, "Strategy disabled");
        }
        Ok(removed)
    }

    // ── Favorites ────────────────────────────────────────────────────

    pub async fn list_favorites(&self) -> Result<Vec<FavoriteRow>> {
        Ok(
            sqlx::query_as::<_, FavoriteRow>("SELECT * FROM favorites ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn create_favorite(
        &self,
        ticker: &str,
        timeframe: &str,
        signal_type: &str,
        params: &JsonValue,
        label: Option<&str>,
    ) -> Result<FavoriteRow> {
        Ok(sqlx::query_as::<_, FavoriteRow>(
            r"
            INSERT INTO favorites (ticker, timeframe, signal_type, params, label)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(ticker)
        .bind(timeframe)
        .bind(signal_type)
        .bind(params)
        .bind(label)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn delete_favorite(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM favorites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
