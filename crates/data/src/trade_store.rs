//! Atomic trade-store operations.
//!
//! Every lifecycle transition runs in a single transaction: the trade row is
//! locked, its source state validated, the mutation applied, and the ledger
//! event appended together. A transition from a disallowed state is an
//! `EngineError::InvariantViolation`, never a silent no-op.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};

use daytrader_core::EngineError;

use crate::models::{
    AlertRow, AlertStatus, DailySummaryRow, ExitReason, NewTrade, PriceSnapshotRow,
    TradeDirection, TradeEventRow, TradeEventType, TradeRow, TradeStatus,
};

#[derive(Debug, Clone)]
pub struct TradeStore {
    pool: PgPool,
}

async fn lock_trade(conn: &mut PgConnection, trade_id: i64) -> Result<TradeRow> {
    let trade = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = $1 FOR UPDATE")
        .bind(trade_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!("trade {trade_id} does not exist"))
        })?;
    Ok(trade)
}

fn require_status(trade: &TradeRow, allowed: &[TradeStatus]) -> Result<TradeStatus> {
    let status = trade
        .status()
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "trade {} has unknown status {:?}",
                trade.id, trade.status
            ))
        })?;
    if allowed.contains(&status) {
        Ok(status)
    } else {
        Err(EngineError::InvariantViolation(format!(
            "trade {} is {status}, expected one of {:?}",
            trade.id,
            allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>()
        ))
        .into())
    }
}

async fn insert_event(
    conn: &mut PgConnection,
    trade_id: i64,
    event_type: TradeEventType,
    message: &str,
    details: Option<JsonValue>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO trade_events (trade_id, event_type, message, details) VALUES ($1, $2, $3, $4)",
    )
    .bind(trade_id)
    .bind(event_type.as_str())
    .bind(message)
    .bind(details)
    .execute(conn)
    .await?;
    Ok(())
}

async fn refetch_trade(conn: &mut PgConnection, trade_id: i64) -> Result<TradeRow> {
    Ok(
        sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = $1")
            .bind(trade_id)
            .fetch_one(conn)
            .await?,
    )
}

impl TradeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ── Alerts ───────────────────────────────────────────────────────

    pub async fn create_alert(
        &self,
        raw_payload: &str,
        ticker: &str,
        direction: Option<TradeDirection>,
        signal_price: Option<Decimal>,
        source: &str,
    ) -> Result<AlertRow> {
        let alert = sqlx::query_as::<_, AlertRow>(
            r"
            INSERT INTO alerts (raw_payload, ticker, direction, signal_price, source, status)
            VALUES ($1, $2, $3, $4, $5, 'RECEIVED')
            RETURNING *
            ",
        )
        .bind(raw_payload)
        .bind(ticker)
        .bind(direction.map(TradeDirection::as_str))
        .bind(signal_price)
        .bind(source)
        .fetch_one(&self.pool)
        .await?;
        Ok(alert)
    }

    pub async fn reject_alert(&self, alert_id: i64, reason: &str) -> Result<AlertRow> {
        self.finalize_alert(alert_id, AlertStatus::Rejected, Some(reason), None)
            .await
    }

    pub async fn mark_alert_error(&self, alert_id: i64, reason: &str) -> Result<AlertRow> {
        self.finalize_alert(alert_id, AlertStatus::Error, Some(reason), None)
            .await
    }

    pub async fn mark_alert_processed(&self, alert_id: i64, trade_id: i64) -> Result<AlertRow> {
        self.finalize_alert(alert_id, AlertStatus::Processed, None, Some(trade_id))
            .await
    }

    /// Alerts are append-only once terminal: only RECEIVED rows may change.
    async fn finalize_alert(
        &self,
        alert_id: i64,
        status: AlertStatus,
        reason: Option<&str>,
        trade_id: Option<i64>,
    ) -> Result<AlertRow> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1 FOR UPDATE")
            .bind(alert_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!("alert {alert_id} does not exist"))
            })?;
        if current.status() != Some(AlertStatus::Received) {
            return Err(EngineError::InvariantViolation(format!(
                "alert {alert_id} is {}, already terminal",
                current.status
            ))
            .into());
        }
        let alert = sqlx::query_as::<_, AlertRow>(
            r"
            UPDATE alerts
            SET status = $2, rejection_reason = COALESCE($3, rejection_reason),
                trade_id = COALESCE($4, trade_id)
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(alert_id)
        .bind(status.as_str())
        .bind(reason)
        .bind(trade_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(alert)
    }

    pub async fn get_alert(&self, alert_id: i64) -> Result<Option<AlertRow>> {
        Ok(
            sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1")
                .bind(alert_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Most recent non-rejected alert in the same direction inside the
    /// dedup window, excluding the alert itself.
    pub async fn duplicate_alert(
        &self,
        exclude_id: i64,
        direction: TradeDirection,
        cutoff: NaiveDateTime,
    ) -> Result<Option<AlertRow>> {
        Ok(sqlx::query_as::<_, AlertRow>(
            r"
            SELECT * FROM alerts
            WHERE id != $1 AND direction = $2 AND received_at >= $3 AND status != 'REJECTED'
            ORDER BY received_at DESC
            LIMIT 1
            ",
        )
        .bind(exclude_id)
        .bind(direction.as_str())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Most recent opposite-direction alert inside the debounce window.
    pub async fn recent_opposite_alert(
        &self,
        direction: TradeDirection,
        cutoff: NaiveDateTime,
    ) -> Result<Option<AlertRow>> {
        let opposite = match direction {
            TradeDirection::Call => TradeDirection::Put,
            TradeDirection::Put => TradeDirection::Call,
        };
        Ok(sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts WHERE direction = $1 AND received_at >= $2 ORDER BY received_at DESC LIMIT 1",
        )
        .bind(opposite.as_str())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_alerts(&self, limit: i64) -> Result<Vec<AlertRow>> {
        Ok(
            sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts ORDER BY id DESC LIMIT $1")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ── Trade lifecycle transitions ──────────────────────────────────

    /// Creates the PENDING trade for an admitted alert, appends the given
    /// admission events, and links the alert, all atomically.
    pub async fn promote_alert_to_trade(
        &self,
        alert_id: i64,
        new: &NewTrade,
        events: &[(TradeEventType, String, Option<JsonValue>)],
    ) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;

        let trade = sqlx::query_as::<_, TradeRow>(
            r"
            INSERT INTO trades
                (trade_date, ticker, direction, option_symbol, strike_price, expiration_date,
                 quantity, status, source, entry_order_id, entry_atr,
                 param_stop_loss_percent, param_profit_target_percent,
                 param_trailing_stop_percent, param_max_hold_minutes, param_atr_stop_mult)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            ",
        )
        .bind(new.trade_date)
        .bind(&new.ticker)
        .bind(new.direction.as_str())
        .bind(&new.option_symbol)
        .bind(new.strike_price)
        .bind(new.expiration_date)
        .bind(new.quantity)
        .bind(&new.source)
        .bind(&new.entry_order_id)
        .bind(new.entry_atr)
        .bind(new.param_stop_loss_percent)
        .bind(new.param_profit_target_percent)
        .bind(new.param_trailing_stop_percent)
        .bind(new.param_max_hold_minutes)
        .bind(new.param_atr_stop_mult)
        .fetch_one(&mut *tx)
        .await?;

        for (event_type, message, details) in events {
            insert_event(&mut *tx, trade.id, *event_type, message, details.clone()).await?;
        }

        sqlx::query("UPDATE alerts SET status = 'PROCESSED', trade_id = $2 WHERE id = $1")
            .bind(alert_id)
            .bind(trade.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(trade_id = trade.id, alert_id, symbol = new.option_symbol, "Trade created");
        Ok(trade)
    }

    pub async fn record_entry_fill(
        &self,
        trade_id: i64,
        price: Decimal,
        filled_at: NaiveDateTime,
    ) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        require_status(&trade, &[TradeStatus::Pending])?;

        sqlx::query(
            r"
            UPDATE trades
            SET status = 'FILLED', entry_price = $2, entry_filled_at = $3,
                highest_price_seen = $2, updated_at = (now() AT TIME ZONE 'utc')
            WHERE id = $1
            ",
        )
        .bind(trade_id)
        .bind(price)
        .bind(filled_at)
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            trade_id,
            TradeEventType::EntryFilled,
            &format!("Entry filled at ${price:.2}"),
            Some(serde_json::json!({ "fill_price": price, "order_id": trade.entry_order_id })),
        )
        .await?;

        let updated = refetch_trade(&mut *tx, trade_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn record_stop_placement(
        &self,
        trade_id: i64,
        stop_order_id: Option<&str>,
        stop_price: Decimal,
    ) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        require_status(&trade, &[TradeStatus::Filled])?;

        sqlx::query(
            r"
            UPDATE trades
            SET status = 'STOP_LOSS_PLACED', stop_order_id = $2, stop_loss_price = $3,
                stop_active = $4, updated_at = (now() AT TIME ZONE 'utc')
            WHERE id = $1
            ",
        )
        .bind(trade_id)
        .bind(stop_order_id)
        .bind(stop_price)
        .bind(stop_order_id.is_some())
        .execute(&mut *tx)
        .await?;

        let message = match stop_order_id {
            Some(order_id) => format!("Stop-loss placed at ${stop_price:.2} (order={order_id})"),
            None => format!("App-managed stop-loss at ${stop_price:.2} (broker rejected)"),
        };
        insert_event(
            &mut tx,
            trade_id,
            TradeEventType::StopLossPlaced,
            &message,
            Some(serde_json::json!({
                "stop_price": stop_price,
                "order_id": stop_order_id,
                "app_managed": stop_order_id.is_none(),
            })),
        )
        .await?;

        let updated = refetch_trade(&mut *tx, trade_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Marks the trade EXITING with the reason and exit order, appending
    /// both the trigger and order-placed events.
    pub async fn record_exit_trigger(
        &self,
        trade_id: i64,
        reason: ExitReason,
        exit_order_id: &str,
        trigger_message: &str,
        order_message: &str,
    ) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        require_status(&trade, &[TradeStatus::Filled, TradeStatus::StopLossPlaced])?;

        sqlx::query(
            r"
            UPDATE trades
            SET status = 'EXITING', exit_order_id = $2, exit_reason = $3,
                stop_active = FALSE, updated_at = (now() AT TIME ZONE 'utc')
            WHERE id = $1
            ",
        )
        .bind(trade_id)
        .bind(exit_order_id)
        .bind(reason.as_str())
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            trade_id,
            TradeEventType::ExitTriggered,
            trigger_message,
            Some(serde_json::json!({ "reason": reason.as_str() })),
        )
        .await?;
        insert_event(
            &mut tx,
            trade_id,
            TradeEventType::ExitOrderPlaced,
            order_message,
            Some(serde_json::json!({ "order_id": exit_order_id, "exit_reason": reason.as_str() })),
        )
        .await?;

        let updated = refetch_trade(&mut *tx, trade_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Books the exit fill and PnL. `stop_hit` marks the broker-stop path:
    /// the source state is STOP_LOSS_PLACED and the reason becomes
    /// STOP_LOSS_HIT with its dedicated ledger event.
    pub async fn record_exit_fill(
        &self,
        trade_id: i64,
        price: Decimal,
        filled_at: NaiveDateTime,
        stop_hit: bool,
    ) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        if stop_hit {
            require_status(&trade, &[TradeStatus::StopLossPlaced])?;
        } else {
            require_status(&trade, &[TradeStatus::Exiting])?;
        }

        let entry_price = trade.entry_price.ok_or_else(|| {
            EngineError::InvariantViolation(format!("trade {trade_id} closing without entry price"))
        })?;
        let (pnl_dollars, pnl_percent) = crate::models::compute_pnl(entry_price, price, trade.quantity);

        let reason = if stop_hit {
            Some(ExitReason::StopLossHit.as_str())
        } else {
            trade.exit_reason.as_deref()
        };

        sqlx::query(
            r"
            UPDATE trades
            SET status = 'CLOSED', exit_price = $2, exit_filled_at = $3,
                exit_reason = $4, pnl_dollars = $5, pnl_percent = $6,
                stop_active = FALSE, updated_at = (now() AT TIME ZONE 'utc')
            WHERE id = $1
            ",
        )
        .bind(trade_id)
        .bind(price)
        .bind(filled_at)
        .bind(reason)
        .bind(pnl_dollars)
        .bind(pnl_percent)
        .execute(&mut *tx)
        .await?;

        let (event_type, label) = if stop_hit {
            (TradeEventType::StopLossHit, "Stop-loss hit")
        } else {
            (TradeEventType::ExitFilled, "Exit filled")
        };
        insert_event(
            &mut tx,
            trade_id,
            event_type,
            &format!("{label} at ${price:.2} — PnL ${pnl_dollars:.2} ({pnl_percent:.1}%)"),
            Some(serde_json::json!({
                "fill_price": price,
                "pnl_dollars": pnl_dollars,
                "pnl_percent": pnl_percent,
                "exit_reason": reason,
            })),
        )
        .await?;

        let updated = refetch_trade(&mut *tx, trade_id).await?;
        tx.commit().await?;
        tracing::info!(
            trade_id,
            exit_price = %price,
            pnl = %pnl_dollars,
            "Trade closed"
        );
        Ok(updated)
    }

    pub async fn cancel_pending(&self, trade_id: i64, reason: &str) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        require_status(&trade, &[TradeStatus::Pending])?;

        sqlx::query(
            "UPDATE trades SET status = 'CANCELLED', updated_at = (now() AT TIME ZONE 'utc') WHERE id = $1",
        )
        .bind(trade_id)
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            trade_id,
            TradeEventType::EntryCancelled,
            &format!("Entry cancelled: {reason}"),
            Some(serde_json::json!({ "reason": reason, "order_id": trade.entry_order_id })),
        )
        .await?;

        let updated = refetch_trade(&mut *tx, trade_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Terminal ERROR on unrecoverable failure from any non-terminal state.
    pub async fn mark_trade_error(&self, trade_id: i64, message: &str) -> Result<TradeRow> {
        let mut tx = self.pool.begin().await?;
        let trade = lock_trade(&mut *tx, trade_id).await?;
        require_status(
            &trade,
            &[
                TradeStatus::Pending,
                TradeStatus::Filled,
                TradeStatus::StopLossPlaced,
                TradeStatus::Exiting,
            ],
        )?;

        sqlx::query(
            "UPDATE trades SET status = 'ERROR', stop_active = FALSE, updated_at = (now() AT TIME ZONE 'utc') WHERE id = $1",
        )
        .bind(trade_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::error!(trade_id, message, "Trade marked ERROR");
        self.get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::InvariantViolation(format!("trade {trade_id} vanished")).into())
    }

    /// Appends a ledger event outside a state transition (stop cancelled,
    /// close signal, manual close).
    pub async fn log_event(
        &self,
        trade_id: i64,
        event_type: TradeEventType,
        message: &str,
        details: Option<JsonValue>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut *conn, trade_id, event_type, message, details).await
    }

    /// Updates the high-water mark and trailing stop. The caller holds the
    /// per-trade lock; status is unchanged.
    pub async fn update_trailing(
        &self,
        trade_id: i64,
        highest_price_seen: Decimal,
        trailing_stop_price: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE trades
            SET highest_price_seen = $2,
                trailing_stop_price = COALESCE($3, trailing_stop_price),
                updated_at = (now() AT TIME ZONE 'utc')
            WHERE id = $1
            ",
        )
        .bind(trade_id)
        .bind(highest_price_seen)
        .bind(trailing_stop_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears the resting-stop flag after the broker reports the stop order
    /// no longer WORKING.
    pub async fn set_stop_inactive(&self, trade_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE trades SET stop_active = FALSE, updated_at = (now() AT TIME ZONE 'utc') WHERE id = $1",
        )
        .bind(trade_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_trade(&self, trade_id: i64) -> Result<Option<TradeRow>> {
        Ok(
            sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = $1")
                .bind(trade_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Non-terminal trades for the session, ascending id (lock order).
    pub async fn monitorable_trades(&self, trade_date: NaiveDate) -> Result<Vec<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE trade_date = $1
              AND status IN ('PENDING', 'FILLED', 'STOP_LOSS_PLACED', 'EXITING')
            ORDER BY id ASC
            ",
        )
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Trades holding a live position (entry filled, not closed).
    pub async fn open_position_trades(&self, trade_date: NaiveDate) -> Result<Vec<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE trade_date = $1 AND status IN ('FILLED', 'STOP_LOSS_PLACED')
            ORDER BY id ASC
            ",
        )
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn most_recent_open_trade(&self) -> Result<Option<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE status IN ('PENDING', 'FILLED', 'STOP_LOSS_PLACED')
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn active_trade_for_ticker(
        &self,
        trade_date: NaiveDate,
        ticker: &str,
    ) -> Result<Option<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE trade_date = $1 AND ticker = $2
              AND status IN ('PENDING', 'FILLED', 'STOP_LOSS_PLACED')
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(trade_date)
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn count_non_cancelled(&self, trade_date: NaiveDate) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM trades WHERE trade_date = $1 AND status != 'CANCELLED'",
        )
        .bind(trade_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn daily_closed_pnl(&self, trade_date: NaiveDate) -> Result<Decimal> {
        let (total,): (Option<Decimal>,) = sqlx::query_as(
            "SELECT SUM(pnl_dollars) FROM trades WHERE trade_date = $1 AND status = 'CLOSED'",
        )
        .bind(trade_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    /// Count of consecutive losing signal-sourced trades ending now.
    /// Manual and retake trades do not reset or extend the streak.
    pub async fn consecutive_signal_losses(&self, trade_date: NaiveDate) -> Result<u32> {
        let trades = sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE trade_date = $1 AND status = 'CLOSED'
              AND source IN ('external', 'internal_strategy')
            ORDER BY exit_filled_at DESC NULLS LAST
            ",
        )
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?;

        let mut streak = 0;
        for trade in trades {
            if trade.pnl_dollars.unwrap_or(Decimal::ZERO) < Decimal::ZERO {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Most recent non-cancelled trade for a ticker created after `cutoff`.
    pub async fn recent_trade_for_ticker(
        &self,
        trade_date: NaiveDate,
        ticker: &str,
        cutoff: NaiveDateTime,
    ) -> Result<Option<TradeRow>> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r"
            SELECT * FROM trades
            WHERE trade_date = $1 AND ticker = $2 AND status != 'CANCELLED'
              AND created_at >= $3
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(trade_date)
        .bind(ticker)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_trades(&self, trade_date: Option<NaiveDate>, limit: i64) -> Result<Vec<TradeRow>> {
        let rows = match trade_date {
            Some(date) => {
                sqlx::query_as::<_, TradeRow>(
                    "SELECT * FROM trades WHERE trade_date = $1 ORDER BY id DESC LIMIT $2",
                )
                .bind(date)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TradeRow>("SELECT * FROM trades ORDER BY id DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn trade_events(&self, trade_id: i64) -> Result<Vec<TradeEventRow>> {
        Ok(sqlx::query_as::<_, TradeEventRow>(
            "SELECT * FROM trade_events WHERE trade_id = $1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ── Price snapshots ──────────────────────────────────────────────

    /// Writes a snapshot unless one newer than `min_interval_secs` exists.
    /// Returns whether a row was written.
    pub async fn insert_price_snapshot(
        &self,
        trade_id: i64,
        price: Decimal,
        highest_price_seen: Decimal,
        min_interval_secs: i64,
    ) -> Result<bool> {
        let cutoff = Utc::now().naive_utc() - chrono::Duration::seconds(min_interval_secs);
        let result = sqlx::query(
            r"
            INSERT INTO trade_price_snapshots (trade_id, price, highest_price_seen)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM trade_price_snapshots
                WHERE trade_id = $1 AND timestamp > $4
            )
            ",
        )
        .bind(trade_id)
        .bind(price)
        .bind(highest_price_seen)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn price_snapshots(&self, trade_id: i64) -> Result<Vec<PriceSnapshotRow>> {
        Ok(sqlx::query_as::<_, PriceSnapshotRow>(
            "SELECT * FROM trade_price_snapshots WHERE trade_id = $1 ORDER BY timestamp ASC",
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ── Daily summary ────────────────────────────────────────────────

    /// Computes and upserts the end-of-session summary for a date.
    pub async fn upsert_daily_summary(&self, trade_date: NaiveDate) -> Result<DailySummaryRow> {
        let trades = self.list_trades(Some(trade_date), 10_000).await?;
        let closed: Vec<&TradeRow> = trades
            .iter()
            .filter(|t| t.status() == Some(TradeStatus::Closed))
            .collect();

        let pnls: Vec<Decimal> = closed
            .iter()
            .map(|t| t.pnl_dollars.unwrap_or(Decimal::ZERO))
            .collect();
        let winners = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
        let losers = pnls.iter().filter(|p| **p < Decimal::ZERO).count();
        let total_pnl: Decimal = pnls.iter().sum();
        let largest_win = pnls.iter().copied().max().unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
        let largest_loss = pnls.iter().copied().min().unwrap_or(Decimal::ZERO).min(Decimal::ZERO);
        let win_rate = if closed.is_empty() {
            0.0
        } else {
            winners as f64 / closed.len() as f64 * 100.0
        };

        let hold_times: Vec<f64> = closed
            .iter()
            .filter_map(|t| match (t.entry_filled_at, t.exit_filled_at) {
                (Some(entry), Some(exit)) => {
                    Some((exit - entry).num_seconds() as f64 / 60.0)
                }
                _ => None,
            })
            .collect();
        let avg_hold = if hold_times.is_empty() {
            None
        } else {
            Some(hold_times.iter().sum::<f64>() / hold_times.len() as f64)
        };

        let summary = sqlx::query_as::<_, DailySummaryRow>(
            r"
            INSERT INTO daily_summaries
                (trade_date, total_trades, winning_trades, losing_trades, total_pnl,
                 largest_win, largest_loss, win_rate, avg_hold_time_minutes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (trade_date) DO UPDATE
            SET total_trades = EXCLUDED.total_trades,
                winning_trades = EXCLUDED.winning_trades,
                losing_trades = EXCLUDED.losing_trades,
                total_pnl = EXCLUDED.total_pnl,
                largest_win = EXCLUDED.largest_win,
                largest_loss = EXCLUDED.largest_loss,
                win_rate = EXCLUDED.win_rate,
                avg_hold_time_minutes = EXCLUDED.avg_hold_time_minutes
            RETURNING *
            ",
        )
        .bind(trade_date)
        .bind(i32::try_from(trades.len()).unwrap_or(i32::MAX))
        .bind(i32::try_from(winners).unwrap_or(i32::MAX))
        .bind(i32::try_from(losers).unwrap_or(i32::MAX))
        .bind(total_pnl)
        .bind(largest_win)
        .bind(largest_loss)
        .bind(win_rate)
        .bind(avg_hold)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            %trade_date,
            closed = closed.len(),
            total_pnl = %total_pnl,
            "Daily summary computed"
        );
        Ok(summary)
    }

    pub async fn daily_summary(&self, trade_date: NaiveDate) -> Result<Option<DailySummaryRow>> {
        Ok(sqlx::query_as::<_, DailySummaryRow>(
            "SELECT * FROM daily_summaries WHERE trade_date = $1",
        )
        .bind(trade_date)
        .fetch_optional(&self.pool)
        .await?)
    }
}
